//! Filters over telemetry fields.
//!
//! Every telemetry type exposes its filterable fields through a static,
//! enum-keyed table ([`FilterableTelemetry::FIELDS`]). Field names coming
//! from the collector are resolved against that table once, when the
//! configuration is compiled, so evaluating a filter on the hot path is a
//! `match` on the field enum and never a string lookup.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use api_types::FilterConjunctionGroupInfo;
use api_types::FilterInfo;
use api_types::Predicate;
use api_types::TelemetryType;
use error_stack::report;
use error_stack::Report;

use crate::error::FilterError;
use crate::telemetry::effective_success;
use crate::telemetry::DependencyTelemetry;
use crate::telemetry::EventTelemetry;
use crate::telemetry::ExceptionTelemetry;
use crate::telemetry::RequestTelemetry;
use crate::telemetry::TelemetryContext;
use crate::telemetry::TraceTelemetry;

const ANY_FIELD: &str = "*";
const OPERATION_ID: &str = "Context.Operation.Id";
const OPERATION_NAME: &str = "Context.Operation.Name";
const CUSTOM_DIMENSION_PREFIX: &str = "CustomDimensions.";
const CUSTOM_METRIC_PREFIX: &str = "CustomMetrics.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Bool,
    Number,
    Duration,
}

/// Value of one field of one item. `None` marks an absent value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Text(Option<Cow<'a, str>>),
    Bool(bool),
    Number(Option<f64>),
    Duration(Duration),
}

impl FieldValue<'_> {
    /// Numeric view used by metric projections.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Text(text) => text.as_deref().and_then(parse_number),
            FieldValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            FieldValue::Number(value) => *value,
            FieldValue::Duration(value) => Some(value.as_secs_f64() * 1000.0),
        }
    }
}

/// A telemetry type that filters and calculated metrics can target.
pub trait FilterableTelemetry: Send + Sync + 'static {
    type Field: Copy + Debug + Send + Sync + 'static;

    const TELEMETRY_TYPE: TelemetryType;

    /// Type specific fields by collector name.
    const FIELDS: &'static [(&'static str, Self::Field)];

    fn field_type(field: Self::Field) -> FieldType;

    fn field_value(&self, field: Self::Field) -> FieldValue<'_>;

    /// Type specific string values searched by the `*` field.
    fn text_values(&self) -> Vec<Cow<'_, str>>;

    fn context(&self) -> &TelemetryContext;

    fn properties(&self) -> &BTreeMap<String, String>;

    fn measurements(&self) -> &BTreeMap<String, f64>;
}

/// A field name resolved against a telemetry type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRef<F> {
    AnyField,
    OperationId,
    OperationName,
    CustomDimension(String),
    CustomMetric(String),
    Specific(F),
}

impl<F: Copy> FieldRef<F> {
    pub fn resolve<T>(name: &str) -> Option<Self>
    where
        T: FilterableTelemetry<Field = F>,
    {
        let name = name.trim();
        if name == ANY_FIELD {
            return Some(FieldRef::AnyField);
        }
        if name.eq_ignore_ascii_case(OPERATION_ID) {
            return Some(FieldRef::OperationId);
        }
        if name.eq_ignore_ascii_case(OPERATION_NAME) {
            return Some(FieldRef::OperationName);
        }
        if let Some(key) = strip_prefix_ignore_case(name, CUSTOM_DIMENSION_PREFIX) {
            return Some(FieldRef::CustomDimension(key.to_string()));
        }
        if let Some(key) = strip_prefix_ignore_case(name, CUSTOM_METRIC_PREFIX) {
            return Some(FieldRef::CustomMetric(key.to_string()));
        }
        T::FIELDS
            .iter()
            .find(|(field_name, _)| field_name.eq_ignore_ascii_case(name))
            .map(|(_, field)| FieldRef::Specific(*field))
    }

    pub fn field_type<T>(&self) -> FieldType
    where
        T: FilterableTelemetry<Field = F>,
    {
        match self {
            FieldRef::AnyField
            | FieldRef::OperationId
            | FieldRef::OperationName
            | FieldRef::CustomDimension(_) => FieldType::Text,
            FieldRef::CustomMetric(_) => FieldType::Number,
            FieldRef::Specific(field) => T::field_type(*field),
        }
    }

    /// Value of the field, `None` for `*` which has no single value.
    pub fn value<'a, T>(&self, item: &'a T) -> Option<FieldValue<'a>>
    where
        T: FilterableTelemetry<Field = F>,
    {
        let value = match self {
            FieldRef::AnyField => return None,
            FieldRef::OperationId => {
                FieldValue::Text(item.context().operation_id.as_deref().map(Cow::Borrowed))
            }
            FieldRef::OperationName => {
                FieldValue::Text(item.context().operation_name.as_deref().map(Cow::Borrowed))
            }
            FieldRef::CustomDimension(key) => {
                FieldValue::Text(item.properties().get(key).map(|v| Cow::Borrowed(v.as_str())))
            }
            FieldRef::CustomMetric(key) => FieldValue::Number(item.measurements().get(key).copied()),
            FieldRef::Specific(field) => item.field_value(*field),
        };
        Some(value)
    }
}

fn strip_prefix_ignore_case<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let head = name.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &name[prefix.len()..])
        .filter(|key| !key.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
enum Comparand {
    /// Lowercased text and, when it parses, its numeric value.
    Text { lowered: String, number: Option<f64> },
    Bool(bool),
    Number(f64),
    Duration(Duration),
}

/// One compiled `field predicate comparand` condition.
#[derive(Debug, Clone)]
pub struct Filter<T: FilterableTelemetry> {
    field: FieldRef<T::Field>,
    predicate: Predicate,
    comparand: Comparand,
}

impl<T: FilterableTelemetry> Filter<T> {
    pub fn compile(info: &FilterInfo) -> Result<Self, Report<FilterError>> {
        let field = FieldRef::resolve::<T>(&info.field_name).ok_or_else(|| {
            report!(FilterError::UnknownField {
                field: info.field_name.clone(),
                telemetry_type: T::TELEMETRY_TYPE,
            })
        })?;

        let invalid_predicate = || {
            report!(FilterError::UnsupportedPredicate {
                field: info.field_name.clone(),
                predicate: info.predicate,
            })
        };
        let invalid_comparand = || {
            report!(FilterError::InvalidComparand {
                field: info.field_name.clone(),
                comparand: info.comparand.clone(),
            })
        };

        let comparand = match field.field_type::<T>() {
            FieldType::Text => {
                let number = parse_number(&info.comparand);
                if matches!(field, FieldRef::AnyField) && !is_text_predicate(info.predicate) {
                    return Err(invalid_predicate());
                }
                if !is_text_predicate(info.predicate) && number.is_none() {
                    return Err(invalid_comparand());
                }
                Comparand::Text {
                    lowered: info.comparand.to_lowercase(),
                    number,
                }
            }
            FieldType::Bool => {
                if !matches!(info.predicate, Predicate::Equal | Predicate::NotEqual) {
                    return Err(invalid_predicate());
                }
                let value = info.comparand.trim();
                if value.eq_ignore_ascii_case("true") {
                    Comparand::Bool(true)
                } else if value.eq_ignore_ascii_case("false") {
                    Comparand::Bool(false)
                } else {
                    return Err(invalid_comparand());
                }
            }
            FieldType::Number => {
                if is_substring_predicate(info.predicate) {
                    return Err(invalid_predicate());
                }
                Comparand::Number(parse_number(&info.comparand).ok_or_else(invalid_comparand)?)
            }
            FieldType::Duration => {
                if is_substring_predicate(info.predicate) {
                    return Err(invalid_predicate());
                }
                Comparand::Duration(parse_duration(&info.comparand).ok_or_else(invalid_comparand)?)
            }
        };

        Ok(Self {
            field,
            predicate: info.predicate,
            comparand,
        })
    }

    pub fn matches(&self, item: &T) -> bool {
        let Some(value) = self.field.value(item) else {
            return self.matches_any_field(item);
        };

        match (value, &self.comparand) {
            (FieldValue::Text(text), Comparand::Text { lowered, number }) => match text {
                Some(text) => compare_text(self.predicate, &text, lowered, *number),
                None => absent(self.predicate),
            },
            (FieldValue::Bool(value), Comparand::Bool(expected)) => {
                compare(self.predicate, value, *expected)
            }
            (FieldValue::Number(value), Comparand::Number(expected)) => match value {
                Some(value) => compare(self.predicate, value, *expected),
                None => absent(self.predicate),
            },
            (FieldValue::Duration(value), Comparand::Duration(expected)) => {
                compare(self.predicate, value, *expected)
            }
            // field types are checked at compile time
            _ => false,
        }
    }

    fn matches_any_field(&self, item: &T) -> bool {
        let Comparand::Text { lowered, number } = &self.comparand else {
            return false;
        };
        let context = item.context();
        let mut values = item
            .text_values()
            .into_iter()
            .chain(context.operation_id.as_deref().map(Cow::Borrowed))
            .chain(context.operation_name.as_deref().map(Cow::Borrowed))
            .chain(item.properties().values().map(|v| Cow::Borrowed(v.as_str())));

        // negative predicates must hold for every field
        match self.predicate {
            Predicate::NotEqual | Predicate::DoesNotContain => {
                values.all(|value| compare_text(self.predicate, &value, lowered, *number))
            }
            _ => values.any(|value| compare_text(self.predicate, &value, lowered, *number)),
        }
    }
}

/// Filters that must all match.
#[derive(Debug, Clone)]
pub struct FilterConjunctionGroup<T: FilterableTelemetry> {
    filters: Vec<Filter<T>>,
    /// Cleared when any filter failed to compile. Such a group never matches.
    usable: bool,
}

/// A filter that failed to compile, with the definition it came from.
pub type FilterFailure = (FilterInfo, Report<FilterError>);

impl<T: FilterableTelemetry> FilterConjunctionGroup<T> {
    pub fn compile(info: &FilterConjunctionGroupInfo) -> (Self, Vec<FilterFailure>) {
        let mut filters = Vec::with_capacity(info.filters.len());
        let mut failures = Vec::new();
        for filter_info in &info.filters {
            match Filter::compile(filter_info) {
                Ok(filter) => filters.push(filter),
                Err(report) => failures.push((filter_info.clone(), report)),
            }
        }

        let usable = failures.is_empty();
        (Self { filters, usable }, failures)
    }

    pub fn matches(&self, item: &T) -> bool {
        self.usable && self.filters.iter().all(|filter| filter.matches(item))
    }
}

fn is_text_predicate(predicate: Predicate) -> bool {
    matches!(
        predicate,
        Predicate::Equal | Predicate::NotEqual | Predicate::Contains | Predicate::DoesNotContain
    )
}

fn is_substring_predicate(predicate: Predicate) -> bool {
    matches!(predicate, Predicate::Contains | Predicate::DoesNotContain)
}

/// Outcome of a predicate on a value the item does not have.
fn absent(predicate: Predicate) -> bool {
    matches!(predicate, Predicate::NotEqual | Predicate::DoesNotContain)
}

fn compare<V: PartialOrd>(predicate: Predicate, value: V, comparand: V) -> bool {
    match predicate {
        Predicate::Equal => value == comparand,
        Predicate::NotEqual => value != comparand,
        Predicate::LessThan => value < comparand,
        Predicate::GreaterThan => value > comparand,
        Predicate::LessThanOrEqual => value <= comparand,
        Predicate::GreaterThanOrEqual => value >= comparand,
        Predicate::Contains | Predicate::DoesNotContain => false,
    }
}

fn compare_text(predicate: Predicate, value: &str, lowered: &str, number: Option<f64>) -> bool {
    match predicate {
        Predicate::Equal => value.to_lowercase() == lowered,
        Predicate::NotEqual => value.to_lowercase() != lowered,
        Predicate::Contains => value.to_lowercase().contains(lowered),
        Predicate::DoesNotContain => !value.to_lowercase().contains(lowered),
        _ => match (parse_number(value), number) {
            (Some(value), Some(comparand)) => compare(predicate, value, comparand),
            _ => false,
        },
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Parse `[d.]hh:mm:ss[.fffffff]` or a plain number of milliseconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if !text.contains(':') {
        let millis = parse_number(text)?;
        return Duration::try_from_secs_f64(millis / 1000.0).ok();
    }

    let mut parts = text.split(':');
    let (days_hours, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let (days, hours) = match days_hours.split_once('.') {
        Some((days, hours)) => (days.parse::<u64>().ok()?, hours.parse::<u64>().ok()?),
        None => (0, days_hours.parse::<u64>().ok()?),
    };
    let minutes = minutes.parse::<u64>().ok()?;
    let (whole_seconds, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (seconds, None),
    };
    let whole_seconds = whole_seconds.parse::<u64>().ok()?;
    if hours > 23 || minutes > 59 || whole_seconds > 59 {
        return None;
    }

    let nanos = match fraction {
        Some(digits) if !digits.is_empty() && digits.len() <= 9 => {
            let value = digits.parse::<u32>().ok()?;
            value * 10u32.pow(9 - digits.len() as u32)
        }
        Some(_) => return None,
        None => 0,
    };

    let secs = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + whole_seconds)?;
    Some(Duration::new(secs, nanos))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestField {
    Name,
    Success,
    Duration,
    ResponseCode,
    Url,
    Id,
    Source,
}

impl FilterableTelemetry for RequestTelemetry {
    type Field = RequestField;

    const FIELDS: &'static [(&'static str, RequestField)] = &[
        ("Name", RequestField::Name),
        ("Success", RequestField::Success),
        ("Duration", RequestField::Duration),
        ("ResponseCode", RequestField::ResponseCode),
        ("Url", RequestField::Url),
        ("Id", RequestField::Id),
        ("Source", RequestField::Source),
    ];
    const TELEMETRY_TYPE: TelemetryType = TelemetryType::Request;

    fn field_type(field: RequestField) -> FieldType {
        match field {
            RequestField::Success => FieldType::Bool,
            RequestField::Duration => FieldType::Duration,
            _ => FieldType::Text,
        }
    }

    fn field_value(&self, field: RequestField) -> FieldValue<'_> {
        match field {
            RequestField::Name => text(&self.name),
            RequestField::Success => FieldValue::Bool(effective_success(self)),
            RequestField::Duration => FieldValue::Duration(self.duration),
            RequestField::ResponseCode => text(&self.response_code),
            RequestField::Url => optional_text(&self.url),
            RequestField::Id => text(&self.id),
            RequestField::Source => optional_text(&self.source),
        }
    }

    fn text_values(&self) -> Vec<Cow<'_, str>> {
        [
            Some(self.name.as_str()),
            Some(self.response_code.as_str()),
            self.url.as_deref(),
            Some(self.id.as_str()),
            self.source.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(Cow::Borrowed)
        .collect()
    }

    fn context(&self) -> &TelemetryContext {
        &self.context
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyField {
    Name,
    Success,
    Duration,
    ResultCode,
    Target,
    Type,
    Data,
    Id,
}

impl FilterableTelemetry for DependencyTelemetry {
    type Field = DependencyField;

    const FIELDS: &'static [(&'static str, DependencyField)] = &[
        ("Name", DependencyField::Name),
        ("Success", DependencyField::Success),
        ("Duration", DependencyField::Duration),
        ("ResultCode", DependencyField::ResultCode),
        ("Target", DependencyField::Target),
        ("Type", DependencyField::Type),
        ("Data", DependencyField::Data),
        ("Id", DependencyField::Id),
    ];
    const TELEMETRY_TYPE: TelemetryType = TelemetryType::Dependency;

    fn field_type(field: DependencyField) -> FieldType {
        match field {
            DependencyField::Success => FieldType::Bool,
            DependencyField::Duration => FieldType::Duration,
            _ => FieldType::Text,
        }
    }

    fn field_value(&self, field: DependencyField) -> FieldValue<'_> {
        match field {
            DependencyField::Name => text(&self.name),
            DependencyField::Success => FieldValue::Bool(self.success),
            DependencyField::Duration => FieldValue::Duration(self.duration),
            DependencyField::ResultCode => optional_text(&self.result_code),
            DependencyField::Target => optional_text(&self.target),
            DependencyField::Type => optional_text(&self.dependency_type),
            DependencyField::Data => optional_text(&self.data),
            DependencyField::Id => text(&self.id),
        }
    }

    fn text_values(&self) -> Vec<Cow<'_, str>> {
        [
            Some(self.name.as_str()),
            self.result_code.as_deref(),
            self.target.as_deref(),
            self.dependency_type.as_deref(),
            self.data.as_deref(),
            Some(self.id.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(Cow::Borrowed)
        .collect()
    }

    fn context(&self) -> &TelemetryContext {
        &self.context
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionField {
    Message,
    ExceptionType,
    ProblemId,
}

impl FilterableTelemetry for ExceptionTelemetry {
    type Field = ExceptionField;

    const FIELDS: &'static [(&'static str, ExceptionField)] = &[
        ("Message", ExceptionField::Message),
        ("Exception.Message", ExceptionField::Message),
        ("Exception.Type", ExceptionField::ExceptionType),
        ("ProblemId", ExceptionField::ProblemId),
    ];
    const TELEMETRY_TYPE: TelemetryType = TelemetryType::Exception;

    fn field_type(_field: ExceptionField) -> FieldType {
        FieldType::Text
    }

    fn field_value(&self, field: ExceptionField) -> FieldValue<'_> {
        match field {
            ExceptionField::Message => {
                FieldValue::Text(Some(Cow::Owned(crate::document::exception_message(
                    &self.exception,
                ))))
            }
            ExceptionField::ExceptionType => text(&self.exception.type_name),
            ExceptionField::ProblemId => optional_text(&self.problem_id),
        }
    }

    fn text_values(&self) -> Vec<Cow<'_, str>> {
        let mut values = vec![
            Cow::Owned(crate::document::exception_message(&self.exception)),
            Cow::Borrowed(self.exception.type_name.as_str()),
        ];
        values.extend(self.problem_id.as_deref().map(Cow::Borrowed));
        values
    }

    fn context(&self) -> &TelemetryContext {
        &self.context
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Name,
}

impl FilterableTelemetry for EventTelemetry {
    type Field = EventField;

    const FIELDS: &'static [(&'static str, EventField)] = &[("Name", EventField::Name)];
    const TELEMETRY_TYPE: TelemetryType = TelemetryType::Event;

    fn field_type(_field: EventField) -> FieldType {
        FieldType::Text
    }

    fn field_value(&self, field: EventField) -> FieldValue<'_> {
        match field {
            EventField::Name => text(&self.name),
        }
    }

    fn text_values(&self) -> Vec<Cow<'_, str>> {
        vec![Cow::Borrowed(self.name.as_str())]
    }

    fn context(&self) -> &TelemetryContext {
        &self.context
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceField {
    Message,
    SeverityLevel,
}

impl FilterableTelemetry for TraceTelemetry {
    type Field = TraceField;

    const FIELDS: &'static [(&'static str, TraceField)] = &[
        ("Message", TraceField::Message),
        ("SeverityLevel", TraceField::SeverityLevel),
    ];
    const TELEMETRY_TYPE: TelemetryType = TelemetryType::Trace;

    fn field_type(field: TraceField) -> FieldType {
        match field {
            TraceField::Message => FieldType::Text,
            TraceField::SeverityLevel => FieldType::Number,
        }
    }

    fn field_value(&self, field: TraceField) -> FieldValue<'_> {
        match field {
            TraceField::Message => text(&self.message),
            TraceField::SeverityLevel => {
                FieldValue::Number(self.severity_level.map(|level| f64::from(level as u8)))
            }
        }
    }

    fn text_values(&self) -> Vec<Cow<'_, str>> {
        vec![Cow::Borrowed(self.message.as_str())]
    }

    fn context(&self) -> &TelemetryContext {
        &self.context
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }
}

fn text(value: &str) -> FieldValue<'_> {
    FieldValue::Text(Some(Cow::Borrowed(value)))
}

fn optional_text(value: &Option<String>) -> FieldValue<'_> {
    FieldValue::Text(value.as_deref().map(Cow::Borrowed))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::telemetry::SeverityLevel;

    fn filter<T: FilterableTelemetry>(field: &str, predicate: Predicate, comparand: &str) -> Filter<T> {
        Filter::compile(&FilterInfo::new(field, predicate, comparand)).unwrap()
    }

    fn request() -> RequestTelemetry {
        RequestTelemetry {
            name: "GET /Orders".to_string(),
            response_code: "500".to_string(),
            success: Some(false),
            duration: Duration::from_millis(1500),
            url: Some("https://shop.example.com/orders".to_string()),
            properties: [("tenant".to_string(), "Contoso".to_string())].into(),
            measurements: [("items".to_string(), 3.0)].into(),
            ..Default::default()
        }
    }

    #[test]
    fn field_names_resolve_case_insensitively() {
        assert_eq!(
            FieldRef::resolve::<RequestTelemetry>("responsecode"),
            Some(FieldRef::Specific(RequestField::ResponseCode))
        );
        assert_eq!(
            FieldRef::resolve::<RequestTelemetry>("customdimensions.Tenant"),
            Some(FieldRef::CustomDimension("Tenant".to_string()))
        );
        assert_eq!(
            FieldRef::resolve::<RequestTelemetry>("context.operation.id"),
            Some(FieldRef::OperationId)
        );
        assert_eq!(FieldRef::resolve::<RequestTelemetry>("Target"), None);
        assert_eq!(FieldRef::resolve::<RequestTelemetry>("CustomDimensions."), None);
    }

    #[test]
    fn text_predicates_ignore_case() {
        let item = request();
        assert!(filter::<RequestTelemetry>("Name", Predicate::Equal, "get /orders").matches(&item));
        assert!(filter::<RequestTelemetry>("Name", Predicate::Contains, "ORDERS").matches(&item));
        assert!(filter::<RequestTelemetry>("Name", Predicate::DoesNotContain, "cart").matches(&item));
        assert!(!filter::<RequestTelemetry>("Name", Predicate::NotEqual, "GET /ORDERS").matches(&item));
    }

    #[test]
    fn numeric_comparison_on_text_field() {
        let item = request();
        assert!(filter::<RequestTelemetry>("ResponseCode", Predicate::GreaterThanOrEqual, "500")
            .matches(&item));
        assert!(!filter::<RequestTelemetry>("ResponseCode", Predicate::LessThan, "400").matches(&item));

        let err = Filter::<RequestTelemetry>::compile(&FilterInfo::new(
            "ResponseCode",
            Predicate::LessThan,
            "abc",
        ))
        .unwrap_err();
        assert!(matches!(
            err.current_context(),
            FilterError::InvalidComparand { .. }
        ));
    }

    #[test]
    fn duration_comparands() {
        let item = request();
        assert!(filter::<RequestTelemetry>("Duration", Predicate::GreaterThan, "00:00:01").matches(&item));
        assert!(filter::<RequestTelemetry>("Duration", Predicate::LessThan, "1600").matches(&item));
        assert!(filter::<RequestTelemetry>("Duration", Predicate::Equal, "0.00:00:01.5").matches(&item));

        assert_eq!(parse_duration("1.02:03:04.5"), Some(Duration::new(93_784, 500_000_000)));
        assert_eq!(parse_duration("00:61:00"), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("999999999999999.00:00:00"), None);
        assert!(Filter::<RequestTelemetry>::compile(&FilterInfo::new(
            "Duration",
            Predicate::GreaterThan,
            "999999999999999.00:00:00",
        ))
        .is_err());
    }

    #[test]
    fn bool_fields_use_effective_success() {
        let mut item = request();
        assert!(filter::<RequestTelemetry>("Success", Predicate::Equal, "false").matches(&item));

        item.response_code = String::new();
        assert!(filter::<RequestTelemetry>("Success", Predicate::Equal, "True").matches(&item));

        let err = Filter::<RequestTelemetry>::compile(&FilterInfo::new(
            "Success",
            Predicate::GreaterThan,
            "true",
        ))
        .unwrap_err();
        assert!(matches!(
            err.current_context(),
            FilterError::UnsupportedPredicate { .. }
        ));
    }

    #[test]
    fn missing_dimensions_are_absent() {
        let item = request();
        let missing = |predicate| filter::<RequestTelemetry>("CustomDimensions.region", predicate, "eu");
        assert!(!missing(Predicate::Equal).matches(&item));
        assert!(!missing(Predicate::Contains).matches(&item));
        assert!(missing(Predicate::NotEqual).matches(&item));
        assert!(missing(Predicate::DoesNotContain).matches(&item));

        assert!(filter::<RequestTelemetry>("CustomMetrics.items", Predicate::GreaterThan, "2")
            .matches(&item));
        assert!(!filter::<RequestTelemetry>("CustomMetrics.weight", Predicate::LessThan, "2")
            .matches(&item));
        assert!(filter::<RequestTelemetry>("CustomMetrics.weight", Predicate::NotEqual, "2")
            .matches(&item));
    }

    #[test]
    fn any_field_searches_values_and_dimensions() {
        let item = request();
        assert!(filter::<RequestTelemetry>("*", Predicate::Contains, "contoso").matches(&item));
        assert!(filter::<RequestTelemetry>("*", Predicate::Contains, "shop.example").matches(&item));
        assert!(filter::<RequestTelemetry>("*", Predicate::DoesNotContain, "fabrikam").matches(&item));
        assert!(!filter::<RequestTelemetry>("*", Predicate::DoesNotContain, "orders").matches(&item));

        assert!(Filter::<RequestTelemetry>::compile(&FilterInfo::new(
            "*",
            Predicate::GreaterThan,
            "1"
        ))
        .is_err());
    }

    #[test]
    fn severity_is_numeric() {
        let trace = TraceTelemetry {
            message: "disk almost full".to_string(),
            severity_level: Some(SeverityLevel::Warning),
            ..Default::default()
        };
        assert!(filter::<TraceTelemetry>("SeverityLevel", Predicate::GreaterThanOrEqual, "2")
            .matches(&trace));
        assert!(Filter::<TraceTelemetry>::compile(&FilterInfo::new(
            "SeverityLevel",
            Predicate::Contains,
            "2"
        ))
        .is_err());
    }

    #[test]
    fn group_with_bad_filter_never_matches() {
        let info = FilterConjunctionGroupInfo {
            filters: vec![
                FilterInfo::new("Name", Predicate::Contains, "orders"),
                FilterInfo::new("NoSuchField", Predicate::Equal, "x"),
            ],
        };
        let (group, failures) = FilterConjunctionGroup::<RequestTelemetry>::compile(&info);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.field_name, "NoSuchField");
        assert!(!group.matches(&request()));

        let (empty, failures) =
            FilterConjunctionGroup::<RequestTelemetry>::compile(&FilterConjunctionGroupInfo::default());
        assert!(failures.is_empty());
        assert!(empty.matches(&request()));
    }
}
