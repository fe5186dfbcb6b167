use derive_more::Display;

/// Error type for quota tracker construction.
#[derive(Debug, Display)]
pub enum QuotaError {
    /// Quota parameters are negative, not finite or inconsistent.
    #[display("invalid quota configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl core::error::Error for QuotaError {}

impl QuotaError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
