use std::time::Duration;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Timelike;
use chrono::Utc;

/// Offset inside each second that collection ticks are aligned to.
const SLOT_OFFSET_MS: i64 = 500;

const SLOT_INTERVAL: Duration = Duration::from_secs(1);

/// Aligns collection ticks to the half second mark so consecutive samples
/// cover whole seconds regardless of how long a tick took.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionTimeSlotManager;

impl CollectionTimeSlotManager {
    pub fn next_collection_time_slot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // leap second nanos (>= 1e9) clamp into the last millisecond
        let ms = i64::from((now.nanosecond() / 1_000_000).min(999));
        if ms < SLOT_OFFSET_MS {
            now + TimeDelta::milliseconds(SLOT_OFFSET_MS - ms)
        } else {
            now + TimeDelta::milliseconds(1_000 + SLOT_OFFSET_MS - ms)
        }
    }

    /// How long to sleep before the next collection tick. Only a one second
    /// interval lines up with the slots; any other interval is used as is.
    pub fn collection_wait(&self, now: DateTime<Utc>, interval: Duration) -> Duration {
        if interval != SLOT_INTERVAL {
            return interval;
        }
        (self.next_collection_time_slot(now) - now)
            .to_std()
            .unwrap_or(interval)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use similar_asserts::assert_eq;

    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn aligns_to_half_second() {
        let manager = CollectionTimeSlotManager;

        for (offset, expected) in [(0, 500), (499, 1), (500, 1_000), (501, 999), (999, 501)] {
            let now = at(offset);
            assert_eq!(
                manager.next_collection_time_slot(now) - now,
                TimeDelta::milliseconds(expected),
                "offset {offset}"
            );
        }
    }

    #[test]
    fn sub_millisecond_part_is_kept() {
        let now = at(499) + TimeDelta::microseconds(300);
        let next = CollectionTimeSlotManager.next_collection_time_slot(now);
        assert_eq!(next - now, TimeDelta::milliseconds(1));
    }

    #[test]
    fn only_one_second_intervals_are_aligned() {
        let manager = CollectionTimeSlotManager;
        let now = at(800);

        assert_eq!(
            manager.collection_wait(now, Duration::from_secs(1)),
            Duration::from_millis(700)
        );
        assert_eq!(
            manager.collection_wait(now, Duration::from_secs(2)),
            Duration::from_secs(2)
        );
        assert_eq!(
            manager.collection_wait(now, Duration::from_millis(250)),
            Duration::from_millis(250)
        );
    }
}
