use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de, Deserialize, Deserializer, Serialize};

/// The number of milliseconds since the [`UNIX_EPOCH`].
///
/// Internally a non-negative [`i64`] so it serializes cleanly to JSON
/// consumers that only have doubles.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
)]
pub struct TimestampMs(i64);

impl TimestampMs {
    /// Creates a new [`TimestampMs`] from the current [`SystemTime`].
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before 1970")
            .as_millis();
        Self(i64::try_from(millis).expect("system clock is unreasonable"))
    }

    pub const fn from_ms(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    pub fn ms_since(self, earlier: TimestampMs) -> i64 {
        (self.0 - earlier.0).max(0)
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let add = i64::try_from(duration.as_millis()).ok()?;
        self.0.checked_add(add).map(Self)
    }
}

/// Enforces that the inner [`i64`] is non-negative.
impl<'de> Deserialize<'de> for TimestampMs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        if value >= 0 {
            Ok(TimestampMs(value))
        } else {
            Err(de::Error::invalid_value(
                de::Unexpected::Signed(value),
                &"unix timestamp must be non-negative",
            ))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deserialize_enforces_nonnegative() {
        assert_eq!(
            serde_json::from_str::<TimestampMs>("42").unwrap().as_i64(),
            42
        );
        assert!(serde_json::from_str::<TimestampMs>("-42").is_err());
    }

    #[test]
    fn ms_since_saturates() {
        let early = TimestampMs::from_ms(1_000);
        let late = TimestampMs::from_ms(3_500);
        assert_eq!(late.ms_since(early), 2_500);
        assert_eq!(early.ms_since(late), 0);
    }
}
