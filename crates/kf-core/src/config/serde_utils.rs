//! Serde helpers for config fields

/// `Duration` stored as whole milliseconds
///
/// Timer settings in `[persistence]` are written as plain integers
/// (`debounce = 250`). Durations too large for a `u64` saturate.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PersistenceConfig;
    use std::time::Duration;

    #[test]
    fn test_timers_written_as_millis() {
        let persistence = PersistenceConfig {
            debounce: Duration::from_millis(1500),
            ..Default::default()
        };
        let toml = toml::to_string(&persistence).unwrap();
        assert!(toml.contains("debounce = 1500"));
        assert!(toml.contains("mismatch_cooldown = 10000"));
    }

    #[test]
    fn test_sub_second_cooldown() {
        let persistence: PersistenceConfig = toml::from_str("mismatch_cooldown = 250").unwrap();
        assert_eq!(persistence.mismatch_cooldown, Duration::from_millis(250));
        assert_eq!(persistence.debounce, Duration::from_millis(1000));
    }

    #[test]
    fn test_huge_duration_saturates() {
        let persistence = PersistenceConfig {
            provider_timeout: Duration::MAX,
            ..Default::default()
        };
        let json = serde_json::to_value(&persistence).unwrap();
        assert_eq!(json["provider_timeout"], serde_json::json!(u64::MAX));
    }

    #[test]
    fn test_negative_rejected() {
        assert!(toml::from_str::<PersistenceConfig>("debounce = -5").is_err());
    }
}
