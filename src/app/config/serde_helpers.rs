//! `#[serde(with = "serde_helpers")]` for `Duration` fields stored as
//! milliseconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "super")]
        connect: Duration,
    }

    #[test]
    fn test_duration_is_read_as_millis() {
        let parsed: Timeouts = toml::from_str("connect = 1500").unwrap();
        assert_eq!(parsed.connect, Duration::from_millis(1500));
        assert_eq!(toml::to_string(&parsed).unwrap().trim(), "connect = 1500");
    }
}
