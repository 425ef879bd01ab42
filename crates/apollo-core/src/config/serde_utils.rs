//! Shared serde helpers for configuration types

/// `Duration` as whole seconds.
///
/// Serializes to an integer. Deserializes from an integer (`30`) or from a
/// string with an `s`, `m` or `h` suffix (`"30s"`, `"2m"`, `"1h"`).
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "apollo_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds or a suffixed string
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let value: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration '{}'", text))?;
        let factor = match unit.trim() {
            "" | "s" => 1,
            "m" => 60,
            "h" => 3600,
            other => return Err(format!("unknown duration unit '{}'", other)),
        };
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_duration_secs_serialize() {
        let config = TestConfig {
            timeout: Duration::from_secs(30),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"timeout":30}"#);
    }

    #[test]
    fn test_duration_from_integer() {
        let config: TestConfig = serde_json::from_str(r#"{"timeout":60}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_duration_from_suffixed_string() {
        let config: TestConfig = toml::from_str(r#"timeout = "2m""#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(120));

        let config: TestConfig = toml::from_str(r#"timeout = "5s""#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_duration_overflow_is_an_error() {
        let text = format!("timeout = \"{}h\"", u64::MAX / 1000);
        let result: Result<TestConfig, _> = toml::from_str(&text);
        assert!(result.unwrap_err().to_string().contains("too large"));
    }

    #[test]
    fn test_duration_bad_unit() {
        let result: Result<TestConfig, _> = toml::from_str(r#"timeout = "5 fortnights""#);
        assert!(result.is_err());
    }
}
