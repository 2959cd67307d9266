//! Parameter blob parsing.
//!
//! The CI harness hands each test case a flat `key=value;key=value` string.
//! There is no escaping: `;` always separates fields and the first `=` in a
//! field separates key from value.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::str::FromStr;

/// Parsed test parameters, keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestParameters {
    /// Lowercased key -> (key as last written, value).
    entries: HashMap<String, (String, String)>,
}

impl TestParameters {
    /// Parse a raw parameter string and check that every `required` key is present.
    ///
    /// Later occurrences of a key override earlier ones. Fields without an
    /// `=` or with an empty key are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] for a blank string and
    /// [`ConfigError::MissingKeys`] naming every absent required key.
    pub fn parse(raw: &str, required: &[&str]) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut entries = HashMap::new();
        for field in raw.split(';') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let Some((key, value)) = field.split_once('=') else {
                tracing::debug!(field = %field, "Skipping parameter without '='");
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                tracing::debug!(field = %field, "Skipping parameter with empty key");
                continue;
            }
            entries.insert(
                key.to_lowercase(),
                (key.to_string(), value.trim().to_string()),
            );
        }

        let params = Self { entries };
        let missing: Vec<String> = required
            .iter()
            .filter(|key| !params.contains(key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        tracing::debug!(count = params.len(), "Parameters parsed");
        Ok(params)
    }

    /// Get a value by key (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Get a value that must be present.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKeys(vec![key.to_string()]))
    }

    /// Get a value that must be present and non-empty.
    pub fn require_non_empty(&self, key: &str) -> Result<&str, ConfigError> {
        let value = self.require(key)?;
        if value.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: String::new(),
                reason: "must not be empty".into(),
            });
        }
        Ok(value)
    }

    /// Parse an optional value into `T`.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Parse an optional value into `T`, falling back to `default` when absent.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no keys were parsed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs using the key spelling from the blob.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_keys_and_values() {
        let params =
            TestParameters::parse(" vmName = guest1 ; hvServer=localhost;tries= 5 ", &[]).unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params.get("vmName"), Some("guest1"));
        assert_eq!(params.get("hvServer"), Some("localhost"));
        assert_eq!(params.get("tries"), Some("5"));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let params = TestParameters::parse("VMNAME=a", &["vmName"]).unwrap();
        assert_eq!(params.get("vmname"), Some("a"));
        assert!(params.contains("VmName"));
    }

    #[test]
    fn test_last_duplicate_wins() {
        let params = TestParameters::parse("Key=first;key=second", &[]).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("KEY"), Some("second"));
        let (key, _) = params.iter().next().unwrap();
        assert_eq!(key, "key");
    }

    #[test]
    fn test_value_keeps_later_equals_signs() {
        let params = TestParameters::parse("Value=a=b=c", &[]).unwrap();
        assert_eq!(params.get("Value"), Some("a=b=c"));
    }

    #[test]
    fn test_skips_malformed_fields() {
        let params = TestParameters::parse("vmName=a;;novalue; =x;", &["vmName"]).unwrap();
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_empty_is_error() {
        assert_eq!(TestParameters::parse("", &[]), Err(ConfigError::Empty));
        assert_eq!(TestParameters::parse("   ", &[]), Err(ConfigError::Empty));
    }

    #[test]
    fn test_missing_keys_are_aggregated() {
        let err = TestParameters::parse("vmName=a", &["vmName", "hvServer", "Key"]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingKeys(vec!["hvServer".into(), "Key".into()])
        );
    }

    #[test]
    fn test_get_parsed() {
        let params = TestParameters::parse("tries=4;bad=x", &[]).unwrap();
        assert_eq!(params.get_parsed::<u32>("tries").unwrap(), Some(4));
        assert_eq!(params.get_parsed::<u32>("absent").unwrap(), None);
        assert_eq!(params.get_or::<u32>("absent", 3).unwrap(), 3);
        assert!(matches!(
            params.get_parsed::<u32>("bad"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_require_non_empty() {
        let params = TestParameters::parse("Key=;vmName=a", &[]).unwrap();
        assert_eq!(params.require_non_empty("vmName").unwrap(), "a");
        assert!(matches!(
            params.require_non_empty("Key"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            params.require("hvServer"),
            Err(ConfigError::MissingKeys(_))
        ));
    }
}
