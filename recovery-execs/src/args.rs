// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Action arguments: the `"key:value"` list attached to an action in the
//! plan, parsed into a case-preserving map with typed, defaulting accessors.

use std::collections::BTreeMap;
use std::time::Duration;

/// Token separating key from value in a raw argument.
pub const DEFAULT_SPLIT_TOKEN: &str = ":";

/// Parsed action arguments. Keys keep their case; values keep everything
/// after the first split token, trimmed. An entry without a split token maps
/// to an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionArgs {
    map: BTreeMap<String, String>,
}

impl ActionArgs {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Self {
        Self::parse_with(raw, DEFAULT_SPLIT_TOKEN)
    }

    pub fn parse_with<S: AsRef<str>>(raw: &[S], split_token: &str) -> Self {
        let mut map = BTreeMap::new();
        for entry in raw {
            let entry = entry.as_ref();
            if entry.is_empty() {
                continue;
            }
            match entry.split_once(split_token) {
                Some((key, value)) => {
                    map.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    map.insert(entry.trim().to_string(), String::new());
                }
            }
        }
        Self { map }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Raw value for `key`, if the argument was given at all.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// String value, or `default` when the argument is missing or empty.
    pub fn as_string(&self, key: &str, default: &str) -> String {
        match self.map.get(key) {
            Some(v) if !v.is_empty() => v.clone(),
            _ => default.to_string(),
        }
    }

    /// Boolean value, parsed case-insensitively; `default` when missing or
    /// unparseable.
    pub fn as_bool(&self, key: &str, default: bool) -> bool {
        match self.map.get(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            _ => default,
        }
    }

    /// Decimal integer value; `default` when missing or unparseable.
    pub fn as_int(&self, key: &str, default: i64) -> i64 {
        self.map
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Duration given as an integer quantity of `unit`; `default` (in the
    /// same unit) when missing or unparseable. Negative quantities fall back
    /// to the default.
    pub fn as_duration(&self, key: &str, default: u64, unit: Duration) -> Duration {
        let quantity = self
            .map
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default);
        unit * u32::try_from(quantity).unwrap_or(u32::MAX)
    }

    /// Comma-separated list value; `default` when the argument is missing or
    /// empty.
    pub fn as_string_slice(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.map.get(key) {
            Some(v) if !v.is_empty() => {
                v.split(',').map(|s| s.trim().to_string()).collect()
            }
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Render back to the raw `"key:value"` form, sorted by key.
    pub fn format(&self) -> Vec<String> {
        self.format_with(DEFAULT_SPLIT_TOKEN)
    }

    pub fn format_with(&self, split_token: &str) -> Vec<String> {
        self.map
            .iter()
            .map(|(k, v)| format!("{k}{split_token}{v}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_with_defaults() {
        let args = ActionArgs::parse(&[
            "count:3",
            "retry_interval:2",
            "enabled:TRUE",
            "pools:a,b,c",
        ]);
        assert_eq!(args.as_int("count", 1), 3);
        assert_eq!(
            args.as_duration("retry_interval", 10, Duration::from_secs(1)),
            Duration::from_secs(2)
        );
        assert!(args.as_bool("enabled", false));
        assert_eq!(args.as_string_slice("pools", &[]), ["a", "b", "c"]);
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let args = ActionArgs::parse(&["count:x", "enabled:yes"]);
        assert_eq!(args.as_int("count", 1), 1);
        assert!(!args.as_bool("enabled", false));
        assert_eq!(args.as_string("missing", "fallback"), "fallback");
        assert_eq!(
            args.as_duration("absent", 5, Duration::from_secs(1)),
            Duration::from_secs(5)
        );
        assert_eq!(args.as_string_slice("absent", &["x"]), ["x"]);
    }

    #[test]
    fn values_are_trimmed_and_case_preserved() {
        let args = ActionArgs::parse(&["k1:v1", "k2: v2", "State:SBU"]);
        assert_eq!(args.get("k2"), Some("v2"));
        assert_eq!(args.get("State"), Some("SBU"));
        assert_eq!(args.get("state"), None);
    }

    #[test]
    fn entry_without_split_token_maps_to_empty_value() {
        let args = ActionArgs::parse(&["bare_flag"]);
        assert!(args.has("bare_flag"));
        assert_eq!(args.get("bare_flag"), Some(""));
    }

    #[test]
    fn format_parse_round_trip() {
        let raw = ["a:1", "b:two", "c:"];
        let args = ActionArgs::parse(&raw);
        let formatted = args.format();
        assert_eq!(formatted, ["a:1", "b:two", "c:"]);
        assert_eq!(ActionArgs::parse(&formatted), args);
    }

    #[test]
    fn custom_split_token() {
        let args = ActionArgs::parse_with(&["k=v:with:colons"], "=");
        assert_eq!(args.get("k"), Some("v:with:colons"));
        assert_eq!(args.format_with("="), ["k=v:with:colons"]);
    }
}
