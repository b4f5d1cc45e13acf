// Cleans a captured environment before it becomes part of an event.
//
// Transport-internal vars are dropped, shell noise is dropped, and anything that looks
// like a credential keeps its key but has its value replaced by a digest.

use crate::config::CaptureConfig;
use crate::core::event::PWD_KEY;
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

pub struct EnvFilter {
    reserved_prefix: String,
    skip_regex: Vec<Regex>,
    sensitive_regex: Vec<Regex>,
}

impl EnvFilter {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            reserved_prefix: config.reserved_env_prefix.clone(),
            skip_regex: compile(&config.skip_env_patterns),
            sensitive_regex: compile(&config.sensitive_env_patterns),
        }
    }

    /// Apply the filter to `KEY -> VALUE` pairs
    pub fn apply<I>(&self, env: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        env.into_iter()
            .filter(|(key, _)| !self.should_skip(key))
            .map(|(key, value)| {
                let value = if self.is_sensitive(&key) {
                    mask(&value)
                } else {
                    value
                };
                (key, value)
            })
            .collect()
    }

    /// True for keys owned by the capture hook itself
    pub fn is_reserved(&self, key: &str) -> bool {
        !self.reserved_prefix.is_empty() && key.starts_with(&self.reserved_prefix)
    }

    fn should_skip(&self, key: &str) -> bool {
        if key == PWD_KEY {
            return false;
        }
        self.is_reserved(key) || self.skip_regex.iter().any(|re| re.is_match(key))
    }

    fn is_sensitive(&self, key: &str) -> bool {
        key != PWD_KEY && self.sensitive_regex.iter().any(|re| re.is_match(key))
    }
}

impl Default for EnvFilter {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

/// Split `KEY=VALUE` on the first `=`; a missing `=` gives an empty value
pub fn split_env_entry(entry: &str) -> (String, String) {
    match entry.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => (entry.to_string(), String::new()),
    }
}

fn mask(value: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(value.as_bytes())))
}

// Build all the regex patterns once; a bad pattern is reported and skipped
fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(%pattern, error = %e, "ignoring invalid env pattern");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_drops_reserved_and_noise() {
        let filter = EnvFilter::default();
        let env = filter.apply(pairs(&[
            ("___PREEXEC_COMMAND", "ls"),
            ("_", "/usr/bin/env"),
            ("PS1", "$ "),
            ("TERM", "xterm"),
            ("BASH_VERSION", "5.2"),
            ("USER", "bob"),
            ("PWD", "/x"),
        ]));

        assert_eq!(env.len(), 2);
        assert_eq!(env.get("USER").map(String::as_str), Some("bob"));
        assert_eq!(env.get("PWD").map(String::as_str), Some("/x"));
    }

    #[test]
    fn test_masks_sensitive_values() {
        let filter = EnvFilter::default();
        let env = filter.apply(pairs(&[("GITHUB_TOKEN", "hunter2"), ("Db_Password", "x")]));

        let token = env.get("GITHUB_TOKEN").unwrap();
        assert!(token.starts_with("sha256:"));
        assert!(!token.contains("hunter2"));
        assert_eq!(token.len(), "sha256:".len() + 64);
        assert!(env.get("Db_Password").unwrap().starts_with("sha256:"));
    }

    #[test]
    fn test_mask_is_deterministic() {
        assert_eq!(mask("abc"), mask("abc"));
        assert_ne!(mask("abc"), mask("abd"));
    }

    #[test]
    fn test_split_env_entry() {
        assert_eq!(split_env_entry("A=b=c"), ("A".to_string(), "b=c".to_string()));
        assert_eq!(split_env_entry("NOVALUE"), ("NOVALUE".to_string(), String::new()));
        assert_eq!(split_env_entry("EMPTY="), ("EMPTY".to_string(), String::new()));
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let config = CaptureConfig {
            skip_env_patterns: vec!["(".to_string(), "^HOME$".to_string()],
            ..CaptureConfig::default()
        };
        let filter = EnvFilter::new(&config);
        let env = filter.apply(pairs(&[("HOME", "/root"), ("LANG", "C")]));
        assert!(!env.contains_key("HOME"));
        assert!(env.contains_key("LANG"));
    }
}
