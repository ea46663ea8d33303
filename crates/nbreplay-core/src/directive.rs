//! Per-cell directives.
//!
//! A code cell may start with one or more directive lines:
//!
//! ```text
//! #! skip
//! #! timeout:5, ignore
//! print(1)
//! ```
//!
//! Each line holds a comma separated list of `key` or `key:value` entries.
//! Keys are case-insensitive. Blank lines between directive lines are allowed;
//! the first ordinary source line ends the directive block.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Prefix that marks a directive line.
pub const DIRECTIVE_MARKER: &str = "#!";

/// Directive keys understood by the runner.
pub const KNOWN_KEYS: &[&str] = &[
    "skip",
    "timeout",
    "ignore",
    "pass-if-timeout",
    "fail-if-timeout",
    "strict",
    "lazy",
    "verbose",
    "quiet",
];

/// Value of a single directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveValue {
    /// Bare key, e.g. `skip`
    Flag,
    /// Key with a value, e.g. `timeout:5`
    Value(String),
}

/// Directives of one cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    entries: BTreeMap<String, DirectiveValue>,
}

impl Directives {
    /// Parse the directive block at the top of `source`.
    pub fn parse(source: &str) -> Self {
        let mut entries = BTreeMap::new();

        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(body) = line.strip_prefix(DIRECTIVE_MARKER) else {
                break;
            };

            for part in body.split(',') {
                let pieces: Vec<&str> = part.split(':').collect();
                let (key, value) = match pieces.as_slice() {
                    [key] => (*key, DirectiveValue::Flag),
                    [key, value] => (*key, DirectiveValue::Value(value.trim().to_string())),
                    _ => {
                        tracing::debug!("Ignoring cell directive `{}`", part.trim());
                        continue;
                    }
                };
                let key = key.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::debug!("Unknown cell directive `{}`", key);
                }
                entries.insert(key, value);
            }
        }

        Self { entries }
    }

    /// Build directives from explicit entries.
    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, DirectiveValue)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into().to_lowercase(), v))
                .collect(),
        }
    }

    /// Whether `key` is present, with or without a value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Value of `key`, if it was given one.
    pub fn value(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(DirectiveValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Iterate over all directives in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DirectiveValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of directives.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no directives.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn skip(&self) -> bool {
        self.contains("skip")
    }

    pub fn ignore(&self) -> bool {
        self.contains("ignore")
    }

    pub fn strict(&self) -> bool {
        self.contains("strict")
    }

    pub fn lazy(&self) -> bool {
        self.contains("lazy")
    }

    pub fn pass_if_timeout(&self) -> bool {
        self.contains("pass-if-timeout")
    }

    pub fn fail_if_timeout(&self) -> bool {
        self.contains("fail-if-timeout")
    }

    pub fn verbose(&self) -> bool {
        self.contains("verbose")
    }

    pub fn quiet(&self) -> bool {
        self.contains("quiet")
    }

    /// Timeout override in whole seconds.
    ///
    /// Returns `Error::MalformedCell` if the directive is present without a
    /// usable number of seconds.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match self.entries.get("timeout") {
            None => Ok(None),
            Some(DirectiveValue::Flag) => Err(Error::MalformedCell(
                "`timeout` directive needs a value in seconds".to_string(),
            )),
            Some(DirectiveValue::Value(v)) => v
                .parse::<u64>()
                .map(|secs| Some(Duration::from_secs(secs)))
                .map_err(|_| {
                    Error::MalformedCell(format!("invalid `timeout` directive value `{}`", v))
                }),
        }
    }
}
