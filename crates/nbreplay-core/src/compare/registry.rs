//! Registry of comparable output types.
//!
//! Each entry maps an [`OutputSelector`] such as `stream.stdout` or
//! `execute_result.text/plain` to the predicate that recognizes matching
//! records, the function that extracts their comparison key, and the way a
//! mismatch is reported.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::notebook::{OutputKind, OutputRecord};

use super::sanitize::sanitize;

/// Selectors compared when none are configured.
pub const DEFAULT_SELECTORS: &[&str] = &["stream.stdout", "execute_result.text/plain"];

/// A `(kind, name)` pair naming a category of comparable output.
///
/// For streams the name is the stream name, for rich outputs the mime type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputSelector {
    pub kind: OutputKind,
    pub name: String,
}

impl OutputSelector {
    pub fn new(kind: OutputKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parse `kind.name`, e.g. `display_data.image/png`.
    pub fn parse(selector: &str) -> Result<Self> {
        let selector = selector.trim();
        let (kind, name) = selector
            .split_once('.')
            .ok_or_else(|| Error::UnknownSelector(selector.to_string()))?;
        let kind =
            OutputKind::parse(kind).ok_or_else(|| Error::UnknownSelector(selector.to_string()))?;
        if name.is_empty() {
            return Err(Error::UnknownSelector(selector.to_string()));
        }
        Ok(Self::new(kind, name))
    }

    /// Parse a comma separated list of selectors.
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// The default selectors.
    pub fn defaults() -> Vec<Self> {
        DEFAULT_SELECTORS
            .iter()
            .filter_map(|s| Self::parse(s).ok())
            .collect()
    }
}

impl FromStr for OutputSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OutputSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

/// How a mismatch between two outputs is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStrategy {
    /// Line-based diff of the two keys
    Lines,
    /// Payload sizes only
    Size,
}

type Predicate = fn(&OutputSelector, &OutputRecord) -> bool;
type KeyExtractor = fn(&OutputSelector, &OutputRecord) -> String;

/// A registered comparable output type.
#[derive(Clone)]
pub struct OutputType {
    selector: OutputSelector,
    predicate: Predicate,
    key: KeyExtractor,
    strategy: DiffStrategy,
}

impl OutputType {
    pub fn selector(&self) -> &OutputSelector {
        &self.selector
    }

    pub fn strategy(&self) -> DiffStrategy {
        self.strategy
    }

    /// Whether `record` is an output of this type.
    pub fn matches(&self, record: &OutputRecord) -> bool {
        (self.predicate)(&self.selector, record)
    }

    /// Comparison key of a matching record.
    pub fn key(&self, record: &OutputRecord) -> String {
        (self.key)(&self.selector, record)
    }
}

impl fmt::Debug for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputType")
            .field("selector", &self.selector)
            .field("strategy", &self.strategy)
            .finish()
    }
}

fn stream_matches(selector: &OutputSelector, record: &OutputRecord) -> bool {
    matches!(record, OutputRecord::Stream { name, .. } if *name == selector.name)
}

fn stream_key(_selector: &OutputSelector, record: &OutputRecord) -> String {
    match record {
        OutputRecord::Stream { text, .. } => sanitize(text),
        _ => String::new(),
    }
}

fn mime_matches(selector: &OutputSelector, record: &OutputRecord) -> bool {
    record.kind() == selector.kind
        && record.data().is_some_and(|data| data.contains(&selector.name))
}

fn mime_text_key(selector: &OutputSelector, record: &OutputRecord) -> String {
    sanitize(&mime_raw_key(selector, record))
}

fn mime_raw_key(selector: &OutputSelector, record: &OutputRecord) -> String {
    record
        .data()
        .and_then(|data| data.text(&selector.name))
        .unwrap_or_default()
}

/// Lookup table of all comparable output types.
#[derive(Debug, Clone)]
pub struct OutputRegistry {
    types: Vec<OutputType>,
}

impl OutputRegistry {
    /// Registry with the built-in output types.
    pub fn builtin() -> Self {
        let mut registry = Self { types: Vec::new() };

        for stream in ["stdout", "stderr"] {
            registry.register(
                OutputSelector::new(OutputKind::Stream, stream),
                stream_matches,
                stream_key,
                DiffStrategy::Lines,
            );
        }
        for kind in [OutputKind::DisplayData, OutputKind::ExecuteResult] {
            registry.register(
                OutputSelector::new(kind, "text/plain"),
                mime_matches,
                mime_text_key,
                DiffStrategy::Lines,
            );
            for image in ["image/png", "image/svg+xml"] {
                registry.register(
                    OutputSelector::new(kind, image),
                    mime_matches,
                    mime_raw_key,
                    DiffStrategy::Size,
                );
            }
        }

        registry
    }

    /// Add or replace an output type.
    pub fn register(
        &mut self,
        selector: OutputSelector,
        predicate: Predicate,
        key: KeyExtractor,
        strategy: DiffStrategy,
    ) {
        self.types.retain(|t| t.selector != selector);
        self.types.push(OutputType {
            selector,
            predicate,
            key,
            strategy,
        });
    }

    /// Look up the type registered for `selector`.
    pub fn get(&self, selector: &OutputSelector) -> Option<&OutputType> {
        self.types.iter().find(|t| t.selector == *selector)
    }

    /// Resolve selectors to their types, preserving order and dropping repeats.
    pub fn resolve(&self, selectors: &[OutputSelector]) -> Result<Vec<OutputType>> {
        let mut resolved: Vec<OutputType> = Vec::with_capacity(selectors.len());
        for selector in selectors {
            if resolved.iter().any(|t| t.selector == *selector) {
                continue;
            }
            let output_type = self
                .get(selector)
                .ok_or_else(|| Error::UnknownSelector(selector.to_string()))?;
            resolved.push(output_type.clone());
        }
        Ok(resolved)
    }

    /// All registered selectors.
    pub fn selectors(&self) -> impl Iterator<Item = &OutputSelector> {
        self.types.iter().map(|t| &t.selector)
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
