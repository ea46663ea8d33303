//! Typed comparison of stored and fresh outputs.
//!
//! Both output lists are first filtered down to the enabled output types,
//! then compared pairwise by their sanitized keys:
//!
//! ```text
//! stored: [stream.stdout "5", display_data.image/png ...]  ─┐ filter  ┌─ [stream.stdout "5"]
//! fresh:  [stream.stdout "6"]                              ─┘         └─ [stream.stdout "6"]
//!                                                                        │
//!                                   >>> diff in stream.stdout  ◄─────────┘
//!                                   - 5
//!                                   + 6
//! ```

pub mod registry;
pub mod sanitize;

use std::fmt;

use base64::Engine;
use similar::{ChangeTag, TextDiff};

use crate::error::Result;
use crate::notebook::OutputRecord;

pub use registry::{DEFAULT_SELECTORS, DiffStrategy, OutputRegistry, OutputSelector, OutputType};
pub use sanitize::sanitize;

/// Stands in for the missing side when the output counts differ.
pub const PLACEHOLDER: &str = "---";

/// An output record seen through one output type.
#[derive(Debug, Clone)]
pub struct TypedOutput<'a> {
    output_type: &'a OutputType,
    record: &'a OutputRecord,
    key: String,
}

impl<'a> TypedOutput<'a> {
    fn new(output_type: &'a OutputType, record: &'a OutputRecord) -> Self {
        let key = output_type.key(record);
        Self {
            output_type,
            record,
            key,
        }
    }

    pub fn selector(&self) -> &OutputSelector {
        self.output_type.selector()
    }

    pub fn record(&self) -> &'a OutputRecord {
        self.record
    }

    /// Sanitized comparison key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn strategy(&self) -> DiffStrategy {
        self.output_type.strategy()
    }

    /// Payload size reported for size-only diffs.
    ///
    /// PNG payloads are base64 and are measured in decoded bytes.
    pub fn size(&self) -> usize {
        if self.selector().name == "image/png" {
            let compact: String = self.key.split_whitespace().collect();
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(compact) {
                return bytes.len();
            }
        }
        self.key.len()
    }

    fn diff_against(&self, stored: &TypedOutput<'_>) -> DiffSection {
        if self.selector() != stored.selector() {
            return DiffSection::Selector {
                stored: stored.selector().clone(),
                fresh: self.selector().clone(),
            };
        }

        match self.strategy() {
            DiffStrategy::Lines => DiffSection::Lines {
                selector: self.selector().clone(),
                lines: diff_lines(stored.key(), self.key()),
            },
            DiffStrategy::Size => DiffSection::Size {
                selector: self.selector().clone(),
                stored: stored.size(),
                fresh: self.size(),
            },
        }
    }
}

impl PartialEq for TypedOutput<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.selector() == other.selector() && self.key == other.key
    }
}

impl Eq for TypedOutput<'_> {}

impl fmt::Display for TypedOutput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector())
    }
}

/// Kind of a line in a text diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTag {
    Equal,
    /// Only in the stored output
    Removed,
    /// Only in the fresh output
    Added,
}

impl DiffTag {
    pub fn prefix(&self) -> &'static str {
        match self {
            DiffTag::Equal => " ",
            DiffTag::Removed => "-",
            DiffTag::Added => "+",
        }
    }
}

/// One line of a text diff, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub tag: DiffTag,
    pub text: String,
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag.prefix(), self.text)
    }
}

/// Line diff going from `stored` to `fresh`.
pub fn diff_lines(stored: &str, fresh: &str) -> Vec<DiffLine> {
    let diff = TextDiff::from_lines(stored, fresh);
    diff.iter_all_changes()
        .map(|change| DiffLine {
            tag: match change.tag() {
                ChangeTag::Equal => DiffTag::Equal,
                ChangeTag::Delete => DiffTag::Removed,
                ChangeTag::Insert => DiffTag::Added,
            },
            text: change.value().trim_end_matches(['\r', '\n']).to_string(),
        })
        .collect()
}

/// One finding of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSection {
    /// Different number of relevant outputs. `rows` pairs the selectors of
    /// both sides, padded with [`PLACEHOLDER`].
    Count {
        stored: usize,
        fresh: usize,
        rows: Vec<(String, String)>,
    },
    /// Text outputs differ.
    Lines {
        selector: OutputSelector,
        lines: Vec<DiffLine>,
    },
    /// Binary outputs differ; only their sizes are reported.
    Size {
        selector: OutputSelector,
        stored: usize,
        fresh: usize,
    },
    /// Outputs at the same position are of different types.
    Selector {
        stored: OutputSelector,
        fresh: OutputSelector,
    },
}

impl fmt::Display for DiffSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffSection::Count {
                stored,
                fresh,
                rows,
            } => {
                write!(
                    f,
                    ">>> diff in number of relevant content parts {} vs {}",
                    stored, fresh
                )?;
                for (stored, fresh) in rows {
                    write!(f, "\n    {:>36} | {}", stored, fresh)?;
                }
                Ok(())
            }
            DiffSection::Lines { selector, lines } => {
                write!(f, ">>> diff in {}", selector)?;
                for line in lines {
                    write!(f, "\n{}", line)?;
                }
                Ok(())
            }
            DiffSection::Size {
                selector,
                stored,
                fresh,
            } => write!(
                f,
                ">>> diff in {}\nsize new : {} vs size old : {}",
                selector, fresh, stored
            ),
            DiffSection::Selector { stored, fresh } => {
                write!(f, ">>> diff in output type {} vs {}", stored, fresh)
            }
        }
    }
}

/// Everything found by one comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub sections: Vec<DiffSection>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", section)?;
        }
        Ok(())
    }
}

/// Verdict of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Match,
    Mismatch(DiffReport),
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Match)
    }

    /// The diff, if the outputs differ.
    pub fn into_diff(self) -> Option<DiffReport> {
        match self {
            Comparison::Match => None,
            Comparison::Mismatch(report) => Some(report),
        }
    }
}

/// Compares outputs over an ordered set of enabled output types.
#[derive(Debug, Clone)]
pub struct OutputComparator {
    types: Vec<OutputType>,
}

impl OutputComparator {
    /// Create a comparator for `selectors` using the built-in registry.
    ///
    /// Returns `Error::UnknownSelector` for selectors that are not registered.
    pub fn new(selectors: &[OutputSelector]) -> Result<Self> {
        Self::with_registry(&OutputRegistry::builtin(), selectors)
    }

    /// Create a comparator resolving `selectors` in `registry`.
    pub fn with_registry(registry: &OutputRegistry, selectors: &[OutputSelector]) -> Result<Self> {
        let types = registry.resolve(selectors)?;
        Ok(Self { types })
    }

    /// Enabled selectors, in priority order.
    pub fn selectors(&self) -> impl Iterator<Item = &OutputSelector> {
        self.types.iter().map(OutputType::selector)
    }

    /// Filter `outputs` to typed views.
    ///
    /// Each record is bound to the first enabled type it matches; records
    /// matching none are dropped. Order is preserved.
    pub fn typed<'a>(&'a self, outputs: &'a [OutputRecord]) -> Vec<TypedOutput<'a>> {
        outputs
            .iter()
            .filter_map(|record| {
                self.types
                    .iter()
                    .find(|t| t.matches(record))
                    .map(|t| TypedOutput::new(t, record))
            })
            .collect()
    }

    /// Compare stored outputs against freshly produced ones.
    pub fn compare(&self, stored: &[OutputRecord], fresh: &[OutputRecord]) -> Comparison {
        let stored = self.typed(stored);
        let fresh = self.typed(fresh);

        let mut report = DiffReport::default();

        if stored.len() != fresh.len() {
            fn label(outputs: &[TypedOutput<'_>], i: usize) -> String {
                outputs
                    .get(i)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| PLACEHOLDER.to_string())
            }

            let len = stored.len().max(fresh.len());
            report.sections.push(DiffSection::Count {
                stored: stored.len(),
                fresh: fresh.len(),
                rows: (0..len)
                    .map(|i| (label(&stored, i), label(&fresh, i)))
                    .collect(),
            });
        } else {
            for (stored, fresh) in stored.iter().zip(&fresh) {
                if stored != fresh {
                    report.sections.push(fresh.diff_against(stored));
                }
            }
        }

        if report.is_empty() {
            Comparison::Match
        } else {
            Comparison::Mismatch(report)
        }
    }
}

impl Default for OutputComparator {
    fn default() -> Self {
        let registry = OutputRegistry::builtin();
        let types = OutputSelector::defaults()
            .iter()
            .filter_map(|s| registry.get(s).cloned())
            .collect();
        Self { types }
    }
}
