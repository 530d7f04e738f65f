//! Compilation of user-configured line filters.

use lectern_foundation::{FilterKind, FilterSpec};
use regex::{NoExpand, Regex, RegexBuilder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("invalid filter pattern {pattern:?}: {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A filter spec compiled for repeated application.
pub enum CompiledFilter {
    /// Regex (or escaped-literal) substitution. `expand` controls whether
    /// `$1`-style group references in the replacement are honored.
    Pattern {
        lookup: Regex,
        replace: String,
        expand: bool,
    },
    /// Whole-line literal replacement.
    FullMatch {
        lookup: String,
        replace: String,
        ignore_case: bool,
    },
}

impl CompiledFilter {
    pub fn compile(spec: &FilterSpec) -> Result<Self, SegmentError> {
        match spec.kind {
            FilterKind::Plaintext if spec.flags.contains('f') => Ok(CompiledFilter::FullMatch {
                lookup: spec.lookup.clone(),
                replace: spec.replace.clone(),
                ignore_case: spec.flags.contains('i'),
            }),
            FilterKind::Plaintext => {
                let lookup = RegexBuilder::new(&regex::escape(&spec.lookup))
                    .case_insensitive(spec.flags.contains('i'))
                    .build()
                    .map_err(|source| SegmentError::InvalidFilter {
                        pattern: spec.lookup.clone(),
                        source,
                    })?;
                Ok(CompiledFilter::Pattern {
                    lookup,
                    replace: spec.replace.clone(),
                    expand: false,
                })
            }
            FilterKind::Regex => {
                let pattern = if spec.flags.contains('l') {
                    regex::escape(&spec.lookup)
                } else {
                    spec.lookup.clone()
                };
                let lookup = RegexBuilder::new(&pattern)
                    .case_insensitive(spec.flags.contains('i'))
                    .multi_line(spec.flags.contains('m'))
                    .dot_matches_new_line(spec.flags.contains('s'))
                    .build()
                    .map_err(|source| SegmentError::InvalidFilter {
                        pattern: spec.lookup.clone(),
                        source,
                    })?;
                Ok(CompiledFilter::Pattern {
                    lookup,
                    replace: spec.replace.clone(),
                    expand: true,
                })
            }
        }
    }

    pub fn apply(&self, text: &str) -> String {
        match self {
            CompiledFilter::Pattern {
                lookup,
                replace,
                expand,
            } => {
                if *expand {
                    lookup.replace_all(text, replace.as_str()).into_owned()
                } else {
                    lookup.replace_all(text, NoExpand(replace)).into_owned()
                }
            }
            CompiledFilter::FullMatch {
                lookup,
                replace,
                ignore_case,
            } => {
                let matches = if *ignore_case {
                    text.to_lowercase() == lookup.to_lowercase()
                } else {
                    text == lookup
                };
                if matches {
                    replace.clone()
                } else {
                    text.to_string()
                }
            }
        }
    }
}

pub fn compile_filters(specs: &[FilterSpec]) -> Result<Vec<CompiledFilter>, SegmentError> {
    specs.iter().map(CompiledFilter::compile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: FilterKind, lookup: &str, flags: &str, replace: &str) -> FilterSpec {
        FilterSpec {
            kind,
            lookup: lookup.into(),
            flags: flags.into(),
            replace: replace.into(),
        }
    }

    #[test]
    fn regex_filter_expands_groups() {
        let f = CompiledFilter::compile(&spec(FilterKind::Regex, r"(\d+)x", "", "$1 times"))
            .unwrap();
        assert_eq!(f.apply("repeat 3x please"), "repeat 3 times please");
    }

    #[test]
    fn plaintext_filter_is_literal() {
        let f = CompiledFilter::compile(&spec(FilterKind::Plaintext, "T/N:", "", "note:")).unwrap();
        assert_eq!(f.apply("T/N: source unclear"), "note: source unclear");
        // Untouched replacement even when it looks like a group reference.
        let f = CompiledFilter::compile(&spec(FilterKind::Plaintext, "a", "", "$1")).unwrap();
        assert_eq!(f.apply("abc"), "$1bc");
    }

    #[test]
    fn plaintext_full_match_replaces_whole_line() {
        let f = CompiledFilter::compile(&spec(FilterKind::Plaintext, "ad", "f", "")).unwrap();
        assert_eq!(f.apply("ad"), "");
        assert_eq!(f.apply("read"), "read");
    }

    #[test]
    fn case_insensitive_flag() {
        let f = CompiledFilter::compile(&spec(FilterKind::Plaintext, "chapter", "i", "part"))
            .unwrap();
        assert_eq!(f.apply("CHAPTER one"), "part one");
    }

    #[test]
    fn invalid_regex_is_reported() {
        assert!(CompiledFilter::compile(&spec(FilterKind::Regex, "(", "", "")).is_err());
    }
}
