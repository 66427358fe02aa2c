//! # Filter compiler
//!
//! Compiles an ordered list of `(sign, glob)` rules into a path predicate.
//! Evaluation is a linear last-match-wins scan — not a merged
//! `globset::GlobSet`, because the *order* of rules determines the outcome
//! and a `GlobSet` match only tells you which patterns matched, not in what
//! order to apply their signs.

use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;

/// Whether a rule includes or excludes matching paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Include,
    Exclude,
}

/// One compiled rule: a sign plus the glob it applies to.
struct Rule {
    sign: Sign,
    matcher: GlobMatcher,
    source_line: String,
    matched_any: bool,
}

/// A compiled filter: an ordered rule list plus default-inclusion semantics.
pub struct Filter {
    rules: Vec<Rule>,
    case_insensitive: bool,
}

/// Construction-time options.
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Whether matching ignores case. Defaults to the host platform's
    /// filesystem convention (case-insensitive on Windows) but is always
    /// overridable so the logic is testable on any OS.
    pub case_insensitive: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            case_insensitive: cfg!(windows),
        }
    }
}

/// One textual rule line, before compilation.
#[derive(Debug, Clone)]
pub struct RuleLine {
    pub sign: Sign,
    pub pattern: String,
}

/// Report produced after a filter has processed a full run: which rules, if
/// any, never matched a candidate path. This is a warning, not
/// an error, so it's surfaced as data for the caller to render.
#[derive(Debug, Default)]
pub struct CompileReport {
    pub unused_rules: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterParseError {
    #[error("line {line_no}: expected '+' or '-' sign: {text:?}")]
    MissingSign { line_no: usize, text: String },
    #[error("line {line_no}: empty pattern: {text:?}")]
    EmptyPattern { line_no: usize, text: String },
    #[error("line {line_no}: invalid glob {pattern:?}: {source}")]
    InvalidGlob {
        line_no: usize,
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Parses a filter-file's textual body into rule lines:
/// one rule per non-empty, non-comment line, `<sign> <pattern>` with
/// sign in `{+, -}`, `#` marking a comment.
pub fn parse_rule_lines(text: &str) -> Result<Vec<RuleLine>, FilterParseError> {
    let mut rules = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut chars = line.chars();
        let sign_char = chars.next().ok_or_else(|| FilterParseError::MissingSign {
            line_no,
            text: raw_line.to_string(),
        })?;
        let sign = match sign_char {
            '+' => Sign::Include,
            '-' => Sign::Exclude,
            _ => {
                return Err(FilterParseError::MissingSign {
                    line_no,
                    text: raw_line.to_string(),
                })
            }
        };
        let pattern = chars.as_str().trim();
        if pattern.is_empty() {
            return Err(FilterParseError::EmptyPattern {
                line_no,
                text: raw_line.to_string(),
            });
        }
        rules.push(RuleLine {
            sign,
            pattern: pattern.to_string(),
        });
    }
    Ok(rules)
}

impl Filter {
    /// Compiles rule lines into a predicate. Patterns are taken relative to
    /// `source_root`; absolute patterns are stripped of the root prefix
    /// before compiling so matching always operates on the relative path.
    pub fn compile(
        rule_lines: &[RuleLine],
        source_root: &Path,
        options: FilterOptions,
    ) -> Result<Self, FilterParseError> {
        let mut rules = Vec::with_capacity(rule_lines.len());
        for (idx, rule_line) in rule_lines.iter().enumerate() {
            let line_no = idx + 1;
            let normalized = normalize_pattern(&rule_line.pattern, source_root);
            let glob = GlobBuilder::new(&normalized)
                .case_insensitive(options.case_insensitive)
                .literal_separator(true)
                .build()
                .map_err(|source| FilterParseError::InvalidGlob {
                    line_no,
                    pattern: rule_line.pattern.clone(),
                    source,
                })?;
            rules.push(Rule {
                sign: rule_line.sign,
                matcher: glob.compile_matcher(),
                source_line: rule_line.pattern.clone(),
                matched_any: false,
            });
        }
        Ok(Self {
            rules,
            case_insensitive: options.case_insensitive,
        })
    }

    /// An empty filter: everything is included, no rules to warn about.
    pub fn empty(options: FilterOptions) -> Self {
        Self {
            rules: Vec::new(),
            case_insensitive: options.case_insensitive,
        }
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Evaluates the predicate for one relative, forward-slash path. Starts
    /// "included" true; each matching rule in order flips the decision to
    /// its sign. The last matching rule wins.
    pub fn included(&mut self, relative_path: &str) -> bool {
        self.included_from(relative_path, true)
    }

    /// As [`Filter::included`], but lets the caller supply the starting
    /// decision before any rule is applied. Used for reparse points /
    /// junctions, which are excluded by default unless a user rule
    /// explicitly re-includes them.
    pub fn included_from(&mut self, relative_path: &str, default_included: bool) -> bool {
        let mut included = default_included;
        for rule in &mut self.rules {
            if rule.matcher.is_match(relative_path) {
                rule.matched_any = true;
                included = rule.sign == Sign::Include;
            }
        }
        included
    }

    /// Same as [`Filter::included`] but does not mutate `matched_any`
    /// bookkeeping — use for speculative checks (e.g. `--preview-filter`)
    /// where no "used by this run" accounting should occur.
    pub fn included_readonly(&self, relative_path: &str) -> bool {
        let mut included = true;
        for rule in &self.rules {
            if rule.matcher.is_match(relative_path) {
                included = rule.sign == Sign::Include;
            }
        }
        included
    }

    /// Produces the unused-rule warning report after a run.
    pub fn report(&self) -> CompileReport {
        CompileReport {
            unused_rules: self
                .rules
                .iter()
                .filter(|r| !r.matched_any)
                .map(|r| r.source_line.clone())
                .collect(),
        }
    }
}

/// Strips an absolute pattern down to a source-relative one, and ensures
/// `**`-style patterns anchor sensibly even without a leading wildcard.
fn normalize_pattern(pattern: &str, source_root: &Path) -> String {
    let candidate = Path::new(pattern);
    if candidate.is_absolute() {
        if let Ok(relative) = candidate.strip_prefix(source_root) {
            return relative.to_string_lossy().replace('\\', "/");
        }
    }
    pattern.replace('\\', "/")
}
