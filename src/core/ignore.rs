/*!
 * Ignore-rule evaluation against scan-relative paths
 *
 * Rules follow the common glob convention: `*` matches within a path
 * segment, `**` across segments, a trailing `/` restricts the rule to
 * directories, a leading `!` negates, `#` starts a comment. Rules are
 * evaluated in declaration order and the last matching rule wins; the
 * implicit result is Include.
 */

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use tracing::warn;

/// Errors raised while compiling a single ignore rule
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("invalid ignore pattern '{pattern}' at line {line}: {source}")]
    InvalidGlob {
        pattern: String,
        line: usize,
        source: glob::PatternError,
    },

    #[error("empty ignore pattern at line {line}")]
    Empty { line: usize },
}

/// Outcome of matching a path against the rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    Include,
    Exclude,
}

/// One parsed ignore rule
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// Pattern text after stripping `!` and the trailing `/`
    pattern: String,
    /// Rule applies to directories only
    directory_only: bool,
    /// Rule re-includes instead of excluding
    negation: bool,
    /// Compiled full-path pattern (`**/`-prefixed when unanchored)
    full: Pattern,
    /// Compiled basename pattern for unanchored rules
    basename: Option<Pattern>,
}

impl IgnoreRule {
    /// Parse one non-comment rule line
    pub fn parse(line: &str, line_no: usize) -> Result<Self, RuleError> {
        let mut text = line.trim();

        let negation = text.starts_with('!');
        if negation {
            text = text[1..].trim_start();
        }

        let directory_only = text.ends_with('/');
        if directory_only {
            text = text[..text.len() - 1].trim_end();
        }

        let text = text.strip_prefix('/').unwrap_or(text);
        if text.is_empty() {
            return Err(RuleError::Empty { line: line_no });
        }

        let anchored = text.contains('/');
        let full_source = if anchored {
            text.to_string()
        } else {
            format!("**/{}", text)
        };

        let full = Pattern::new(&full_source).map_err(|e| RuleError::InvalidGlob {
            pattern: text.to_string(),
            line: line_no,
            source: e,
        })?;

        let basename = if anchored {
            None
        } else {
            Some(Pattern::new(text).map_err(|e| RuleError::InvalidGlob {
                pattern: text.to_string(),
                line: line_no,
                source: e,
            })?)
        };

        Ok(Self {
            pattern: text.to_string(),
            directory_only,
            negation,
            full,
            basename,
        })
    }

    /// Whether this rule matches the given normalized relative path
    fn matches(&self, path: &str, is_directory: bool, options: MatchOptions) -> bool {
        if self.directory_only && !is_directory {
            return false;
        }

        if let Some(ref basename) = self.basename {
            let name = path.rsplit('/').next().unwrap_or(path);
            if basename.matches_with(name, options) {
                return true;
            }
        }

        self.full.matches_with(path, options)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_negation(&self) -> bool {
        self.negation
    }

    pub fn is_directory_only(&self) -> bool {
        self.directory_only
    }
}

/// Built-in default rules: VCS directories, package and build artifact
/// directories, IDE scratch files, OS cruft, log and temp extensions.
pub const DEFAULT_RULES: &[&str] = &[
    ".syncignore",
    ".git/",
    ".svn/",
    ".hg/",
    "node_modules/",
    "target/",
    "build/",
    "dist/",
    "__pycache__/",
    ".venv/",
    ".idea/",
    ".vscode/",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "*.log",
    "*.tmp",
    "*.swp",
    "*.bak",
    "~$*",
];

/// Name of the per-root ignore file
pub const IGNORE_FILE_NAME: &str = ".syncignore";

/// Evaluates ignore rules with last-match-wins semantics
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Empty matcher; everything is included
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Matcher pre-seeded with the built-in default rules
    pub fn with_defaults() -> Self {
        let mut matcher = Self::new();
        matcher.add_rules(DEFAULT_RULES.iter().copied());
        matcher
    }

    /// Append one rule line; comments and blank lines are skipped.
    /// A malformed rule is reported with its line number and skipped.
    pub fn add_rule_line(&mut self, line: &str, line_no: usize) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }
        match IgnoreRule::parse(trimmed, line_no) {
            Ok(rule) => self.rules.push(rule),
            Err(e) => warn!("skipping ignore rule: {}", e),
        }
    }

    /// Append rules from an iterator of lines
    pub fn add_rules<'a, I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for (idx, line) in lines.into_iter().enumerate() {
            self.add_rule_line(line, idx + 1);
        }
    }

    /// Append rules from an ignore file. Loading continues past malformed
    /// lines; an unreadable file is an error for the caller to report.
    pub fn load_file(&mut self, path: &Path) -> std::io::Result<()> {
        let reader = BufReader::new(File::open(path)?);
        for (idx, line) in reader.lines().enumerate() {
            self.add_rule_line(&line?, idx + 1);
        }
        Ok(())
    }

    /// Append rules from `<root>/.syncignore` when present
    pub fn load_root_file(&mut self, root: &Path) -> std::io::Result<()> {
        let path = root.join(IGNORE_FILE_NAME);
        if path.exists() {
            self.load_file(&path)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate a normalized relative path. A path beneath an excluded
    /// directory is excluded regardless of later file-level rules.
    pub fn matches(&self, relative_path: &str, is_directory: bool) -> MatchDecision {
        let path = normalize(relative_path);
        if path.is_empty() {
            return MatchDecision::Include;
        }
        let options = host_match_options();

        // Ancestor directories first: exclusion of a parent prunes the subtree
        let mut end = 0;
        while let Some(sep) = path[end..].find('/') {
            let ancestor = &path[..end + sep];
            if self.decide(ancestor, true, options) == MatchDecision::Exclude {
                return MatchDecision::Exclude;
            }
            end += sep + 1;
        }

        self.decide(&path, is_directory, options)
    }

    /// Last matching rule wins; implicit Include
    fn decide(&self, path: &str, is_directory: bool, options: MatchOptions) -> MatchDecision {
        let mut decision = MatchDecision::Include;
        for rule in &self.rules {
            if rule.matches(path, is_directory, options) {
                decision = if rule.negation {
                    MatchDecision::Include
                } else {
                    MatchDecision::Exclude
                };
            }
        }
        decision
    }
}

/// Forward slashes, no leading slash
fn normalize(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized.trim_start_matches('/').to_string()
}

/// Case-insensitive matching on case-insensitive hosts
fn host_match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: cfg!(not(any(windows, target_os = "macos"))),
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Default `.syncignore` contents seeded for new roots
pub fn default_ignore_file_contents() -> String {
    let mut out = String::from("# Default bisync ignore rules\n");
    for rule in DEFAULT_RULES {
        out.push_str(rule);
        out.push('\n');
    }
    out
}
