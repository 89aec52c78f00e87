/*!
 * File selection: ignore rules combined with attribute predicates
 *
 * Directories are only subjected to ignore rules; the attribute
 * predicates (extension, size range, mtime range, name patterns) apply to
 * files. A file passes iff every enabled predicate accepts it.
 */

use std::collections::HashSet;
use std::path::Path;

use glob::Pattern as GlobPattern;
use regex::Regex;

use super::ignore::{IgnoreMatcher, MatchDecision};
use crate::config::SyncOptions;
use crate::error::{Result, SyncError};

/// A name pattern: plain glob, or regex with the `regex:` prefix
#[derive(Debug, Clone)]
enum NamePattern {
    Glob(GlobPattern),
    Regex(Regex),
}

impl NamePattern {
    fn parse(text: &str) -> Result<Self> {
        if let Some(rest) = text.strip_prefix("regex:") {
            let re = Regex::new(rest.trim()).map_err(|e| {
                SyncError::Validation(format!("invalid regex pattern '{}': {}", rest.trim(), e))
            })?;
            Ok(NamePattern::Regex(re))
        } else {
            let pattern = GlobPattern::new(text).map_err(|e| {
                SyncError::Validation(format!("invalid glob pattern '{}': {}", text, e))
            })?;
            Ok(NamePattern::Glob(pattern))
        }
    }

    fn matches(&self, rel_path: &str) -> bool {
        match self {
            NamePattern::Glob(p) => {
                let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
                p.matches(rel_path) || p.matches(name)
            }
            NamePattern::Regex(r) => r.is_match(rel_path),
        }
    }
}

/// Combined ignore rules and attribute predicates for one scan root
#[derive(Debug, Clone, Default)]
pub struct SyncFilter {
    ignore: IgnoreMatcher,
    extensions: Option<HashSet<String>>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    modified_after_ms: Option<i64>,
    modified_before_ms: Option<i64>,
    name_patterns: Vec<NamePattern>,
}

impl SyncFilter {
    /// Filter with no rules or predicates; accepts everything
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Filter backed only by an ignore matcher
    pub fn from_matcher(ignore: IgnoreMatcher) -> Self {
        Self {
            ignore,
            ..Self::default()
        }
    }

    /// Build the filter for one root: built-in defaults, the root's
    /// `.syncignore`, then inline rules, plus the configured predicates.
    pub fn for_root(root: &Path, options: &SyncOptions) -> Result<Self> {
        let mut ignore = IgnoreMatcher::with_defaults();
        ignore
            .load_root_file(root)
            .map_err(|e| SyncError::Config(format!("failed to read ignore file: {}", e)))?;
        ignore.add_rules(options.ignore_rules.iter().map(String::as_str));

        let extensions = options.include_extensions.as_ref().map(|exts| {
            exts.iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect::<HashSet<_>>()
        });

        let mut name_patterns = Vec::with_capacity(options.name_patterns.len());
        for text in &options.name_patterns {
            name_patterns.push(NamePattern::parse(text)?);
        }

        Ok(Self {
            ignore,
            extensions,
            min_size: options.min_size,
            max_size: options.max_size,
            modified_after_ms: options.modified_after_ms,
            modified_before_ms: options.modified_before_ms,
            name_patterns,
        })
    }

    /// Ignore-rule decision for any path; the only check directories get
    pub fn accepts_path(&self, rel_path: &str, is_directory: bool) -> bool {
        self.ignore.matches(rel_path, is_directory) == MatchDecision::Include
    }

    /// Full decision for a file: ignore rules plus every enabled predicate
    pub fn accepts_file(&self, rel_path: &str, size: u64, mtime_ms: i64) -> bool {
        if !self.accepts_path(rel_path, false) {
            return false;
        }

        if let Some(ref extensions) = self.extensions {
            let ext = rel_path
                .rsplit('/')
                .next()
                .and_then(|name| name.rsplit_once('.'))
                .map(|(_, e)| e.to_ascii_lowercase());
            match ext {
                Some(ext) if extensions.contains(&ext) => {}
                _ => return false,
            }
        }

        if let Some(min) = self.min_size {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if size > max {
                return false;
            }
        }

        if let Some(after) = self.modified_after_ms {
            if mtime_ms < after {
                return false;
            }
        }
        if let Some(before) = self.modified_before_ms {
            if mtime_ms > before {
                return false;
            }
        }

        if !self.name_patterns.is_empty()
            && !self.name_patterns.iter().any(|p| p.matches(rel_path))
        {
            return false;
        }

        true
    }

    pub fn ignore_rule_count(&self) -> usize {
        self.ignore.len()
    }
}
