//! Name filters for the native walker
//!
//! The ignore-file support here is deliberately small: each rule is either an
//! exact name or, when it contains `*`, a substring match on what remains
//! after removing the stars. There is no negation and no path anchoring.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::core::model::ScanOptions;
use crate::core::paths::is_hidden_name;

/// Ignore files read from each directory
pub const IGNORE_FILES: [&str; 2] = [".gitignore", ".ignore"];

/// Characters that turn an exclude pattern into a pattern match
static PATTERN_META: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[*?\[\]{}()+^$|\\]").expect("Invalid PATTERN_META regex"));

/// Whether an exclude pattern needs pattern matching rather than an exact name
pub fn has_metachars(pattern: &str) -> bool {
    PATTERN_META.is_match(pattern)
}

/// Simplified ignore rules accumulated from a directory and its ancestors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IgnoreRules {
    exact: Vec<String>,
    fragments: Vec<String>,
}

impl IgnoreRules {
    /// Parse the content of one ignore file
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let rule = line.trim_start_matches('/').trim_end_matches('/');
            // Rules naming a nested path can never equal a single name
            if rule.is_empty() || rule.contains('/') {
                continue;
            }
            if rule.contains('*') {
                rules.fragments.push(rule.replace('*', ""));
            } else {
                rules.exact.push(rule.to_string());
            }
        }
        rules
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.fragments.is_empty()
    }

    /// Combine inherited rules with those of a child directory
    pub fn merged(&self, other: &IgnoreRules) -> IgnoreRules {
        let mut merged = self.clone();
        merged.exact.extend(other.exact.iter().cloned());
        merged.fragments.extend(other.fragments.iter().cloned());
        merged
    }

    pub fn matches(&self, name: &str) -> bool {
        self.exact.iter().any(|rule| rule == name)
            || self.fragments.iter().any(|fragment| name.contains(fragment.as_str()))
    }
}

/// Read the ignore files of `dir` and merge them onto `inherited`
pub async fn load_ignore_rules(dir: &Path, inherited: &Arc<IgnoreRules>) -> Arc<IgnoreRules> {
    let mut local = IgnoreRules::default();
    for file in IGNORE_FILES {
        if let Ok(content) = tokio::fs::read_to_string(dir.join(file)).await {
            local = local.merged(&IgnoreRules::parse(&content));
        }
    }
    if local.is_empty() {
        inherited.clone()
    } else {
        Arc::new(inherited.merged(&local))
    }
}

/// Exclude patterns. Plain names match exactly; anything with a
/// metacharacter is compiled as a glob against the entry name.
#[derive(Debug, Default)]
pub struct ExcludeSet {
    names: HashSet<String>,
    globs: Option<GlobSet>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Self {
        let mut names = HashSet::new();
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;

        for pattern in patterns {
            if !has_metachars(pattern) {
                names.insert(pattern.clone());
                continue;
            }
            match GlobBuilder::new(pattern).literal_separator(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                    has_globs = true;
                }
                Err(e) => warn!(pattern = %pattern, error = %e, "ignoring invalid exclude pattern"),
            }
        }

        let globs = if has_globs {
            match builder.build() {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!(error = %e, "failed to compile exclude patterns");
                    None
                }
            }
        } else {
            None
        };

        Self { names, globs }
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.names.contains(name) {
            return true;
        }
        self.globs.as_ref().is_some_and(|set| set.is_match(name))
    }
}

/// Per-session name filter combining hidden and exclude checks
#[derive(Debug)]
pub struct EntryFilter {
    show_hidden: bool,
    exclude: ExcludeSet,
}

impl EntryFilter {
    pub fn new(options: &ScanOptions) -> Self {
        Self {
            show_hidden: options.show_hidden,
            exclude: ExcludeSet::new(&options.exclude),
        }
    }

    /// Whether an entry named `name` survives the hidden, ignore and exclude filters
    pub fn allows(&self, name: &str, rules: &IgnoreRules) -> bool {
        if !self.show_hidden && is_hidden_name(name) {
            return false;
        }
        if rules.matches(name) {
            return false;
        }
        !self.exclude.matches(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metachar_detection() {
        assert!(!has_metachars("target"));
        assert!(!has_metachars("node_modules"));
        assert!(!has_metachars("file.txt"));
        assert!(has_metachars("*.log"));
        assert!(has_metachars("file?.txt"));
        assert!(has_metachars("[ab].rs"));
        assert!(has_metachars("{a,b}"));
    }

    #[test]
    fn test_exclude_exact_name_is_not_partial() {
        let set = ExcludeSet::new(&["build".to_string()]);
        assert!(set.matches("build"));
        assert!(!set.matches("build.rs"));
        assert!(!set.matches("prebuild"));
    }

    #[test]
    fn test_exclude_glob() {
        let set = ExcludeSet::new(&["*.log".to_string(), "tmp?".to_string()]);
        assert!(set.matches("debug.log"));
        assert!(!set.matches("log.txt"));
        assert!(set.matches("tmp1"));
        assert!(!set.matches("tmp12"));
    }

    #[test]
    fn test_exclude_invalid_glob_is_ignored() {
        let set = ExcludeSet::new(&["[unclosed".to_string(), "keep".to_string()]);
        assert!(set.matches("keep"));
        assert!(!set.matches("[unclosed"));
    }

    #[test]
    fn test_ignore_rules_parse() {
        let rules = IgnoreRules::parse(
            "# comment\n\ntarget/\n/dist\n*.log\n!important.log\nsrc/generated\n",
        );
        assert!(rules.matches("target"));
        assert!(rules.matches("dist"));
        assert!(rules.matches("debug.log"));
        // Substring semantics: negations are not supported
        assert!(rules.matches("important.log"));
        assert!(!rules.matches("generated"));
        assert!(!rules.matches("targets"));
    }

    #[test]
    fn test_ignore_rules_merge() {
        let parent = IgnoreRules::parse("node_modules\n");
        let child = IgnoreRules::parse("*.tmp\n");
        let merged = parent.merged(&child);
        assert!(merged.matches("node_modules"));
        assert!(merged.matches("a.tmp"));
        assert!(!parent.matches("a.tmp"));
    }

    #[test]
    fn test_entry_filter_hidden() {
        let rules = IgnoreRules::default();
        let hide = EntryFilter::new(&ScanOptions::default());
        assert!(!hide.allows(".hidden", &rules));
        assert!(hide.allows("a.txt", &rules));

        let show = EntryFilter::new(&ScanOptions {
            show_hidden: true,
            ..ScanOptions::default()
        });
        assert!(show.allows(".hidden", &rules));
    }

    #[tokio::test]
    async fn test_load_ignore_rules_inherits() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(".gitignore"), "out\n").unwrap();
        std::fs::write(temp.path().join(".ignore"), "*.bak\n").unwrap();

        let inherited = Arc::new(IgnoreRules::parse("vendor\n"));
        let rules = load_ignore_rules(temp.path(), &inherited).await;
        assert!(rules.matches("out"));
        assert!(rules.matches("x.bak"));
        assert!(rules.matches("vendor"));
    }

    #[tokio::test]
    async fn test_load_ignore_rules_without_files_reuses_parent() {
        let temp = tempfile::tempdir().unwrap();
        let inherited = Arc::new(IgnoreRules::parse("vendor\n"));
        let rules = load_ignore_rules(temp.path(), &inherited).await;
        assert!(Arc::ptr_eq(&rules, &inherited));
    }
}
