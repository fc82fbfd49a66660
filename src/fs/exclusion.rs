//! Exclusion rules
//!
//! Rules are plain strings. During the scan they are tested cheaply: a path
//! is excluded when any rule is a substring of it, or when one of the
//! wildcard rules matches it as a glob. During the copy pass the set makes a
//! precise per-directory decision over the child names of a listing:
//!
//! - subtree: the directory is the rule, or lies beneath it
//! - glob-at-path: the rule has wildcards and its parent matches the directory
//! - sibling-file: the rule's parent is the directory
//!
//! In the last two modes the rule's final segment is matched against each
//! child name as a filename glob. A rule without any directory component is
//! a filename glob applied in every directory.
//!
//! Paths discovered during the scan (hardlink siblings, junctions) are kept
//! apart from user rules. They are path rules: they cover exactly that path
//! and everything beneath it, compared on component boundaries.

use crate::error::{ReplicaError, Result};
use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Ordered, append-mostly collection of exclusion rules
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    rules: Vec<String>,
    discovered: Vec<String>,
    /// Wildcard rules compiled for whole-path matching during the scan
    wildcards: Option<GlobSet>,
}

impl ExclusionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from an initial rule list
    pub fn from_rules<I, S>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for rule in rules {
            set.rules.push(rule.into());
        }
        set.rebuild()?;
        Ok(set)
    }

    fn rebuild(&mut self) -> Result<()> {
        let mut builder = GlobSetBuilder::new();
        let mut any = false;
        for rule in self.rules.iter().filter(|r| has_wildcard(r)) {
            let glob = Glob::new(rule)
                .map_err(|e| ReplicaError::ConfigError(format!("Invalid exclude pattern '{}': {}", rule, e)))?;
            builder.add(glob);
            any = true;
        }
        self.wildcards = if any {
            Some(builder.build().map_err(|e| ReplicaError::ConfigError(e.to_string()))?)
        } else {
            None
        };
        Ok(())
    }

    /// Append a path discovered during the scan
    ///
    /// Hardlink siblings and junction paths land here. The path and
    /// everything beneath it are excluded; nothing else is.
    pub fn push(&mut self, path: impl Into<String>) {
        self.discovered.push(path.into());
    }

    /// Remove the first occurrence of `rule`; returns whether one was found
    ///
    /// Discovered paths are searched before user rules.
    pub fn remove(&mut self, rule: &str) -> bool {
        for list in [&mut self.discovered, &mut self.rules] {
            if let Some(idx) = list.iter().position(|r| r == rule) {
                list.remove(idx);
                return true;
            }
        }
        false
    }

    /// User rules in insertion order
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Paths discovered during the scan, in insertion order
    pub fn discovered(&self) -> &[String] {
        &self.discovered
    }

    /// User rules followed by discovered paths
    pub fn all_rules(&self) -> Vec<String> {
        self.rules.iter().chain(&self.discovered).cloned().collect()
    }

    /// Number of rules of either kind
    pub fn len(&self) -> usize {
        self.rules.len() + self.discovered.len()
    }

    /// Whether there are no rules of either kind
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.discovered.is_empty()
    }

    /// Cheap scan-time test: substring containment of a user rule
    pub fn contains_substring(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| !rule.is_empty() && path.contains(rule.as_str()))
    }

    /// Whether `path` is a discovered path or lies beneath one
    pub fn covers_path(&self, path: &Path) -> bool {
        self.discovered
            .iter()
            .any(|rule| !rule.is_empty() && path.starts_with(Path::new(rule)))
    }

    /// Scan-time test combining substring, discovered and wildcard rules
    pub fn is_excluded(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        if self.contains_substring(&text) || self.covers_path(path) {
            return true;
        }
        if let Some(wildcards) = &self.wildcards {
            if wildcards.is_match(path) {
                return true;
            }
            if let Some(name) = path.file_name() {
                return self
                    .rules
                    .iter()
                    .filter(|r| is_bare_name(r) && has_wildcard(r))
                    .any(|r| name_matches(r, &name.to_string_lossy()));
            }
        }
        false
    }

    /// Copy-time decision: the subset of `names` in `dir` to skip
    pub fn ignored_names<'a, I>(&self, dir: &Path, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = names.into_iter().collect();
        let mut ignored = BTreeSet::new();

        for rule in self.discovered.iter().filter(|r| !r.is_empty()) {
            let rule_path = Path::new(rule);
            if dir.starts_with(rule_path) {
                ignored.extend(names.iter().map(|n| n.to_string()));
                continue;
            }
            if rule_path.parent() == Some(dir) {
                if let Some(last) = rule_path.file_name() {
                    let last = last.to_string_lossy();
                    ignored.extend(names.iter().filter(|n| **n == last).map(|n| n.to_string()));
                }
            }
        }

        for rule in &self.rules {
            if rule.is_empty() {
                continue;
            }

            if is_bare_name(rule) {
                ignored.extend(names.iter().filter(|n| name_matches(rule, n)).map(|n| n.to_string()));
                continue;
            }

            let rule_path = PathBuf::from(rule);

            // subtree
            if dir.starts_with(&rule_path) {
                ignored.extend(names.iter().map(|n| n.to_string()));
                continue;
            }

            let (parent, last) = match (rule_path.parent(), rule_path.file_name()) {
                (Some(parent), Some(last)) => (parent, last.to_string_lossy()),
                _ => continue,
            };

            let at_dir = if has_wildcard(&parent.to_string_lossy()) {
                path_glob(&parent.to_string_lossy())
                    .map(|m| m.is_match(dir))
                    .unwrap_or(false)
            } else {
                parent == dir
            };

            if at_dir {
                ignored.extend(names.iter().filter(|n| name_matches(&last, n)).map(|n| n.to_string()));
            }
        }

        ignored
    }
}

/// Whether `rule` contains glob metacharacters
pub fn has_wildcard(rule: &str) -> bool {
    rule.contains(['*', '?', '['])
}

fn is_bare_name(rule: &str) -> bool {
    !rule.contains(['/', '\\'])
}

fn path_glob(pattern: &str) -> Option<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .ok()
        .map(|g| g.compile_matcher())
}

fn name_matches(pattern: &str, name: &str) -> bool {
    if !has_wildcard(pattern) {
        return pattern == name;
    }
    Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_substring_match() {
        let set = ExclusionSet::from_rules(["sys"]).unwrap();
        assert!(set.contains_substring("/src/sys"));
        assert!(set.contains_substring("/src/sys/deep/file"));
        assert!(!set.contains_substring("/src/a.txt"));
    }

    #[test]
    fn test_wildcard_rules_at_scan_time() {
        let set = ExclusionSet::from_rules(["/src/logs/*.tmp", "*.bak"]).unwrap();
        assert!(set.is_excluded(Path::new("/src/logs/a.tmp")));
        assert!(set.is_excluded(Path::new("/src/deep/x.bak")));
        assert!(!set.is_excluded(Path::new("/src/logs/a.txt")));
    }

    #[test]
    fn test_push_and_remove_first_occurrence() {
        let mut set = ExclusionSet::new();
        set.push("/a");
        set.push("/b");
        set.push("/a");
        assert!(set.remove("/a"));
        assert_eq!(set.discovered(), &["/b".to_string(), "/a".to_string()]);
        assert!(set.rules().is_empty());
        assert!(!set.remove("/missing"));
    }

    #[test]
    fn test_discovered_paths_match_whole_components() {
        let mut set = ExclusionSet::new();
        set.push("/src/b.txt");
        set.push("/src/j");

        assert!(set.is_excluded(Path::new("/src/b.txt")));
        assert!(set.is_excluded(Path::new("/src/j/inner/file")));
        assert!(!set.is_excluded(Path::new("/src/b.txt.bak")));
        assert!(!set.is_excluded(Path::new("/src/b.txtdir/keep")));
        assert!(!set.is_excluded(Path::new("/src/jobs")));

        let ignored = set.ignored_names(Path::new("/src"), ["b.txt", "b.txt.bak", "b.txtdir", "j", "jobs"]);
        assert_eq!(
            ignored.into_iter().collect::<Vec<_>>(),
            vec!["b.txt".to_string(), "j".to_string()]
        );
        assert!(set.ignored_names(Path::new("/src/b.txtdir"), ["keep"]).is_empty());
        assert_eq!(set.ignored_names(Path::new("/src/j/inner"), ["x"]).len(), 1);
    }

    #[test]
    fn test_all_rules_lists_user_rules_first() {
        let mut set = ExclusionSet::from_rules(["*.tmp"]).unwrap();
        set.push("/src/b.txt");
        assert_eq!(set.all_rules(), vec!["*.tmp".to_string(), "/src/b.txt".to_string()]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_subtree_excludes_everything() {
        let set = ExclusionSet::from_rules(["/src/cache"]).unwrap();
        let ignored = set.ignored_names(Path::new("/src/cache/inner"), ["x", "y"]);
        assert_eq!(ignored.len(), 2);
    }

    #[test]
    fn test_sibling_file_rule() {
        let set = ExclusionSet::from_rules(["/src/pagefile.sys"]).unwrap();
        let ignored = set.ignored_names(Path::new("/src"), ["pagefile.sys", "keep.txt"]);
        assert!(ignored.contains("pagefile.sys"));
        assert!(!ignored.contains("keep.txt"));

        let elsewhere = set.ignored_names(Path::new("/src/other"), ["pagefile.sys"]);
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn test_glob_at_path_rule() {
        let set = ExclusionSet::from_rules(["/src/*/build/*.o"]).unwrap();
        let ignored = set.ignored_names(Path::new("/src/proj/build"), ["main.o", "main.c"]);
        assert!(ignored.contains("main.o"));
        assert!(!ignored.contains("main.c"));

        let nested = set.ignored_names(Path::new("/src/a/b/build"), ["main.o"]);
        assert!(nested.is_empty());
    }

    #[test]
    fn test_bare_glob_applies_everywhere() {
        let set = ExclusionSet::from_rules(["*.sys"]).unwrap();
        let ignored = set.ignored_names(Path::new("/any/dir"), ["hiberfil.sys", "a.txt"]);
        assert_eq!(ignored.into_iter().collect::<Vec<_>>(), vec!["hiberfil.sys".to_string()]);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(ExclusionSet::from_rules(["/src/[bad"]).is_err());
    }

    proptest! {
        #[test]
        fn prop_subtree_rule_ignores_all_names(
            segs in proptest::collection::vec("[a-z]{1,6}", 1..4),
            names in proptest::collection::vec("[a-z]{1,8}", 0..6),
        ) {
            let rule = format!("/root/{}", segs.join("/"));
            let set = ExclusionSet::from_rules([rule.clone()]).unwrap();
            let dir = PathBuf::from(&rule).join("child");
            let ignored = set.ignored_names(&dir, names.iter().map(|s| s.as_str()));
            for name in &names {
                prop_assert!(ignored.contains(name));
            }
        }
    }
}
