// src/convert/maps.rs

//! Author, file and branch maps
//!
//! All three are plain text files edited by users:
//!
//! ```text
//! # authors: svn identity = converted identity
//! Augie=Augie Fackler <durin42@gmail.com>
//!
//! # filemap: include/exclude branch-relative paths
//! include src
//! exclude src/generated
//!
//! # branchmap: svn branch = converted branch (empty drops the branch)
//! feature-x=feature
//! scratch=
//! ```

use crate::fsutil::write_atomic;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Identity used for revisions without an author
pub const NO_AUTHOR: &str = "(no author)";

/// Parse `key=value` lines, calling `insert` for each entry
fn parse_assignments(content: &str, source: &str, mut insert: impl FnMut(&str, &str)) {
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => insert(key.trim(), value.trim()),
            None => warn!("{}:{}: ignoring line without '=': {}", source, lineno + 1, line),
        }
    }
}

/// Source identity to converted identity
#[derive(Debug, Clone, Default)]
pub struct AuthorMap {
    entries: BTreeMap<String, String>,
    default_host: Option<String>,
    use_defaults: bool,
    case_insensitive: bool,
}

impl AuthorMap {
    /// Empty map; unmapped identities get `@<uuid>` appended
    pub fn new(source_uuid: Option<&str>) -> Self {
        Self {
            entries: BTreeMap::new(),
            default_host: source_uuid.filter(|u| !u.is_empty()).map(|u| format!("@{}", u)),
            use_defaults: true,
            case_insensitive: false,
        }
    }

    /// Whether unmapped identities are converted (`true`) or rejected
    pub fn use_defaults(mut self, use_defaults: bool) -> Self {
        self.use_defaults = use_defaults;
        self
    }

    /// Match identities ignoring case
    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Number of explicit entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no explicit entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(&self, author: &str) -> String {
        if self.case_insensitive {
            author.to_lowercase()
        } else {
            author.to_string()
        }
    }

    /// Add or override an entry
    pub fn insert(&mut self, author: &str, converted: &str) {
        let key = self.key(author);
        match self.entries.get(&key) {
            Some(old) if old == converted => {}
            Some(old) => {
                info!("overriding author {}: \"{}\" to \"{}\"", author, old, converted);
                self.entries.insert(key, converted.to_string());
            }
            None => {
                self.entries.insert(key, converted.to_string());
            }
        }
    }

    /// Merge entries from text
    pub fn parse_str(&mut self, content: &str, source: &str) {
        let mut parsed = Vec::new();
        parse_assignments(content, source, |k, v| parsed.push((k.to_string(), v.to_string())));
        for (author, converted) in parsed {
            self.insert(&author, &converted);
        }
    }

    /// Merge entries from a file
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read author map {}: {}", path.display(), e))
        })?;
        let before = self.len();
        self.parse_str(&content, &path.display().to_string());
        debug!("Read {} author entries from {}", self.len() - before, path.display());
        Ok(())
    }

    /// Write the explicit entries
    pub fn save(&self, path: &Path) -> Result<()> {
        let content: String = self
            .entries
            .iter()
            .map(|(author, converted)| format!("{}={}\n", author, converted))
            .collect();
        write_atomic(path, content.as_bytes())
    }

    /// Converted identity for a revision author
    pub fn lookup(&self, author: Option<&str>) -> Result<String> {
        let author = author.filter(|a| !a.is_empty()).unwrap_or(NO_AUTHOR);

        if let Some(converted) = self.entries.get(&self.key(author)) {
            return Ok(converted.clone());
        }
        if !self.use_defaults {
            return Err(Error::ConversionError(format!(
                "author {} has no entry in the author map",
                author
            )));
        }

        let converted = format!("{}{}", author, self.default_host.as_deref().unwrap_or(""));
        debug!("substituting author \"{}\" for default \"{}\"", author, converted);
        Ok(converted)
    }
}

/// Path filter over branch-relative paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMap {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FileMap {
    /// Parse `include <path>` / `exclude <path>` lines
    pub fn parse_str(content: &str, source: &str) -> Result<Self> {
        let mut map = Self::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (directive, path) = line.split_once(char::is_whitespace).ok_or_else(|| {
                Error::ParseError(format!("{}:{}: expected '<directive> <path>'", source, lineno + 1))
            })?;
            let path = normalize(path.trim());
            match directive {
                "include" => map.include.push(path),
                "exclude" => map.exclude.push(path),
                other => {
                    return Err(Error::ParseError(format!(
                        "{}:{}: unknown filemap directive {}",
                        source,
                        lineno + 1,
                        other
                    )));
                }
            }
        }
        Ok(map)
    }

    /// Read a file map from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read file map {}: {}", path.display(), e))
        })?;
        Self::parse_str(&content, &path.display().to_string())
    }

    /// Whether a branch-relative path is converted
    ///
    /// The longest matching rule wins and exclusion wins ties. Without
    /// include rules everything not excluded is included.
    pub fn contains(&self, path: &str) -> bool {
        let included = if self.include.is_empty() {
            Some(0)
        } else {
            longest_match(&self.include, path)
        };
        let Some(included) = included else {
            return false;
        };
        match longest_match(&self.exclude, path) {
            Some(excluded) => included > excluded,
            None => true,
        }
    }
}

fn normalize(path: &str) -> String {
    let path = path.trim_matches('/');
    if path == "." { String::new() } else { path.to_string() }
}

/// Length of the longest rule that is `path` or a directory above it
fn longest_match(rules: &[String], path: &str) -> Option<usize> {
    rules
        .iter()
        .filter(|rule| {
            rule.is_empty()
                || path == rule.as_str()
                || path
                    .strip_prefix(rule.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        // +1 so the empty rule still outranks "no match" in comparisons
        .map(|rule| rule.len() + 1)
        .max()
}

/// Branch renames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchMap {
    entries: BTreeMap<String, String>,
}

impl BranchMap {
    /// Parse `svn-branch=converted-branch` lines
    pub fn parse_str(content: &str, source: &str) -> Self {
        let mut entries = BTreeMap::new();
        parse_assignments(content, source, |k, v| {
            entries.insert(k.to_string(), v.to_string());
        });
        Self { entries }
    }

    /// Read a branch map from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read branch map {}: {}", path.display(), e))
        })?;
        Ok(Self::parse_str(&content, &path.display().to_string()))
    }

    /// Converted branch name, or `None` when the branch is dropped
    pub fn map<'a>(&'a self, branch: &'a str) -> Option<&'a str> {
        match self.entries.get(branch) {
            Some(target) if target.is_empty() => None,
            Some(target) => Some(target.as_str()),
            None => Some(branch),
        }
    }
}
