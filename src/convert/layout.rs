// src/convert/layout.rs

//! Standard Subversion layout: `trunk`, `branches/<name>`, `tags/<name>`

use std::fmt;

/// Branch name given to trunk
pub const DEFAULT_BRANCH: &str = "default";

const TRUNK: &str = "trunk";
const BRANCHES: &str = "branches";
const TAGS: &str = "tags";

/// A branch or tag root in the repository
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Location {
    /// `trunk`
    Trunk,
    /// `branches/<name>`
    Branch(String),
    /// `tags/<name>`
    Tag(String),
}

impl Location {
    /// Repository path of the root directory
    pub fn root(&self) -> String {
        match self {
            Location::Trunk => TRUNK.to_string(),
            Location::Branch(name) => format!("{}/{}", BRANCHES, name),
            Location::Tag(name) => format!("{}/{}", TAGS, name),
        }
    }

    /// Branch name before branch-map renames; `None` for tags
    pub fn branch_name(&self) -> Option<&str> {
        match self {
            Location::Trunk => Some(DEFAULT_BRANCH),
            Location::Branch(name) => Some(name),
            Location::Tag(_) => None,
        }
    }

    /// Whether `path` lies at or under this root
    pub fn contains(&self, path: &str) -> bool {
        relative_to(&self.root(), path).is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root())
    }
}

/// Split a repository path into its root and the path below it
///
/// Returns `None` for paths outside the layout and for the `branches` and
/// `tags` container directories themselves.
pub fn split_path(path: &str) -> Option<(Location, &str)> {
    let path = path.trim_matches('/');
    let mut parts = path.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(TRUNK), None, _) => Some((Location::Trunk, "")),
        (Some(TRUNK), Some(_), _) => {
            relative_to(TRUNK, path).map(|rest| (Location::Trunk, rest))
        }
        (Some(BRANCHES), Some(name), rest) if !name.is_empty() => {
            Some((Location::Branch(name.to_string()), rest.unwrap_or("")))
        }
        (Some(TAGS), Some(name), rest) if !name.is_empty() => {
            Some((Location::Tag(name.to_string()), rest.unwrap_or("")))
        }
        _ => None,
    }
}

/// `path` relative to `root`, if it lies at or under it
pub fn relative_to<'a>(root: &str, path: &'a str) -> Option<&'a str> {
    if path == root {
        return Some("");
    }
    path.strip_prefix(root)?.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("trunk"), Some((Location::Trunk, "")));
        assert_eq!(split_path("trunk/a/b"), Some((Location::Trunk, "a/b")));
        assert_eq!(
            split_path("branches/test/b"),
            Some((Location::Branch("test".to_string()), "b"))
        );
        assert_eq!(
            split_path("/tags/1.0"),
            Some((Location::Tag("1.0".to_string()), ""))
        );
        assert_eq!(split_path("branches"), None);
        assert_eq!(split_path("tags"), None);
        assert_eq!(split_path("vendor/x"), None);
        assert_eq!(split_path("trunkish/a"), None);
    }

    #[test]
    fn test_location_names() {
        assert_eq!(Location::Trunk.branch_name(), Some("default"));
        assert_eq!(Location::Branch("test".into()).root(), "branches/test");
        assert_eq!(Location::Tag("v1".into()).branch_name(), None);
        assert!(Location::Trunk.contains("trunk/a"));
        assert!(!Location::Trunk.contains("trunkish"));
    }
}
