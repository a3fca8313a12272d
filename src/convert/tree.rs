// src/convert/tree.rs

//! Versioned tree state rebuilt from dump node records

use super::dump::{Node, NodeAction, NodeKind, PROP_EXECUTABLE, PROP_SPECIAL, Props};
use super::layout;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::ops::Bound;

/// A file as svn stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// Hash of the svn representation (symlinks as `link <target>`)
    pub hash: String,
    pub executable: bool,
    pub symlink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    Dir,
    File(FileState),
}

/// Every path in the repository at one revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SvnTree {
    entries: BTreeMap<String, TreeEntry>,
}

impl SvnTree {
    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// `path` itself and everything below it
    pub fn subtree<'a>(&'a self, path: &'a str) -> impl Iterator<Item = (&'a str, &'a TreeEntry)> + 'a {
        let start = if path.is_empty() { Bound::Unbounded } else { Bound::Included(path.to_string()) };
        self.entries
            .range((start, Bound::Unbounded))
            .take_while(move |(p, _)| p.starts_with(path))
            // Skip siblings sharing the prefix, e.g. "trunkish" under "trunk"
            .filter(move |(p, _)| path.is_empty() || p.len() == path.len() || p[path.len()..].starts_with('/'))
            .map(|(p, e)| (p.as_str(), e))
    }

    /// Files at or below `path`
    pub fn files_under<'a>(&'a self, path: &'a str) -> impl Iterator<Item = (&'a str, &'a FileState)> + 'a {
        self.subtree(path).filter_map(|(p, e)| match e {
            TreeEntry::File(f) => Some((p, f)),
            TreeEntry::Dir => None,
        })
    }

    fn remove_subtree(&mut self, path: &str) {
        let doomed: Vec<String> = self.subtree(path).map(|(p, _)| p.to_string()).collect();
        for p in doomed {
            self.entries.remove(&p);
        }
    }

    /// Apply one node record
    ///
    /// `history` resolves copy sources; `store` persists file texts and
    /// returns their hash.
    pub fn apply<'h, H, S>(&mut self, node: &Node, history: H, mut store: S) -> Result<()>
    where
        H: Fn(u64) -> Option<&'h SvnTree>,
        S: FnMut(&[u8]) -> Result<String>,
    {
        let path = node.path.as_str();
        match node.action {
            NodeAction::Delete => {
                if !self.contains(path) {
                    return Err(Error::ConversionError(format!("delete of missing path {}", path)));
                }
                self.remove_subtree(path);
                return Ok(());
            }
            NodeAction::Replace => self.remove_subtree(path),
            NodeAction::Add | NodeAction::Change => {}
        }

        if let Some(source) = &node.copy_from {
            let source_tree = history(source.rev).ok_or_else(|| {
                Error::ConversionError(format!("{}: copy source r{} unknown", path, source.rev))
            })?;
            let copied: Vec<(String, TreeEntry)> = source_tree
                .subtree(&source.path)
                .filter_map(|(p, e)| {
                    let relative = if source.path.is_empty() { p } else { layout::relative_to(&source.path, p)? };
                    let target = if relative.is_empty() { path.to_string() } else { format!("{}/{}", path, relative) };
                    Some((target, e.clone()))
                })
                .collect();
            if copied.is_empty() {
                return Err(Error::ConversionError(format!(
                    "{}: copy source {}@{} does not exist",
                    path, source.path, source.rev
                )));
            }
            self.entries.extend(copied);
        }

        let kind = match (node.kind, self.get(path)) {
            (Some(kind), _) => kind,
            (None, Some(TreeEntry::Dir)) => NodeKind::Dir,
            (None, Some(TreeEntry::File(_))) => NodeKind::File,
            (None, None) => {
                return Err(Error::ConversionError(format!("{}: node kind unknown", path)));
            }
        };

        match kind {
            NodeKind::Dir => {
                self.entries.entry(node.path.clone()).or_insert(TreeEntry::Dir);
            }
            NodeKind::File => {
                let mut state = match self.get(path) {
                    Some(TreeEntry::File(existing)) => existing.clone(),
                    _ => FileState {
                        hash: store(b"")?,
                        executable: false,
                        symlink: false,
                    },
                };
                if let Some(text) = &node.text {
                    state.hash = store(text)?;
                }
                apply_props(&mut state, node);
                self.entries.insert(node.path.clone(), TreeEntry::File(state));
            }
        }
        Ok(())
    }
}

fn apply_props(state: &mut FileState, node: &Node) {
    let Some(props) = &node.props else {
        return;
    };
    let flag = |props: &Props, name: &str, current: bool| {
        if props.contains_key(name) {
            true
        } else if node.prop_delta {
            current && !node.deleted_props.iter().any(|d| d == name)
        } else {
            false
        }
    };
    state.executable = flag(props, PROP_EXECUTABLE, state.executable);
    state.symlink = flag(props, PROP_SPECIAL, state.symlink);
}
