// src/convert/store.rs

//! Changeset repository produced by a conversion
//!
//! Layout of a destination directory:
//!
//! ```text
//! <dest>/                 working copy of the `default` head
//! <dest>/.hgsvn/
//!     changelog.json      all changesets, in commit order
//!     revmap              "<svn rev> <node> <branch>" per converted commit
//!     tags.json           tag name -> node
//!     authors             merged author map
//!     uuid, url           source repository identity
//!     lastpulled          last converted svn revision
//!     dirstate.json       files written by the last checkout
//!     objects/            file contents (content-addressed)
//! ```

use crate::cas::CasStore;
use crate::fsutil::write_atomic;
use crate::hash::{HashAlgorithm, Hasher};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metadata directory inside the destination
pub const META_DIR: &str = ".hgsvn";

const CHANGELOG_FILE: &str = "changelog.json";
const REVMAP_FILE: &str = "revmap";
const REVMAP_VERSION: &str = "1";
const TAGS_FILE: &str = "tags.json";
const UUID_FILE: &str = "uuid";
const URL_FILE: &str = "url";
const LAST_PULLED_FILE: &str = "lastpulled";
const DIRSTATE_FILE: &str = "dirstate.json";
const OBJECTS_DIR: &str = "objects";

/// Extra key recording where a changeset came from
pub const EXTRA_CONVERT_REVISION: &str = "convert_revision";
/// Extra key marking a closed branch head
pub const EXTRA_CLOSE: &str = "close";

/// Prefix of symlink contents in the svn representation
const SYMLINK_PREFIX: &[u8] = b"link ";

fn is_false(value: &bool) -> bool {
    !*value
}

/// One file in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Content hash in the object store
    pub hash: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub symlink: bool,
}

/// Branch-relative path to file
pub type Manifest = BTreeMap<String, FileEntry>;

/// A changeset about to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangeset {
    pub parents: Vec<String>,
    pub user: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub branch: String,
    pub closes_branch: bool,
    pub files: Vec<String>,
    pub manifest: Manifest,
    pub extra: BTreeMap<String, String>,
}

impl NewChangeset {
    /// Node id: SHA-256 over everything except the touched file list
    pub fn node(&self) -> String {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update_field(&(self.parents.len() as u64).to_le_bytes());
        for parent in &self.parents {
            hasher.update_field(parent.as_bytes());
        }
        hasher.update_field(self.user.as_bytes());
        hasher.update_field(self.date.to_rfc3339().as_bytes());
        hasher.update_field(self.message.as_bytes());
        hasher.update_field(self.branch.as_bytes());
        hasher.update_field(&[u8::from(self.closes_branch)]);
        hasher.update_field(&(self.manifest.len() as u64).to_le_bytes());
        for (path, entry) in &self.manifest {
            hasher.update_field(path.as_bytes());
            hasher.update_field(entry.hash.as_bytes());
            hasher.update_field(&[u8::from(entry.executable), u8::from(entry.symlink)]);
        }
        for (key, value) in &self.extra {
            hasher.update_field(key.as_bytes());
            hasher.update_field(value.as_bytes());
        }
        hasher.finalize_hex()
    }
}

/// A committed changeset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    /// Position in the changelog
    pub rev: usize,
    pub node: String,
    pub parents: Vec<String>,
    pub user: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub closes_branch: bool,
    /// Paths added, modified or removed relative to the first parent
    pub files: Vec<String>,
    pub manifest: Manifest,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Changeset {
    /// Converted author
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Abbreviated node id
    pub fn short_node(&self) -> &str {
        &self.node[..self.node.len().min(12)]
    }

    /// First line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// One revmap line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevMapEntry {
    pub svn_rev: u64,
    pub node: String,
    pub branch: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirState {
    node: Option<String>,
    files: Vec<String>,
}

/// A conversion destination
pub struct Repository {
    root: PathBuf,
    meta: PathBuf,
    objects: CasStore,
    changelog: Vec<Changeset>,
    revmap: Vec<RevMapEntry>,
    tags: BTreeMap<String, String>,
    uuid: Option<String>,
    url: Option<String>,
    last_pulled: Option<u64>,
}

impl Repository {
    /// Open a destination, creating it if needed
    pub fn open_or_init(root: &Path) -> Result<Self> {
        if root.join(META_DIR).is_dir() {
            Self::open(root)
        } else {
            Self::init(root)
        }
    }

    /// Create an empty destination
    pub fn init(root: &Path) -> Result<Self> {
        let meta = root.join(META_DIR);
        if meta.exists() {
            return Err(Error::RepositoryError(format!(
                "{} already exists",
                meta.display()
            )));
        }
        fs::create_dir_all(&meta)?;
        info!("Initialized conversion repository at {}", root.display());

        let repo = Self {
            root: root.to_path_buf(),
            objects: CasStore::new(meta.join(OBJECTS_DIR))?,
            meta,
            changelog: Vec::new(),
            revmap: Vec::new(),
            tags: BTreeMap::new(),
            uuid: None,
            url: None,
            last_pulled: None,
        };
        repo.save()?;
        Ok(repo)
    }

    /// Open an existing destination
    pub fn open(root: &Path) -> Result<Self> {
        let meta = root.join(META_DIR);
        if !meta.is_dir() {
            return Err(Error::NotFoundError(format!(
                "no conversion repository at {}",
                root.display()
            )));
        }

        let changelog: Vec<Changeset> = read_json(&meta.join(CHANGELOG_FILE))?.unwrap_or_default();
        let tags = read_json(&meta.join(TAGS_FILE))?.unwrap_or_default();
        let revmap = match read_text(&meta.join(REVMAP_FILE))? {
            Some(text) => parse_revmap(&text)?,
            None => Vec::new(),
        };
        let last_pulled = read_text(&meta.join(LAST_PULLED_FILE))?
            .map(|text| {
                text.trim().parse::<u64>().map_err(|_| {
                    Error::RepositoryError(format!("corrupt {}: {}", LAST_PULLED_FILE, text.trim()))
                })
            })
            .transpose()?;

        debug!("Opened {} with {} changesets", root.display(), changelog.len());
        Ok(Self {
            root: root.to_path_buf(),
            objects: CasStore::new(meta.join(OBJECTS_DIR))?,
            uuid: read_text(&meta.join(UUID_FILE))?.map(|s| s.trim().to_string()),
            url: read_text(&meta.join(URL_FILE))?.map(|s| s.trim().to_string()),
            meta,
            changelog,
            revmap,
            tags,
            last_pulled,
        })
    }

    /// Destination directory (also the working copy)
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata directory
    pub fn meta_dir(&self) -> &Path {
        &self.meta
    }

    /// Path of a metadata file
    pub fn meta_path(&self, name: &str) -> PathBuf {
        self.meta.join(name)
    }

    /// Number of changesets
    pub fn len(&self) -> usize {
        self.changelog.len()
    }

    /// Whether no changeset was converted yet
    pub fn is_empty(&self) -> bool {
        self.changelog.is_empty()
    }

    /// All changesets in commit order
    pub fn changesets(&self) -> &[Changeset] {
        &self.changelog
    }

    /// Changeset by position
    pub fn get(&self, rev: usize) -> Option<&Changeset> {
        self.changelog.get(rev)
    }

    /// Most recent changeset
    pub fn tip(&self) -> Option<&Changeset> {
        self.changelog.last()
    }

    /// Resolve `tip`, a position, a tag, or a node prefix
    pub fn lookup(&self, spec: &str) -> Result<&Changeset> {
        let found = if spec == "tip" {
            self.tip()
        } else if let Ok(rev) = spec.parse::<usize>() {
            self.get(rev)
        } else if let Some(node) = self.tags.get(spec) {
            self.by_node(node)
        } else {
            let mut matches = self.changelog.iter().filter(|c| c.node.starts_with(spec));
            match (matches.next(), matches.next()) {
                (Some(cs), None) => Some(cs),
                (Some(_), Some(_)) => {
                    return Err(Error::RepositoryError(format!("ambiguous identifier: {}", spec)));
                }
                _ => None,
            }
        };
        found.ok_or_else(|| Error::NotFoundError(format!("unknown revision: {}", spec)))
    }

    /// Changeset with the given node id
    pub fn by_node(&self, node: &str) -> Option<&Changeset> {
        self.changelog.iter().find(|c| c.node == node)
    }

    /// Latest changeset on a branch, closed or not
    pub fn branch_tip(&self, branch: &str) -> Option<&Changeset> {
        self.changelog.iter().rev().find(|c| c.branch == branch)
    }

    /// Open branch heads, by branch name
    pub fn branch_heads(&self) -> BTreeMap<&str, &Changeset> {
        let mut heads = BTreeMap::new();
        for cs in &self.changelog {
            heads.insert(cs.branch.as_str(), cs);
        }
        heads.retain(|_, cs| !cs.closes_branch);
        heads
    }

    /// Append a changeset
    pub fn commit(&mut self, new: NewChangeset) -> Result<&Changeset> {
        for parent in &new.parents {
            if self.by_node(parent).is_none() {
                return Err(Error::RepositoryError(format!("unknown parent {}", parent)));
            }
        }

        let node = new.node();
        let changeset = Changeset {
            rev: self.changelog.len(),
            node,
            parents: new.parents,
            user: new.user,
            date: new.date,
            message: new.message,
            branch: new.branch,
            closes_branch: new.closes_branch,
            files: new.files,
            manifest: new.manifest,
            extra: new.extra,
        };
        debug!(
            "Committed {}:{} on {} by {}",
            changeset.rev,
            changeset.short_node(),
            changeset.branch,
            changeset.user
        );
        self.changelog.push(changeset);
        let rev = self.changelog.len() - 1;
        Ok(&self.changelog[rev])
    }

    /// Record which svn revision a commit converts
    pub fn map_revision(&mut self, svn_rev: u64, branch: &str, node: &str) {
        self.revmap.push(RevMapEntry {
            svn_rev,
            node: node.to_string(),
            branch: branch.to_string(),
        });
    }

    /// Revmap entries in commit order
    pub fn revmap(&self) -> &[RevMapEntry] {
        &self.revmap
    }

    /// Node of the branch as of an svn revision
    pub fn node_at(&self, branch: &str, svn_rev: u64) -> Option<&str> {
        self.revmap
            .iter()
            .rev()
            .find(|e| e.branch == branch && e.svn_rev <= svn_rev)
            .map(|e| e.node.as_str())
    }

    /// Tag name to node
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Create or move a tag
    pub fn set_tag(&mut self, name: &str, node: &str) {
        self.tags.insert(name.to_string(), node.to_string());
    }

    /// Remove a tag
    pub fn remove_tag(&mut self, name: &str) -> bool {
        self.tags.remove(name).is_some()
    }

    /// UUID of the source repository
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn set_uuid(&mut self, uuid: &str) {
        self.uuid = Some(uuid.to_string());
    }

    /// URL last fetched from
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = Some(url.to_string());
    }

    /// Last converted svn revision
    pub fn last_pulled(&self) -> Option<u64> {
        self.last_pulled
    }

    pub fn set_last_pulled(&mut self, rev: u64) {
        self.last_pulled = Some(rev);
    }

    /// Store file contents, returning their hash
    pub fn store_blob(&self, content: &[u8]) -> Result<String> {
        self.objects.store(content)
    }

    /// Read file contents by hash
    pub fn read_blob(&self, hash: &str) -> Result<Vec<u8>> {
        self.objects.retrieve(hash)
    }

    /// Contents of a file in a changeset, as checked out
    pub fn file_data(&self, changeset: &Changeset, path: &str) -> Result<Vec<u8>> {
        let entry = changeset.manifest.get(path).ok_or_else(|| {
            Error::NotFoundError(format!("{} not in changeset {}", path, changeset.rev))
        })?;
        let data = self.read_blob(&entry.hash)?;
        Ok(if entry.symlink {
            data.strip_prefix(SYMLINK_PREFIX).map(<[u8]>::to_vec).unwrap_or(data)
        } else {
            data
        })
    }

    /// Write all metadata atomically, file by file
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.meta.join(CHANGELOG_FILE), &serde_json::to_vec(&self.changelog)?)?;
        write_atomic(&self.meta.join(TAGS_FILE), &serde_json::to_vec_pretty(&self.tags)?)?;

        let mut revmap = format!("{}\n", REVMAP_VERSION);
        for entry in &self.revmap {
            revmap.push_str(&format!("{} {} {}\n", entry.svn_rev, entry.node, entry.branch));
        }
        write_atomic(&self.meta.join(REVMAP_FILE), revmap.as_bytes())?;

        if let Some(uuid) = &self.uuid {
            write_atomic(&self.meta.join(UUID_FILE), format!("{}\n", uuid).as_bytes())?;
        }
        if let Some(url) = &self.url {
            write_atomic(&self.meta.join(URL_FILE), format!("{}\n", url).as_bytes())?;
        }
        if let Some(rev) = self.last_pulled {
            write_atomic(&self.meta.join(LAST_PULLED_FILE), format!("{}\n", rev).as_bytes())?;
        }
        Ok(())
    }

    /// Check out a changeset into the working copy
    ///
    /// Files written by the previous checkout and absent from `changeset`
    /// are removed; nothing else in the directory is touched.
    pub fn checkout(&self, changeset: &Changeset) -> Result<()> {
        let dirstate_path = self.meta.join(DIRSTATE_FILE);
        let previous: DirState = read_json(&dirstate_path)?.unwrap_or_default();

        for stale in previous.files.iter().filter(|f| !changeset.manifest.contains_key(*f)) {
            let path = self.working_path(stale)?;
            if path.symlink_metadata().is_ok() {
                fs::remove_file(&path)?;
            }
            remove_empty_parents(&self.root, &path);
        }

        for (relative, entry) in &changeset.manifest {
            let path = self.working_path(relative)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            if path.symlink_metadata().is_ok() {
                fs::remove_file(&path)?;
            }

            let data = self.file_data(changeset, relative)?;
            if entry.symlink {
                let target = String::from_utf8_lossy(&data).into_owned();
                std::os::unix::fs::symlink(target, &path)?;
            } else {
                use std::os::unix::fs::PermissionsExt;
                fs::write(&path, &data)?;
                let mode = if entry.executable { 0o755 } else { 0o644 };
                fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
            }
        }

        let state = DirState {
            node: Some(changeset.node.clone()),
            files: changeset.manifest.keys().cloned().collect(),
        };
        write_atomic(&dirstate_path, &serde_json::to_vec_pretty(&state)?)?;
        info!(
            "Checked out {}:{} ({} files)",
            changeset.rev,
            changeset.short_node(),
            changeset.manifest.len()
        );
        Ok(())
    }

    /// Node of the changeset in the working copy
    pub fn working_node(&self) -> Result<Option<String>> {
        let state: Option<DirState> = read_json(&self.meta.join(DIRSTATE_FILE))?;
        Ok(state.and_then(|s| s.node))
    }

    fn working_path(&self, relative: &str) -> Result<PathBuf> {
        let escapes = relative
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == ".." || c == META_DIR);
        if escapes {
            return Err(Error::RepositoryError(format!(
                "refusing to check out unsafe path {}",
                relative
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn remove_empty_parents(root: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

fn parse_revmap(text: &str) -> Result<Vec<RevMapEntry>> {
    let mut lines = text.lines();
    match lines.next() {
        Some(REVMAP_VERSION) => {}
        other => {
            return Err(Error::RepositoryError(format!(
                "unsupported revmap version {:?}",
                other
            )));
        }
    }

    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.splitn(3, ' ');
            let (Some(rev), Some(node), Some(branch)) = (fields.next(), fields.next(), fields.next()) else {
                return Err(Error::RepositoryError(format!("corrupt revmap line: {}", line)));
            };
            Ok(RevMapEntry {
                svn_rev: rev
                    .parse()
                    .map_err(|_| Error::RepositoryError(format!("corrupt revmap line: {}", line)))?,
                node: node.to_string(),
                branch: branch.to_string(),
            })
        })
        .collect()
}

fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_text(path)? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_changeset(repo: &Repository, parents: Vec<String>, files: &[(&str, &[u8])]) -> NewChangeset {
        let manifest = files
            .iter()
            .map(|(path, data)| {
                (
                    path.to_string(),
                    FileEntry {
                        hash: repo.store_blob(data).unwrap(),
                        executable: false,
                        symlink: false,
                    },
                )
            })
            .collect();
        NewChangeset {
            parents,
            user: "Augie Fackler <durin42@gmail.com>".to_string(),
            date: DateTime::<Utc>::UNIX_EPOCH,
            message: "commit".to_string(),
            branch: "default".to_string(),
            closes_branch: false,
            files: files.iter().map(|(p, _)| p.to_string()).collect(),
            manifest,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_commit_save_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let mut repo = Repository::init(temp_dir.path()).unwrap();
        repo.set_uuid("uuid-1");

        let first = new_changeset(&repo, vec![], &[("a", b"a\n")]);
        let node = repo.commit(first).unwrap().node.clone();
        repo.map_revision(1, "default", &node);
        repo.set_tag("1.0", &node);
        repo.set_last_pulled(1);
        repo.save().unwrap();

        let reopened = Repository::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.uuid(), Some("uuid-1"));
        assert_eq!(reopened.last_pulled(), Some(1));
        assert_eq!(reopened.node_at("default", 5), Some(node.as_str()));
        assert_eq!(reopened.node_at("default", 0), None);
        assert_eq!(reopened.lookup("tip").unwrap().node, node);
        assert_eq!(reopened.lookup("0").unwrap().node, node);
        assert_eq!(reopened.lookup("1.0").unwrap().node, node);
        assert_eq!(reopened.lookup(&node[..8]).unwrap().rev, 0);
        assert!(reopened.lookup("7").is_err());
    }

    #[test]
    fn test_node_depends_on_content_not_file_list() {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();

        let a = new_changeset(&repo, vec![], &[("a", b"a\n")]);
        let mut b = a.clone();
        b.files.clear();
        assert_eq!(a.node(), b.node());

        b.user = "someone else".to_string();
        assert_ne!(a.node(), b.node());
    }

    #[test]
    fn test_commit_rejects_unknown_parent() {
        let temp_dir = TempDir::new().unwrap();
        let mut repo = Repository::init(temp_dir.path()).unwrap();
        let orphan = new_changeset(&repo, vec!["deadbeef".to_string()], &[]);
        assert!(matches!(repo.commit(orphan), Err(Error::RepositoryError(_))));
    }

    #[test]
    fn test_branch_heads_skip_closed() {
        let temp_dir = TempDir::new().unwrap();
        let mut repo = Repository::init(temp_dir.path()).unwrap();

        let root = new_changeset(&repo, vec![], &[("a", b"a\n")]);
        let root_node = repo.commit(root).unwrap().node.clone();

        let mut branch = new_changeset(&repo, vec![root_node.clone()], &[("a", b"b\n")]);
        branch.branch = "test".to_string();
        let branch_node = repo.commit(branch.clone()).unwrap().node.clone();

        let mut close = branch;
        close.parents = vec![branch_node];
        close.closes_branch = true;
        repo.commit(close).unwrap();

        let heads = repo.branch_heads();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads["default"].node, root_node);
        assert!(repo.branch_tip("test").unwrap().closes_branch);
    }

    #[test]
    fn test_checkout_replaces_previous_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut repo = Repository::init(temp_dir.path()).unwrap();

        let first = new_changeset(&repo, vec![], &[("dir/a", b"a\n"), ("b", b"b\n")]);
        let first = repo.commit(first).unwrap().clone();
        repo.checkout(&first).unwrap();
        assert_eq!(fs::read(temp_dir.path().join("dir/a")).unwrap(), b"a\n");

        let mut second = new_changeset(&repo, vec![first.node.clone()], &[("b", b"link a")]);
        second.manifest.get_mut("b").unwrap().symlink = true;
        let second = repo.commit(second).unwrap().clone();
        repo.checkout(&second).unwrap();

        assert!(!temp_dir.path().join("dir").exists());
        assert_eq!(
            fs::read_link(temp_dir.path().join("b")).unwrap(),
            PathBuf::from("a")
        );
        assert_eq!(repo.working_node().unwrap(), Some(second.node));
    }
}
