// src/convert/fetch.rs

//! Revision conversion
//!
//! Every run replays the whole dump to rebuild tree state, and commits
//! changesets only for revisions newer than the last converted one. Each
//! revision becomes one changeset per touched branch:
//!
//! - replay mode derives the new manifest by applying the paths touched by
//!   the revision's node records to the parent manifest
//! - stupid mode takes a full snapshot of the branch and ignores the node
//!   records beyond knowing which branches they touch
//!
//! In both modes the touched file list is the difference between the new
//! manifest and the parent's, so the two modes produce identical nodes.

use super::dump::{CopySource, DumpFile, NodeAction, Revision};
use super::layout::{self, DEFAULT_BRANCH, Location};
use super::maps::{AuthorMap, BranchMap, FileMap};
use super::store::{
    EXTRA_CLOSE, EXTRA_CONVERT_REVISION, FileEntry, Manifest, NewChangeset, Repository,
};
use super::tree::{SvnTree, TreeEntry};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

/// Dump file looked up when the source URL names a directory
pub const DUMP_FILE_NAME: &str = "repository.svndump";

/// Author map saved in the destination
pub const AUTHORS_FILE: &str = "authors";

/// Options for [`fetch_revisions`]
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// `file://` URL of a dump file, or of a directory holding `repository.svndump`
    pub url: String,
    /// Destination repository
    pub dest: PathBuf,
    /// Rebuild branches from full snapshots
    pub stupid: bool,
    /// Author map to merge into the destination's
    pub authors: Option<PathBuf>,
    pub filemap: Option<PathBuf>,
    pub branchmap: Option<PathBuf>,
    /// Convert unmapped authors to `author@uuid` instead of failing
    pub default_authors: bool,
    pub case_insensitive_authors: bool,
    /// Check out the `default` head afterwards
    pub update_working_copy: bool,
}

impl FetchOptions {
    pub fn new<U: Into<String>, P: Into<PathBuf>>(url: U, dest: P) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            stupid: false,
            authors: None,
            filemap: None,
            branchmap: None,
            default_authors: true,
            case_insensitive_authors: false,
            update_working_copy: true,
        }
    }

    pub fn stupid(mut self, stupid: bool) -> Self {
        self.stupid = stupid;
        self
    }

    pub fn authors<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.authors = Some(path.into());
        self
    }

    pub fn filemap<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.filemap = Some(path.into());
        self
    }

    pub fn branchmap<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.branchmap = Some(path.into());
        self
    }

    pub fn default_authors(mut self, enabled: bool) -> Self {
        self.default_authors = enabled;
        self
    }

    pub fn case_insensitive_authors(mut self, enabled: bool) -> Self {
        self.case_insensitive_authors = enabled;
        self
    }

    pub fn update_working_copy(mut self, enabled: bool) -> Self {
        self.update_working_copy = enabled;
        self
    }
}

/// Result of a fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// svn revisions converted in this run
    pub revisions: usize,
    /// Changesets created in this run
    pub changesets: usize,
    /// Last converted svn revision
    pub last_revision: Option<u64>,
    /// Node checked out into the working copy
    pub checked_out: Option<String>,
}

/// Convert new revisions from `options.url` into `options.dest`
pub fn fetch_revisions(options: &FetchOptions) -> Result<FetchSummary> {
    let dump_path = resolve_source(&options.url)?;
    let dump = DumpFile::open(&dump_path)?;
    let uuid = dump.uuid.clone().unwrap_or_default();

    let mut repo = Repository::open_or_init(&options.dest)?;
    if let Some(existing) = repo.uuid()
        && !uuid.is_empty()
        && existing != uuid
    {
        return Err(Error::RepositoryError(format!(
            "{} was converted from repository {}, not {}",
            options.dest.display(),
            existing,
            uuid
        )));
    }
    if !uuid.is_empty() {
        repo.set_uuid(&uuid);
    }
    repo.set_url(&options.url);

    let authors = load_authors(options, &repo, &uuid)?;
    let filemap = match &options.filemap {
        Some(path) => FileMap::load(path)?,
        None => FileMap::default(),
    };
    let branchmap = match &options.branchmap {
        Some(path) => BranchMap::load(path)?,
        None => BranchMap::default(),
    };

    let converter = Converter {
        authors,
        filemap,
        branchmap,
        stupid: options.stupid,
        uuid,
    };

    let initial_len = repo.len();
    let mut summary = FetchSummary::default();
    let result = converter.run(&mut repo, &dump, &mut summary);
    // Keep whatever was converted before a failure
    repo.save()?;
    result?;

    summary.changesets = repo.len() - initial_len;
    summary.last_revision = repo.last_pulled();
    info!(
        "Converted {} revisions into {} changesets",
        summary.revisions, summary.changesets
    );

    if options.update_working_copy {
        let head = repo.branch_heads().get(DEFAULT_BRANCH).map(|cs| (*cs).clone());
        if let Some(head) = head {
            if repo.working_node()?.as_deref() != Some(head.node.as_str()) {
                repo.checkout(&head)?;
            }
            summary.checked_out = Some(head.node);
        }
    }

    Ok(summary)
}

/// Dump file named by a source URL
pub fn resolve_source(url: &str) -> Result<PathBuf> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::ConversionError(format!("invalid source URL {}: {}", url, e)))?;
    if parsed.scheme() != "file" {
        return Err(Error::ConversionError(format!(
            "unsupported source URL scheme {}; only file:// dumps can be read",
            parsed.scheme()
        )));
    }
    let path = parsed
        .to_file_path()
        .map_err(|_| Error::ConversionError(format!("source URL is not a local path: {}", url)))?;

    let path = if path.is_dir() { path.join(DUMP_FILE_NAME) } else { path };
    if !path.is_file() {
        return Err(Error::NotFoundError(format!("no dump at {}", path.display())));
    }
    Ok(path)
}

fn load_authors(options: &FetchOptions, repo: &Repository, uuid: &str) -> Result<AuthorMap> {
    let mut authors = AuthorMap::new(Some(uuid))
        .use_defaults(options.default_authors)
        .case_insensitive(options.case_insensitive_authors);

    let saved = repo.meta_path(AUTHORS_FILE);
    if saved.is_file() {
        authors.load(&saved)?;
    }
    if let Some(path) = &options.authors {
        authors.load(path)?;
    }
    if !authors.is_empty() {
        authors.save(&saved)?;
    }
    Ok(authors)
}

fn parse_date(date: Option<&str>) -> Result<DateTime<Utc>> {
    match date {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| Error::ParseError(format!("invalid svn:date {}: {}", text, e))),
        None => Ok(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// What one revision did to one branch or tag root
#[derive(Debug, Default)]
struct Touched {
    /// Repository paths of the node records
    paths: Vec<String>,
    /// Last action on the root itself
    root_action: Option<NodeAction>,
    root_copy: Option<CopySource>,
}

struct Converter {
    authors: AuthorMap,
    filemap: FileMap,
    branchmap: BranchMap,
    stupid: bool,
    uuid: String,
}

impl Converter {
    fn run(&self, repo: &mut Repository, dump: &DumpFile, summary: &mut FetchSummary) -> Result<()> {
        let last_pulled = repo.last_pulled();
        let mut history = CopyHistory::scan(dump);
        let mut tree = SvnTree::default();

        for (index, revision) in dump.revisions.iter().enumerate() {
            let before = tree.clone();
            for node in &revision.nodes {
                tree.apply(node, |rev| history.lookup(rev), |data| repo.store_blob(data))?;
            }
            let next = dump.revisions.get(index + 1).map(|r| r.number);
            history.record(revision.number, next, &tree);

            if last_pulled.is_some_and(|last| revision.number <= last) {
                continue;
            }
            self.convert_revision(repo, revision, &before, &tree)?;
            repo.set_last_pulled(revision.number);
            summary.revisions += 1;
        }
        Ok(())
    }

    fn convert_revision(
        &self,
        repo: &mut Repository,
        revision: &Revision,
        before: &SvnTree,
        after: &SvnTree,
    ) -> Result<()> {
        let mut touched: BTreeMap<Location, Touched> = BTreeMap::new();
        for node in &revision.nodes {
            let Some((location, relative)) = layout::split_path(&node.path) else {
                debug!("r{}: ignoring {} outside the layout", revision.number, node.path);
                continue;
            };
            let entry = touched.entry(location).or_default();
            entry.paths.push(node.path.clone());
            if relative.is_empty() {
                entry.root_action = Some(node.action);
                entry.root_copy = node.copy_from.clone();
            }
        }
        if touched.is_empty() {
            return Ok(());
        }

        // Revisions that only touch tags or excluded branches need no author
        let mut user: Option<String> = None;
        let date = parse_date(revision.date())?;

        let mut commits: BTreeMap<String, NewChangeset> = BTreeMap::new();
        let mut closings: BTreeMap<String, NewChangeset> = BTreeMap::new();

        for (location, change) in &touched {
            let root = location.root();
            let Some(svn_branch) = location.branch_name() else {
                self.update_tag(repo, location, change, after);
                continue;
            };
            let Some(branch) = self.branchmap.map(svn_branch) else {
                debug!("r{}: branch {} is excluded", revision.number, svn_branch);
                continue;
            };

            let extra = BTreeMap::from([(
                EXTRA_CONVERT_REVISION.to_string(),
                format!("svn:{}/{}@{}", self.uuid, root, revision.number),
            )]);

            if !after.contains(&root) {
                let open_head = repo.branch_tip(branch).filter(|head| !head.closes_branch);
                if let Some(head) = open_head.filter(|_| before.contains(&root)) {
                    let mut extra = extra;
                    extra.insert(EXTRA_CLOSE.to_string(), "1".to_string());
                    closings.insert(
                        branch.to_string(),
                        NewChangeset {
                            parents: vec![head.node.clone()],
                            user: self.author(&mut user, revision)?,
                            date,
                            message: revision.message().to_string(),
                            branch: branch.to_string(),
                            closes_branch: true,
                            files: Vec::new(),
                            manifest: head.manifest.clone(),
                            extra,
                        },
                    );
                }
                continue;
            }

            let recreated = matches!(change.root_action, Some(NodeAction::Add | NodeAction::Replace));
            let parent = match (&change.root_copy, recreated) {
                (Some(source), _) => self.copy_parent(repo, source),
                (None, true) => None,
                (None, false) => repo
                    .branch_tip(branch)
                    .filter(|head| !head.closes_branch)
                    .map(|head| head.node.clone()),
            };
            let parent_manifest = parent
                .as_deref()
                .and_then(|node| repo.by_node(node))
                .map(|cs| cs.manifest.clone())
                .unwrap_or_default();

            let manifest = if self.stupid {
                self.snapshot(after, &root)
            } else {
                let base = if recreated { Manifest::new() } else { parent_manifest.clone() };
                self.replay(base, &root, &change.paths, before, after)
            };

            let files = changed_files(&parent_manifest, &manifest);
            let branch_copied = change.root_copy.is_some();
            if files.is_empty() && !branch_copied {
                debug!("r{}: nothing to convert on {}", revision.number, branch);
                continue;
            }

            commits.insert(
                branch.to_string(),
                NewChangeset {
                    parents: parent.into_iter().collect(),
                    user: self.author(&mut user, revision)?,
                    date,
                    message: revision.message().to_string(),
                    branch: branch.to_string(),
                    closes_branch: false,
                    files,
                    manifest,
                    extra,
                },
            );
        }

        for (branch, new) in commits.into_iter().chain(closings) {
            let node = repo.commit(new)?.node.clone();
            repo.map_revision(revision.number, &branch, &node);
        }
        Ok(())
    }

    /// Mapped author of `revision`, looked up on first use
    fn author(&self, cached: &mut Option<String>, revision: &Revision) -> Result<String> {
        if let Some(user) = cached {
            return Ok(user.clone());
        }
        let user = self.authors.lookup(revision.author())?;
        *cached = Some(user.clone());
        Ok(user)
    }

    /// Changeset a copied branch starts from
    fn copy_parent(&self, repo: &Repository, source: &CopySource) -> Option<String> {
        let (location, relative) = layout::split_path(&source.path)?;
        if !relative.is_empty() {
            warn!(
                "branch copied from {}@{}, below a branch root; starting without a parent",
                source.path, source.rev
            );
            return None;
        }
        let branch = self.branchmap.map(location.branch_name()?)?;
        repo.node_at(branch, source.rev).map(str::to_string)
    }

    fn update_tag(&self, repo: &mut Repository, location: &Location, change: &Touched, after: &SvnTree) {
        let Location::Tag(name) = location else {
            return;
        };
        if !after.contains(&location.root()) {
            if repo.remove_tag(name) {
                info!("Removed tag {}", name);
            }
            return;
        }
        let Some(source) = &change.root_copy else {
            debug!("ignoring change inside tag {}", name);
            return;
        };
        match self.copy_parent(repo, source) {
            Some(node) => {
                info!("Tagged {} as {}", &node[..12.min(node.len())], name);
                repo.set_tag(name, &node);
            }
            None => warn!("tag {} copies {}@{}, which was not converted", name, source.path, source.rev),
        }
    }

    fn entry_for(&self, after: &SvnTree, path: &str) -> Option<FileEntry> {
        match after.get(path) {
            Some(TreeEntry::File(file)) => Some(FileEntry {
                hash: file.hash.clone(),
                executable: file.executable,
                symlink: file.symlink,
            }),
            _ => None,
        }
    }

    fn snapshot(&self, after: &SvnTree, root: &str) -> Manifest {
        after
            .files_under(root)
            .filter_map(|(path, _)| {
                let relative = layout::relative_to(root, path)?;
                if !self.filemap.contains(relative) {
                    return None;
                }
                Some((relative.to_string(), self.entry_for(after, path)?))
            })
            .collect()
    }

    fn replay(
        &self,
        mut manifest: Manifest,
        root: &str,
        paths: &[String],
        before: &SvnTree,
        after: &SvnTree,
    ) -> Manifest {
        let mut changed = BTreeSet::new();
        for path in paths {
            changed.extend(before.files_under(path).map(|(p, _)| p.to_string()));
            changed.extend(after.files_under(path).map(|(p, _)| p.to_string()));
        }

        for path in changed {
            let Some(relative) = layout::relative_to(root, &path) else {
                continue;
            };
            if !self.filemap.contains(relative) {
                continue;
            }
            match self.entry_for(after, &path) {
                Some(entry) => {
                    manifest.insert(relative.to_string(), entry);
                }
                None => {
                    manifest.remove(relative);
                }
            }
        }
        manifest
    }
}

/// Tree snapshots kept for copies made by later revisions
///
/// Only revisions some node copies from are kept, and each is dropped once
/// the last revision copying from it has been replayed.
#[derive(Debug, Default)]
struct CopyHistory {
    /// Copy source revision -> last revision copying from it
    wanted: BTreeMap<u64, u64>,
    /// Snapshot revision -> (tree, last revision needing it)
    snapshots: BTreeMap<u64, (SvnTree, u64)>,
}

impl CopyHistory {
    fn scan(dump: &DumpFile) -> Self {
        let mut wanted: BTreeMap<u64, u64> = BTreeMap::new();
        for revision in &dump.revisions {
            for source in revision.nodes.iter().filter_map(|n| n.copy_from.as_ref()) {
                let last = wanted.entry(source.rev).or_insert(revision.number);
                *last = (*last).max(revision.number);
            }
        }
        Self {
            wanted,
            snapshots: BTreeMap::new(),
        }
    }

    /// Keep `tree` as the state of revisions `number..next` if a later
    /// copy needs it, and drop snapshots nothing copies from anymore
    fn record(&mut self, number: u64, next: Option<u64>, tree: &SvnTree) {
        self.snapshots.retain(|_, (_, last_use)| *last_use > number);

        let needed_until = match next {
            Some(next) => self.wanted.range(number..next).map(|(_, last)| *last).max(),
            None => self.wanted.range(number..).map(|(_, last)| *last).max(),
        };
        if let Some(last_use) = needed_until.filter(|last| *last > number) {
            self.snapshots.insert(number, (tree.clone(), last_use));
        }
    }

    /// Tree as of svn revision `rev`
    fn lookup(&self, rev: u64) -> Option<&SvnTree> {
        self.snapshots.range(..=rev).next_back().map(|(_, (tree, _))| tree)
    }
}

/// Paths whose entry differs between two manifests
fn changed_files(old: &Manifest, new: &Manifest) -> Vec<String> {
    let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    paths
        .into_iter()
        .filter(|path| old.get(*path) != new.get(*path))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::dump::{Node, NodeKind};

    fn entry(hash: &str) -> FileEntry {
        FileEntry {
            hash: hash.to_string(),
            executable: false,
            symlink: false,
        }
    }

    #[test]
    fn test_changed_files() {
        let old = Manifest::from([("a".to_string(), entry("1")), ("b".to_string(), entry("2"))]);
        let new = Manifest::from([("a".to_string(), entry("1")), ("b".to_string(), entry("3")), ("c".to_string(), entry("4"))]);
        assert_eq!(changed_files(&old, &new), ["b", "c"]);
        assert_eq!(changed_files(&new, &Manifest::new()), ["a", "b", "c"]);
    }

    fn tree_with(path: &str) -> SvnTree {
        let node = Node {
            path: path.to_string(),
            kind: Some(NodeKind::Dir),
            action: NodeAction::Add,
            copy_from: None,
            props: None,
            deleted_props: Vec::new(),
            prop_delta: false,
            text: None,
        };
        let mut tree = SvnTree::default();
        tree.apply(&node, |_| None, |_| Ok(String::new())).unwrap();
        tree
    }

    #[test]
    fn test_copy_history_keeps_only_copied_revisions() {
        let mut history = CopyHistory {
            wanted: BTreeMap::from([(1, 4), (2, 3)]),
            ..Default::default()
        };

        history.record(0, Some(1), &tree_with("r0"));
        assert!(history.snapshots.is_empty());
        history.record(1, Some(2), &tree_with("r1"));
        history.record(2, Some(3), &tree_with("r2"));
        assert!(history.lookup(1).unwrap().contains("r1"));
        assert!(history.lookup(2).unwrap().contains("r2"));
        assert!(history.lookup(0).is_none());

        // r3 was the last copy from r2
        history.record(3, Some(4), &tree_with("r3"));
        assert_eq!(history.snapshots.keys().copied().collect::<Vec<_>>(), [1]);
        history.record(4, None, &tree_with("r4"));
        assert!(history.snapshots.is_empty());
    }

    #[test]
    fn test_resolve_source() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dump = temp_dir.path().join(DUMP_FILE_NAME);
        std::fs::write(&dump, "SVN-fs-dump-format-version: 2\n").unwrap();

        let dir_url = Url::from_directory_path(temp_dir.path()).unwrap();
        assert_eq!(resolve_source(dir_url.as_str()).unwrap(), dump);

        let file_url = Url::from_file_path(&dump).unwrap();
        assert_eq!(resolve_source(file_url.as_str()).unwrap(), dump);

        assert!(matches!(
            resolve_source("svn://example.com/repo"),
            Err(Error::ConversionError(_))
        ));
        assert!(resolve_source("file:///nonexistent/dump").is_err());
    }

    #[test]
    fn test_parse_date() {
        let date = parse_date(Some("2008-10-07T20:13:09.000000Z")).unwrap();
        assert_eq!(date.timestamp(), 1_223_410_389);
        assert_eq!(parse_date(None).unwrap().timestamp(), 0);
        assert!(parse_date(Some("yesterday")).is_err());
    }
}
