// tests/fetch_tags.rs

//! Tag handling across incremental fetches of the `tag_and_untag` fixture
//!
//! - r1 (Augie): standard layout with `trunk/a`
//! - r2 (releng): tags/1.0 copied from trunk@1
//! - r3 (Augie): `a` changed on trunk
//! - r4 (releng): tags/1.0 deleted
//! - r5 (Augie): `a` changed again
//!
//! `tag_and_untag_r3.svndump` is the same repository cut after r3.

mod common;

use common::{fixture_url, write_authors};
use eden::convert::store::META_DIR;
use eden::{FetchOptions, Repository, fetch_revisions};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const AUGIE: &str = "Augie Fackler <durin42@gmail.com>";

fn options(fixture: &str, dest: &Path) -> FetchOptions {
    FetchOptions::new(fixture_url(fixture), dest).default_authors(false)
}

fn svnfetch(args: &[&str]) -> String {
    let output = Command::new(env!("CARGO_BIN_EXE_svnfetch")).args(args).output().unwrap();
    assert!(
        output.status.success(),
        "svnfetch {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_tag_added_then_removed() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("converted");
    let authors = write_authors(temp_dir.path(), &format!("Augie={}\n", AUGIE));

    // releng only touches tags, so it never needs a mapping
    let first = fetch_revisions(&options("tag_and_untag_r3.svndump", &dest).authors(&authors)).unwrap();
    assert_eq!(first.changesets, 2);
    assert_eq!(first.last_revision, Some(3));

    let repo = Repository::open(&dest).unwrap();
    let tagged = repo.get(0).unwrap().node.clone();
    assert_eq!(repo.tags().get("1.0"), Some(&tagged));
    assert_eq!(repo.lookup("1.0").unwrap().node, tagged);

    let second = fetch_revisions(&options("tag_and_untag.svndump", &dest)).unwrap();
    assert_eq!(second.changesets, 1);
    assert_eq!(second.last_revision, Some(5));

    let repo = Repository::open(&dest).unwrap();
    assert!(repo.tags().is_empty());
    assert!(repo.lookup("1.0").is_err());
    assert_eq!(std::fs::read_to_string(dest.join("a")).unwrap(), "a\nmore\nagain\n");
}

#[test]
fn test_author_map_reused_by_later_fetch() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("converted");
    let authors = write_authors(temp_dir.path(), &format!("Augie={}\n", AUGIE));

    fetch_revisions(&options("tag_and_untag_r3.svndump", &dest).authors(&authors)).unwrap();
    std::fs::remove_file(&authors).unwrap();

    // no --authors this time; the map saved with the repository applies
    fetch_revisions(&options("tag_and_untag.svndump", &dest)).unwrap();
    let repo = Repository::open(&dest).unwrap();
    let users: Vec<&str> = repo.changesets().iter().map(|cs| cs.user()).collect();
    assert_eq!(users, [AUGIE, AUGIE, AUGIE]);

    let saved = std::fs::read_to_string(dest.join(META_DIR).join("authors")).unwrap();
    assert_eq!(saved, format!("Augie={}\n", AUGIE));
}

#[test]
fn test_log_and_info_commands() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("converted");
    let url = fixture_url("tag_and_untag_r3.svndump");
    let dest_arg = dest.to_str().unwrap();

    svnfetch(&["fetch", &url, dest_arg]);
    let repo = Repository::open(&dest).unwrap();
    let tagged = repo.get(0).unwrap();

    let log = svnfetch(&["log", dest_arg, "--rev", "1.0"]);
    assert!(log.starts_with(&format!("changeset:   0:{}\n", tagged.short_node())));
    assert!(log.contains("tag:         1.0\n"));
    assert!(log.contains("summary:     Initial layout\n"));
    assert!(!log.contains("Change a"));

    let info = svnfetch(&["info", dest_arg]);
    let tip = repo.tip().unwrap();
    assert!(info.contains(&format!("URL: {}\n", url)));
    assert!(info.contains("Repository UUID: 2b4ab0e5-0fa2-4a3c-9d6c-0cfc1e2d5e11\n"));
    assert!(info.contains("Last pulled: r3\n"));
    assert!(info.contains("Changesets: 2\n"));
    assert!(info.contains(&format!("Working copy: {} (r3 on default)\n", &tip.node[..12])));
}
