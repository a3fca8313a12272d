// src/bin/svnfetch.rs

//! Convert a Subversion dump into a changeset repository

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eden::convert::{Changeset, Repository};
use eden::{FetchOptions, fetch_revisions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "svnfetch")]
#[command(author = "Eden Contributors")]
#[command(version)]
#[command(about = "Convert Subversion dumps into changeset repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert new revisions from a dump into a destination repository
    Fetch {
        /// file:// URL of a dump file, or of a directory holding repository.svndump
        url: String,

        /// Destination repository (created if missing)
        dest: PathBuf,

        /// Rebuild each branch from full snapshots instead of replaying changes
        #[arg(long)]
        stupid: bool,

        /// Author map (`svn-author=Name <email>` per line)
        #[arg(long, value_name = "FILE")]
        authors: Option<PathBuf>,

        /// File map (`include <path>` / `exclude <path>` per line)
        #[arg(long, value_name = "FILE")]
        filemap: Option<PathBuf>,

        /// Branch map (`svn-branch=branch` per line, empty target drops it)
        #[arg(long, value_name = "FILE")]
        branchmap: Option<PathBuf>,

        /// Fail on authors missing from the author map
        #[arg(long)]
        no_default_authors: bool,

        /// Match author map entries ignoring case
        #[arg(long)]
        case_insensitive_authors: bool,

        /// Leave the working copy alone
        #[arg(long)]
        no_update: bool,
    },

    /// Show converted changesets, newest first
    Log {
        /// Converted repository
        dest: PathBuf,

        /// Show at most this many changesets
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show only this changeset (`tip`, a number, a tag or a node prefix)
        #[arg(short, long, value_name = "REV")]
        rev: Option<String>,
    },

    /// Show where a converted repository came from
    Info {
        /// Converted repository
        dest: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    match Cli::parse().command {
        Commands::Fetch {
            url,
            dest,
            stupid,
            authors,
            filemap,
            branchmap,
            no_default_authors,
            case_insensitive_authors,
            no_update,
        } => {
            let mut options = FetchOptions::new(url, dest)
                .stupid(stupid)
                .default_authors(!no_default_authors)
                .case_insensitive_authors(case_insensitive_authors)
                .update_working_copy(!no_update);
            if let Some(path) = authors {
                options = options.authors(path);
            }
            if let Some(path) = filemap {
                options = options.filemap(path);
            }
            if let Some(path) = branchmap {
                options = options.branchmap(path);
            }

            let summary = fetch_revisions(&options)
                .with_context(|| format!("Failed to fetch {}", options.url))?;
            match summary.last_revision {
                Some(rev) => println!(
                    "Converted {} revisions into {} changesets (at r{})",
                    summary.revisions, summary.changesets, rev
                ),
                None => println!("No revisions to convert"),
            }
            Ok(())
        }
        Commands::Log { dest, limit, rev } => {
            let repo = Repository::open(&dest)
                .with_context(|| format!("Failed to open {}", dest.display()))?;
            let tags = tags_by_node(&repo);
            let tip = repo.tip().map(|cs| cs.node.clone());

            let shown: Vec<&Changeset> = match rev {
                Some(rev) => vec![repo.lookup(&rev).with_context(|| format!("No changeset {}", rev))?],
                None => repo.changesets().iter().rev().take(limit.unwrap_or(usize::MAX)).collect(),
            };
            for changeset in shown {
                let mut names = tags.get(changeset.node.as_str()).cloned().unwrap_or_default();
                if tip.as_deref() == Some(changeset.node.as_str()) {
                    names.insert(0, "tip");
                }
                print_changeset(changeset, &names);
            }
            Ok(())
        }
        Commands::Info { dest } => {
            let repo = Repository::open(&dest)
                .with_context(|| format!("Failed to open {}", dest.display()))?;
            println!("URL: {}", repo.url().unwrap_or("(unknown)"));
            println!("Repository UUID: {}", repo.uuid().unwrap_or("(unknown)"));
            match repo.last_pulled() {
                Some(rev) => println!("Last pulled: r{}", rev),
                None => println!("Last pulled: (none)"),
            }
            println!("Changesets: {}", repo.len());

            let working = repo
                .working_node()
                .with_context(|| format!("Failed to read working copy state of {}", dest.display()))?;
            if let Some(node) = working {
                // Latest svn revision that produced the checked-out changeset
                match repo.revmap().iter().rev().find(|e| e.node == node) {
                    Some(entry) => println!(
                        "Working copy: {} (r{} on {})",
                        &node[..12.min(node.len())],
                        entry.svn_rev,
                        entry.branch
                    ),
                    None => println!("Working copy: {}", &node[..12.min(node.len())]),
                }
            }
            Ok(())
        }
    }
}

fn tags_by_node(repo: &Repository) -> BTreeMap<&str, Vec<&str>> {
    let mut tags: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, node) in repo.tags() {
        tags.entry(node.as_str()).or_default().push(name.as_str());
    }
    tags
}

fn print_changeset(changeset: &Changeset, tags: &[&str]) {
    println!("changeset:   {}:{}", changeset.rev, changeset.short_node());
    if changeset.branch != "default" {
        println!("branch:      {}", changeset.branch);
    }
    for tag in tags {
        println!("tag:         {}", tag);
    }
    if changeset.closes_branch {
        println!("closes:      {}", changeset.branch);
    }
    println!("user:        {}", changeset.user());
    println!("date:        {}", changeset.date.to_rfc2822());
    println!("summary:     {}", changeset.summary());
    println!();
}
