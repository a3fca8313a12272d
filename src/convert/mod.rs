// src/convert/mod.rs

//! Subversion to changeset conversion
//!
//! A dump stream is parsed ([`dump`]), replayed into per-revision trees
//! ([`tree`]), split into branches by the standard layout ([`layout`]),
//! filtered and renamed through user maps ([`maps`]) and committed into a
//! [`Repository`] ([`store`]). [`fetch_revisions`] ties these together.

pub mod dump;
pub mod fetch;
pub mod layout;
pub mod maps;
pub mod store;
pub mod tree;

pub use dump::{DumpFile, Revision};
pub use fetch::{FetchOptions, FetchSummary, fetch_revisions};
pub use maps::{AuthorMap, BranchMap, FileMap};
pub use store::{Changeset, Repository};
