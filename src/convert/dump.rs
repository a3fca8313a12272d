// src/convert/dump.rs

//! Subversion dump stream parser
//!
//! Reads the output of `svnadmin dump` (format versions 2 and 3, full
//! texts only). A stream is a sequence of header blocks, each optionally
//! followed by a property section and a text section:
//!
//! ```text
//! Revision-number: 1
//! Prop-content-length: 36
//! Content-length: 36
//!
//! K 10
//! svn:author
//! V 5
//! Augie
//! PROPS-END
//!
//! Node-path: trunk/a
//! Node-kind: file
//! Node-action: add
//! Prop-content-length: 10
//! Text-content-length: 2
//! Text-content-md5: 60b725f10c9c85c70d97880dfe8191b3
//! Content-length: 12
//!
//! PROPS-END
//! a
//! ```

use crate::hash::{self, HashAlgorithm};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Revision property holding the committer
pub const PROP_AUTHOR: &str = "svn:author";
/// Revision property holding the commit time
pub const PROP_DATE: &str = "svn:date";
/// Revision property holding the log message
pub const PROP_LOG: &str = "svn:log";
/// Node property marking an executable file
pub const PROP_EXECUTABLE: &str = "svn:executable";
/// Node property marking a special file (symlink)
pub const PROP_SPECIAL: &str = "svn:special";

/// Property list of a revision or node
pub type Props = BTreeMap<String, String>;

/// Kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    File,
    Dir,
}

/// What a node record does to its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NodeAction {
    Add,
    Delete,
    Change,
    Replace,
}

/// Source of a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    pub path: String,
    pub rev: u64,
}

/// One node record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Repository path, without leading slash
    pub path: String,
    /// Absent for deletes and some changes
    pub kind: Option<NodeKind>,
    pub action: NodeAction,
    pub copy_from: Option<CopySource>,
    /// Full property list, when the record carries one
    pub props: Option<Props>,
    /// Property deletions from a `Prop-delta: true` record
    pub deleted_props: Vec<String>,
    pub prop_delta: bool,
    /// Full text, when the record carries one
    pub text: Option<Vec<u8>>,
}

/// One revision with its node records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revision {
    pub number: u64,
    pub props: Props,
    pub nodes: Vec<Node>,
}

impl Revision {
    /// Committer, if recorded
    pub fn author(&self) -> Option<&str> {
        self.props.get(PROP_AUTHOR).map(String::as_str)
    }

    /// Commit time as recorded (`2008-10-07T20:13:09.000000Z`)
    pub fn date(&self) -> Option<&str> {
        self.props.get(PROP_DATE).map(String::as_str)
    }

    /// Log message
    pub fn message(&self) -> &str {
        self.props.get(PROP_LOG).map(String::as_str).unwrap_or("")
    }
}

/// A parsed dump stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpFile {
    pub format_version: u32,
    pub uuid: Option<String>,
    pub revisions: Vec<Revision>,
}

impl DumpFile {
    /// Parse a dump file from disk
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            Error::IoError(format!("Failed to read dump {}: {}", path.display(), e))
        })?;
        let dump = Self::parse(&data)?;
        debug!(
            "Parsed {} ({} revisions, uuid {:?})",
            path.display(),
            dump.revisions.len(),
            dump.uuid
        );
        Ok(dump)
    }

    /// Parse a dump stream
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader { data, pos: 0 };
        let mut dump = DumpFile::default();

        while let Some(headers) = reader.headers()? {
            if let Some(version) = headers.get("SVN-fs-dump-format-version") {
                dump.format_version = parse_number(version, "format version")?;
                if !(1..=3).contains(&dump.format_version) {
                    return Err(Error::ParseError(format!(
                        "unsupported dump format version {}",
                        dump.format_version
                    )));
                }
            } else if let Some(text) = headers.get("UUID") {
                let parsed = uuid::Uuid::parse_str(text)
                    .map_err(|e| Error::ParseError(format!("invalid repository UUID {}: {}", text, e)))?;
                dump.uuid = Some(parsed.hyphenated().to_string());
            } else if let Some(number) = headers.get("Revision-number") {
                let (props, _, _) = reader.content(&headers)?;
                dump.revisions.push(Revision {
                    number: parse_number(number, "revision number")?,
                    props: props.map(|p| p.set).unwrap_or_default(),
                    nodes: Vec::new(),
                });
            } else if let Some(path) = headers.get("Node-path") {
                let node = reader.node(path, &headers)?;
                let revision = dump.revisions.last_mut().ok_or_else(|| {
                    Error::ParseError(format!("node {} appears before any revision", path))
                })?;
                revision.nodes.push(node);
            } else {
                return Err(Error::ParseError(format!(
                    "unrecognized record at byte {}",
                    reader.pos
                )));
            }
        }

        Ok(dump)
    }
}

type Headers = BTreeMap<String, String>;

struct PropSection {
    set: Props,
    deleted: Vec<String>,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        Some(&rest[..end])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::ParseError("dump stream is truncated".to_string()))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Next header block, skipping blank separator lines
    fn headers(&mut self) -> Result<Option<Headers>> {
        let mut headers = Headers::new();
        loop {
            let Some(line) = self.line() else {
                return if headers.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(headers))
                };
            };
            if line.is_empty() {
                if headers.is_empty() {
                    continue;
                }
                return Ok(Some(headers));
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| Error::ParseError("header is not UTF-8".to_string()))?;
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| Error::ParseError(format!("malformed header: {}", line)))?;
            headers.insert(key.to_string(), value.to_string());
        }
    }

    /// Property and text sections following a header block
    fn content(&mut self, headers: &Headers) -> Result<(Option<PropSection>, Option<Vec<u8>>, usize)> {
        let prop_len = optional_number(headers, "Prop-content-length")?;
        let text_len = optional_number(headers, "Text-content-length")?;
        let content_len = match optional_number(headers, "Content-length")? {
            Some(len) => len,
            None => prop_len
                .unwrap_or(0)
                .checked_add(text_len.unwrap_or(0))
                .ok_or_else(|| Error::ParseError("content length overflows".to_string()))?,
        };

        let start = self.pos;
        let props = match prop_len {
            Some(len) => Some(parse_props(self.take(len)?)?),
            None => None,
        };
        let text = match text_len {
            Some(len) => Some(self.take(len)?.to_vec()),
            None => None,
        };

        // Content-length covers both sections; skip anything unaccounted for
        let consumed = self.pos - start;
        if content_len > consumed {
            self.take(content_len - consumed)?;
        }
        Ok((props, text, content_len))
    }

    fn node(&mut self, path: &str, headers: &Headers) -> Result<Node> {
        let action = headers
            .get("Node-action")
            .ok_or_else(|| Error::ParseError(format!("node {} has no action", path)))?;
        let action: NodeAction = action
            .parse()
            .map_err(|_| Error::ParseError(format!("node {}: unknown action {}", path, action)))?;
        let kind = match headers.get("Node-kind") {
            Some(kind) => Some(
                kind.parse::<NodeKind>()
                    .map_err(|_| Error::ParseError(format!("node {}: unknown kind {}", path, kind)))?,
            ),
            None => None,
        };

        if headers.get("Text-delta").map(String::as_str) == Some("true") {
            return Err(Error::ConversionError(format!(
                "node {}: delta-encoded texts are not supported; dump without --deltas",
                path
            )));
        }

        let copy_from = match (
            headers.get("Node-copyfrom-path"),
            headers.get("Node-copyfrom-rev"),
        ) {
            (Some(from), Some(rev)) => Some(CopySource {
                path: from.trim_start_matches('/').to_string(),
                rev: parse_number(rev, "copy source revision")?,
            }),
            (None, None) => None,
            _ => {
                return Err(Error::ParseError(format!(
                    "node {}: incomplete copy source",
                    path
                )));
            }
        };

        let (props, text, _) = self.content(headers)?;
        if let (Some(text), Some(expected)) = (&text, headers.get("Text-content-md5")) {
            hash::verify_bytes(text, expected, HashAlgorithm::Md5)
                .map_err(|e| Error::ConversionError(format!("node {}: {}", path, e)))?;
        }

        let (props, deleted_props) = match props {
            Some(section) => (Some(section.set), section.deleted),
            None => (None, Vec::new()),
        };

        Ok(Node {
            path: path.trim_start_matches('/').to_string(),
            kind,
            action,
            copy_from,
            props,
            deleted_props,
            prop_delta: headers.get("Prop-delta").map(String::as_str) == Some("true"),
            text,
        })
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::ParseError(format!("invalid {}: {}", what, value)))
}

fn optional_number(headers: &Headers, key: &str) -> Result<Option<usize>> {
    headers.get(key).map(|v| parse_number(v, key)).transpose()
}

fn parse_props(data: &[u8]) -> Result<PropSection> {
    let mut reader = Reader { data, pos: 0 };
    let mut section = PropSection {
        set: Props::new(),
        deleted: Vec::new(),
    };

    loop {
        let line = reader
            .line()
            .ok_or_else(|| Error::ParseError("property section without PROPS-END".to_string()))?;
        if line == b"PROPS-END" {
            return Ok(section);
        }

        let line = std::str::from_utf8(line)
            .map_err(|_| Error::ParseError("property header is not UTF-8".to_string()))?;
        let (tag, len) = line
            .split_once(' ')
            .ok_or_else(|| Error::ParseError(format!("malformed property header: {}", line)))?;
        let len: usize = parse_number(len, "property length")?;
        let key = String::from_utf8_lossy(reader.take(len)?).into_owned();
        reader.line();

        match tag {
            "K" => {
                let value_header = reader
                    .line()
                    .and_then(|l| std::str::from_utf8(l).ok())
                    .and_then(|l| l.strip_prefix("V "))
                    .ok_or_else(|| Error::ParseError(format!("property {} has no value", key)))?;
                let len: usize = parse_number(value_header, "property value length")?;
                let value = String::from_utf8_lossy(reader.take(len)?).into_owned();
                reader.line();
                section.set.insert(key, value);
            }
            "D" => section.deleted.push(key),
            other => {
                return Err(Error::ParseError(format!("unknown property tag {}", other)));
            }
        }
    }
}
