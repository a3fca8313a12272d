// src/nfs/attr.rs

//! POSIX stat to NFSv3 attribute conversions (RFC 1813 section 2.6)

use crate::{Error, Result};
use serde::Serialize;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFREG: u32 = libc::S_IFREG as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;
const S_IFBLK: u32 = libc::S_IFBLK as u32;
const S_IFCHR: u32 = libc::S_IFCHR as u32;
const S_IFLNK: u32 = libc::S_IFLNK as u32;
const S_IFSOCK: u32 = libc::S_IFSOCK as u32;
const S_IFIFO: u32 = libc::S_IFIFO as u32;

/// NFS mode bits
pub mod mode_bits {
    pub const READ_OWNER: u32 = 0x100;
    pub const WRITE_OWNER: u32 = 0x80;
    pub const EXEC_OWNER: u32 = 0x40;
    pub const READ_GROUP: u32 = 0x20;
    pub const WRITE_GROUP: u32 = 0x10;
    pub const EXEC_GROUP: u32 = 0x8;
    pub const READ_OTHER: u32 = 0x4;
    pub const WRITE_OTHER: u32 = 0x2;
    pub const EXEC_OTHER: u32 = 0x1;
    pub const SET_UID: u32 = 0x800;
    pub const SET_GID: u32 = 0x400;
}

/// NFSv3 file type (`ftype3`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum Ftype3 {
    Regular = 1,
    Directory = 2,
    Block = 3,
    Character = 4,
    Symlink = 5,
    Socket = 6,
    Fifo = 7,
}

/// File type of a POSIX mode
pub fn mode_to_ftype3(mode: u32) -> Result<Ftype3> {
    match mode & S_IFMT {
        S_IFREG => Ok(Ftype3::Regular),
        S_IFDIR => Ok(Ftype3::Directory),
        S_IFBLK => Ok(Ftype3::Block),
        S_IFCHR => Ok(Ftype3::Character),
        S_IFLNK => Ok(Ftype3::Symlink),
        S_IFSOCK => Ok(Ftype3::Socket),
        S_IFIFO => Ok(Ftype3::Fifo),
        other => Err(Error::ParseError(format!("unknown file type in mode {:#o}", other))),
    }
}

/// POSIX `S_IF*` bits of a file type
pub fn ftype3_to_mode(ftype: Ftype3) -> u32 {
    match ftype {
        Ftype3::Regular => S_IFREG,
        Ftype3::Directory => S_IFDIR,
        Ftype3::Block => S_IFBLK,
        Ftype3::Character => S_IFCHR,
        Ftype3::Symlink => S_IFLNK,
        Ftype3::Socket => S_IFSOCK,
        Ftype3::Fifo => S_IFIFO,
    }
}

/// Permission bits of a POSIX mode, as NFS mode bits
pub fn mode_to_nfs_mode(mode: u32) -> u32 {
    use mode_bits::*;

    const TABLE: [(u32, u32); 11] = [
        (libc::S_IRUSR as u32, READ_OWNER),
        (libc::S_IWUSR as u32, WRITE_OWNER),
        (libc::S_IXUSR as u32, EXEC_OWNER),
        (libc::S_IRGRP as u32, READ_GROUP),
        (libc::S_IWGRP as u32, WRITE_GROUP),
        (libc::S_IXGRP as u32, EXEC_GROUP),
        (libc::S_IROTH as u32, READ_OTHER),
        (libc::S_IWOTH as u32, WRITE_OTHER),
        (libc::S_IXOTH as u32, EXEC_OTHER),
        (libc::S_ISUID as u32, SET_UID),
        (libc::S_ISGID as u32, SET_GID),
    ];

    TABLE
        .iter()
        .filter(|(posix, _)| mode & posix != 0)
        .fold(0, |nfs, (_, bit)| nfs | bit)
}

/// NFSv3 timestamp (`nfstime3`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct NfsTime3 {
    pub seconds: u32,
    pub nseconds: u32,
}

impl NfsTime3 {
    /// Convert a `timespec`; times before the epoch or past 2106 are rejected
    pub fn from_timespec(seconds: i64, nseconds: i64) -> Result<Self> {
        let narrow = |value: i64, what: &str| {
            u32::try_from(value)
                .map_err(|_| Error::ParseError(format!("{} out of nfstime3 range: {}", what, value)))
        };
        Ok(Self {
            seconds: narrow(seconds, "seconds")?,
            nseconds: narrow(nseconds, "nanoseconds")?,
        })
    }

    /// Convert a wall-clock time
    pub fn from_system_time(time: SystemTime) -> Result<Self> {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::ParseError("time before the epoch".to_string()))?;
        Self::from_timespec(
            i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX),
            i64::from(since_epoch.subsec_nanos()),
        )
    }

    /// Time since the epoch
    pub fn as_duration(&self) -> Duration {
        Duration::new(u64::from(self.seconds), self.nseconds)
    }
}

/// Device numbers (`specdata3`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpecData3 {
    pub specdata1: u32,
    pub specdata2: u32,
}

/// NFSv3 file attributes (`fattr3`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fattr3 {
    #[serde(rename = "type")]
    pub ftype: Ftype3,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub used: u64,
    pub rdev: SpecData3,
    pub fsid: u64,
    pub fileid: u64,
    pub atime: NfsTime3,
    pub mtime: NfsTime3,
    pub ctime: NfsTime3,
}

impl Fattr3 {
    /// Attributes of a file
    ///
    /// `rdev` is always zero.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        Ok(Self {
            ftype: mode_to_ftype3(metadata.mode())?,
            mode: mode_to_nfs_mode(metadata.mode()),
            nlink: u32::try_from(metadata.nlink()).unwrap_or(u32::MAX),
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
            used: metadata.blocks() * 512,
            rdev: SpecData3::default(),
            fsid: metadata.dev(),
            fileid: metadata.ino(),
            atime: NfsTime3::from_timespec(metadata.atime(), metadata.atime_nsec())?,
            mtime: NfsTime3::from_timespec(metadata.mtime(), metadata.mtime_nsec())?,
            ctime: NfsTime3::from_timespec(metadata.ctime(), metadata.ctime_nsec())?,
        })
    }
}

/// Attributes checked for weak cache consistency (`wcc_attr`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WccAttr {
    pub size: u64,
    pub mtime: NfsTime3,
    pub ctime: NfsTime3,
}

impl WccAttr {
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        Ok(Self {
            size: metadata.size(),
            mtime: NfsTime3::from_timespec(metadata.mtime(), metadata.mtime_nsec())?,
            ctime: NfsTime3::from_timespec(metadata.ctime(), metadata.ctime_nsec())?,
        })
    }
}

/// `pre_op_attr`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreOpAttr(pub Option<WccAttr>);

impl PreOpAttr {
    pub fn from_metadata(metadata: Option<&Metadata>) -> Self {
        Self(metadata.and_then(|m| WccAttr::from_metadata(m).ok()))
    }
}

/// `post_op_attr`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostOpAttr(pub Option<Fattr3>);

impl PostOpAttr {
    /// Attributes after an operation; a failed stat yields no attributes
    pub fn from_result(metadata: &io::Result<Metadata>) -> Self {
        Self(
            metadata
                .as_ref()
                .ok()
                .and_then(|m| Fattr3::from_metadata(m).ok()),
        )
    }
}

/// Weak cache consistency data (`wcc_data`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WccData {
    pub before: PreOpAttr,
    pub after: PostOpAttr,
}

impl WccData {
    pub fn new(before: Option<&Metadata>, after: Option<&Metadata>) -> Self {
        Self {
            before: PreOpAttr::from_metadata(before),
            after: PostOpAttr(after.and_then(|m| Fattr3::from_metadata(m).ok())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_ftype_round_trip() {
        for ftype in [
            Ftype3::Regular,
            Ftype3::Directory,
            Ftype3::Block,
            Ftype3::Character,
            Ftype3::Symlink,
            Ftype3::Socket,
            Ftype3::Fifo,
        ] {
            assert_eq!(mode_to_ftype3(ftype3_to_mode(ftype) | 0o644).unwrap(), ftype);
        }
        assert!(mode_to_ftype3(0o644).is_err());
        assert_eq!(Ftype3::Fifo as u32, 7);
    }

    #[test]
    fn test_nfs_mode_bits() {
        assert_eq!(mode_to_nfs_mode(0o644), 0x100 | 0x80 | 0x20 | 0x4);
        assert_eq!(mode_to_nfs_mode(0o755), 0x1ff - 0x10 - 0x2);
        assert_eq!(mode_to_nfs_mode(0o4711), 0x800 | 0x100 | 0x80 | 0x40 | 0x8 | 0x1);
        assert_eq!(mode_to_nfs_mode(0o2000), 0x400);
        assert_eq!(mode_to_nfs_mode(S_IFDIR | 0o777), 0x1ff);
    }

    #[test]
    fn test_nfstime_range() {
        let time = NfsTime3::from_timespec(1_600_000_000, 123).unwrap();
        assert_eq!(time.as_duration(), Duration::new(1_600_000_000, 123));
        assert!(NfsTime3::from_timespec(-1, 0).is_err());
        assert!(NfsTime3::from_timespec(i64::from(u32::MAX) + 1, 0).is_err());
    }

    #[test]
    fn test_fattr3_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file");
        std::fs::write(&path, b"hello").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        let metadata = std::fs::symlink_metadata(&path).unwrap();
        let attr = Fattr3::from_metadata(&metadata).unwrap();
        assert_eq!(attr.ftype, Ftype3::Regular);
        assert_eq!(attr.mode, 0x100 | 0x80 | 0x20);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.fileid, metadata.ino());
        assert_eq!(attr.rdev, SpecData3::default());

        let dir_attr = Fattr3::from_metadata(&std::fs::metadata(temp_dir.path()).unwrap()).unwrap();
        assert_eq!(dir_attr.ftype, Ftype3::Directory);
    }

    #[test]
    fn test_post_op_attr_of_failed_stat() {
        let missing = std::fs::metadata("/nonexistent/path/for/nfs/test");
        assert_eq!(PostOpAttr::from_result(&missing), PostOpAttr(None));

        let temp_dir = TempDir::new().unwrap();
        let present = std::fs::metadata(temp_dir.path());
        assert!(PostOpAttr::from_result(&present).0.is_some());
    }

    #[test]
    fn test_wcc_data() {
        let temp_dir = TempDir::new().unwrap();
        let metadata = std::fs::metadata(temp_dir.path()).unwrap();

        let empty = WccData::new(None, None);
        assert_eq!(empty, WccData::default());

        let full = WccData::new(Some(&metadata), Some(&metadata));
        let before = full.before.0.unwrap();
        let after = full.after.0.unwrap();
        assert_eq!(before.mtime, after.mtime);
        assert_eq!(before.size, after.size);
    }
}
