//! Attribute, entry and slice types shared by every operation.

use serde::{Deserialize, Serialize};

pub type Ino = u64;

pub const ROOT_INODE: Ino = 1;

pub const CHUNK_BITS: u32 = 26;
pub const CHUNK_SIZE: u64 = 1 << CHUNK_BITS;
pub const CHUNK_MASK: u64 = CHUNK_SIZE - 1;

/// Index of the chunk containing byte `offset`.
#[inline]
pub fn chunk_index(offset: u64) -> u32 {
    (offset >> CHUNK_BITS) as u32
}

/// Block size used for space accounting and `st_blksize`.
pub const BLOCK_SIZE: u64 = 4096;

#[inline]
pub fn align_block(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

pub const MAX_XATTR_NAME: usize = 255;
pub const MAX_XATTR_VALUE: usize = 65536;
pub const MAX_SYMLINK_LEN: usize = 4096;

// Access mask bits.
pub const MODE_MASK_R: u8 = 4;
pub const MODE_MASK_W: u8 = 2;
pub const MODE_MASK_X: u8 = 1;

// `set_attr` selectors.
pub const SET_ATTR_MODE: u16 = 1 << 0;
pub const SET_ATTR_UID: u16 = 1 << 1;
pub const SET_ATTR_GID: u16 = 1 << 2;
pub const SET_ATTR_SIZE: u16 = 1 << 3;
pub const SET_ATTR_ATIME: u16 = 1 << 4;
pub const SET_ATTR_MTIME: u16 = 1 << 5;
pub const SET_ATTR_CTIME: u16 = 1 << 6;
pub const SET_ATTR_ATIME_NOW: u16 = 1 << 7;
pub const SET_ATTR_MTIME_NOW: u16 = 1 << 8;

// `sgid_clear_mode` bits accepted by `set_attr`.
pub const CLEAR_SUGID_ON_CHOWN: u8 = 1 << 0;
pub const CLEAR_SUGID_ON_CHMOD: u8 = 1 << 1;

pub const TRUNCATE_SKIP_PERM_CHECK: u8 = 1 << 0;

// `fallocate` modes.
pub const FALLOC_KEEP_SIZE: u8 = 0x01;
pub const FALLOC_PUNCH_HOLE: u8 = 0x02;
pub const FALLOC_NO_HIDE_STALE: u8 = 0x04;
pub const FALLOC_COLLAPSE_RANGE: u8 = 0x08;
pub const FALLOC_ZERO_RANGE: u8 = 0x10;
pub const FALLOC_INSERT_RANGE: u8 = 0x20;

// `rename` flags.
pub const RENAME_NOREPLACE: u32 = 1 << 0;
pub const RENAME_EXCHANGE: u32 = 1 << 1;
pub const RENAME_WHITEOUT: u32 = 1 << 2;

// `set_xattr` flags.
pub const XATTR_CREATE: u32 = 1;
pub const XATTR_REPLACE: u32 = 2;

// Lock types shared by flock and POSIX locks.
pub const F_UNLCK: u32 = 0;
pub const F_RDLCK: u32 = 1;
pub const F_WRLCK: u32 = 2;

// POSIX lock commands.
pub const LOCK_GET: u32 = 0;
pub const LOCK_SET: u32 = 1;
pub const LOCK_TRY: u32 = 2;
pub const LOCK_INT: u32 = 3;

// File type bits of `st_mode`.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

pub const S_ISUID: u16 = 0o4000;
pub const S_ISGID: u16 = 0o2000;
pub const S_ISVTX: u16 = 0o1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum InodeType {
    #[default]
    File = 1,
    Directory = 2,
    Symlink = 3,
    Fifo = 4,
    BlockDev = 5,
    CharDev = 6,
    Socket = 7,
}

impl InodeType {
    pub fn type_bits(self) -> u32 {
        match self {
            InodeType::File => S_IFREG,
            InodeType::Directory => S_IFDIR,
            InodeType::Symlink => S_IFLNK,
            InodeType::Fifo => S_IFIFO,
            InodeType::BlockDev => S_IFBLK,
            InodeType::CharDev => S_IFCHR,
            InodeType::Socket => S_IFSOCK,
        }
    }
}

impl TryFrom<u8> for InodeType {
    type Error = u8;

    fn try_from(v: u8) -> std::result::Result<Self, u8> {
        Ok(match v {
            1 => InodeType::File,
            2 => InodeType::Directory,
            3 => InodeType::Symlink,
            4 => InodeType::Fifo,
            5 => InodeType::BlockDev,
            6 => InodeType::CharDev,
            7 => InodeType::Socket,
            other => return Err(other),
        })
    }
}

/// Inode attributes as reported to the kernel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attr {
    pub flags: u8,
    pub typ: InodeType,
    /// Permission bits including setuid/setgid/sticky.
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub nlink: u32,
    pub length: u64,
    pub rdev: u32,
    /// False when only the type is known (readdir without attributes).
    #[serde(skip, default = "default_full")]
    pub full: bool,
}

fn default_full() -> bool {
    true
}

impl Attr {
    /// `st_mode` value combining type and permission bits.
    pub fn smode(&self) -> u32 {
        self.typ.type_bits() | u32::from(self.mode & 0o7777)
    }

    pub fn is_dir(&self) -> bool {
        self.typ == InodeType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.typ == InodeType::File
    }

    pub(crate) fn type_only(typ: InodeType) -> Self {
        Self {
            typ,
            full: false,
            ..Default::default()
        }
    }

    pub(crate) fn touch_atime(&mut self, now: Timespec) {
        self.atime = now.sec;
        self.atimensec = now.nsec;
    }

    pub(crate) fn touch_mtime(&mut self, now: Timespec) {
        self.mtime = now.sec;
        self.mtimensec = now.nsec;
        self.touch_ctime(now);
    }

    pub(crate) fn touch_ctime(&mut self, now: Timespec) {
        self.ctime = now.sec;
        self.ctimensec = now.nsec;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            sec: now.timestamp(),
            nsec: now.timestamp_subsec_nanos(),
        }
    }
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub inode: Ino,
    pub name: Vec<u8>,
    pub attr: Attr,
}

/// A contiguous piece of written content placed into a chunk.
///
/// `chunkid == 0` is a hole and reads as zeroes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slice {
    pub chunkid: u64,
    /// Total length of the content object.
    pub clen: u32,
    /// Offset of this piece within the content object.
    pub off: u32,
    pub len: u32,
}

impl Slice {
    pub fn new(chunkid: u64, clen: u32, off: u32, len: u32) -> Self {
        Self {
            chunkid,
            clen,
            off,
            len,
        }
    }

    pub fn hole(len: u32) -> Self {
        Self {
            chunkid: 0,
            clen: len,
            off: 0,
            len,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.chunkid == 0
    }
}

/// Conflicting lock reported by `getlk`; `ltype == F_UNLCK` when none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockInfo {
    pub ltype: u32,
    pub start: u64,
    pub end: u64,
    pub pid: u32,
}

impl LockInfo {
    pub fn unlocked() -> Self {
        Self {
            ltype: F_UNLCK,
            start: 0,
            end: 0,
            pid: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub total_space: u64,
    pub avail_space: u64,
    pub iused: u64,
    pub iavail: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_index() {
        assert_eq!(chunk_index(0), 0);
        assert_eq!(chunk_index(CHUNK_SIZE - 1), 0);
        assert_eq!(chunk_index(CHUNK_SIZE), 1);
        assert_eq!(chunk_index(5 * CHUNK_SIZE + 17), 5);
    }

    #[test]
    fn test_align_block() {
        assert_eq!(align_block(0), 0);
        assert_eq!(align_block(1), 4096);
        assert_eq!(align_block(4096), 4096);
        assert_eq!(align_block(4097), 8192);
    }

    #[test]
    fn test_smode() {
        let attr = Attr {
            typ: InodeType::Directory,
            mode: 0o1777,
            ..Default::default()
        };
        assert_eq!(attr.smode(), 0o041777);
        let attr = Attr {
            typ: InodeType::Symlink,
            mode: 0o777,
            ..Default::default()
        };
        assert_eq!(attr.smode() & S_IFMT, S_IFLNK);
    }

    #[test]
    fn test_inode_type_from_u8() {
        assert_eq!(InodeType::try_from(2), Ok(InodeType::Directory));
        assert_eq!(InodeType::try_from(7), Ok(InodeType::Socket));
        assert_eq!(InodeType::try_from(0), Err(0));
    }

    #[test]
    fn test_attr_json_keeps_full() {
        let attr = Attr {
            typ: InodeType::File,
            mode: 0o644,
            nlink: 1,
            full: true,
            ..Default::default()
        };
        let json = serde_json::to_vec(&attr).unwrap();
        let back: Attr = serde_json::from_slice(&json).unwrap();
        assert!(back.full);
        assert_eq!(back, attr);
    }
}
