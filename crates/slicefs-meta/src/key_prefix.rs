//! Prefix bytes of every record family in the store.
//!
//! Integers inside keys are big-endian so that range scans come back in
//! numeric order.

pub const INODE_PREFIX: u8 = 0x01;

pub const DIR_ENTRY_PREFIX: u8 = 0x02;

pub const CHUNK_PREFIX: u8 = 0x03;

pub const XATTR_PREFIX: u8 = 0x04;

pub const FLOCK_PREFIX: u8 = 0x05;

pub const PLOCK_PREFIX: u8 = 0x06;

/// Files whose content awaits reclamation.
pub const DELFILE_PREFIX: u8 = 0x07;

/// Unlinked inodes kept alive by an open handle of a session.
pub const SUSTAINED_PREFIX: u8 = 0x08;

pub const COUNTER_PREFIX: u8 = 0x09;

/// Content ids of a file being reclaimed whose `CHUNK_DEL` is not yet delivered.
pub const UNANNOUNCED_PREFIX: u8 = 0x0A;
