mod engine;
mod transaction;

pub use engine::KvEngine;
pub use transaction::*;

/// Smallest key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut result = key.to_vec();
    result.push(0);
    result
}

/// Exclusive upper bound of all keys starting with `prefix`.
///
/// An all-0xFF (or empty) prefix has no finite bound; the empty vec is
/// returned for it.
pub fn prefix_list_end_key(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return end;
        }
        end.pop();
    }
    end
}

/// Selectors covering every key under `prefix`.
pub fn prefix_range(prefix: &[u8]) -> (KeySelector, KeySelector) {
    (
        KeySelector::new(prefix, true),
        KeySelector::new(prefix_list_end_key(prefix), false),
    )
}

/// Decodes a counter value written by [`ReadWriteTransaction::atomic_add`].
pub fn decode_counter(value: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = value.len().min(8);
    buf[..n].copy_from_slice(&value[..n]);
    i64::from_le_bytes(buf)
}
