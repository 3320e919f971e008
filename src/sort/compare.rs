/// Reference comparator over fixed-length binary records.
/// Allocation-free; this is the oracle the JIT output must match sign-for-sign,
/// and the dispatch target of the interpreted fallback.
use std::cmp::Ordering;

use super::key::{KeySpec, KeyType, SortOrder};

/// Read a signed little-endian integer of width 2/4/8 and widen to i64.
#[inline]
fn read_int_le(rec: &[u8], off: usize, len: usize) -> i64 {
    match len {
        2 => i16::from_le_bytes(rec[off..off + 2].try_into().unwrap()) as i64,
        4 => i32::from_le_bytes(rec[off..off + 4].try_into().unwrap()) as i64,
        8 => i64::from_le_bytes(rec[off..off + 8].try_into().unwrap()),
        _ => unreachable!("integer key width checked at admission"),
    }
}

/// Read a signed big-endian integer of width 2/4/8 and widen to i64.
#[inline]
fn read_int_be(rec: &[u8], off: usize, len: usize) -> i64 {
    match len {
        2 => i16::from_be_bytes(rec[off..off + 2].try_into().unwrap()) as i64,
        4 => i32::from_be_bytes(rec[off..off + 4].try_into().unwrap()) as i64,
        8 => i64::from_be_bytes(rec[off..off + 8].try_into().unwrap()),
        _ => unreachable!("integer key width checked at admission"),
    }
}

/// Read a little-endian IEEE 754 float of width 4/8, widened to f64.
#[inline]
fn read_float_le(rec: &[u8], off: usize, len: usize) -> f64 {
    match len {
        4 => f32::from_le_bytes(rec[off..off + 4].try_into().unwrap()) as f64,
        8 => f64::from_le_bytes(rec[off..off + 8].try_into().unwrap()),
        _ => unreachable!("float key width checked at admission"),
    }
}

/// Compare one key field of two records.
///
/// Character keys use unsigned lexicographic byte order over the full key
/// length (memcmp semantics). Float comparisons that are unordered (NaN on
/// either side) yield Equal, so NaN-keyed records fall through to later
/// keys; the JIT realizes the same rule.
#[inline]
pub fn compare_field(a: &[u8], b: &[u8], key: &KeySpec) -> Ordering {
    let off = key.offset();
    match key.ty {
        KeyType::Character => a[off..off + key.length].cmp(&b[off..off + key.length]),
        KeyType::LittleEndianInt => {
            read_int_le(a, off, key.length).cmp(&read_int_le(b, off, key.length))
        }
        KeyType::BigEndianInt => {
            read_int_be(a, off, key.length).cmp(&read_int_be(b, off, key.length))
        }
        KeyType::LittleEndianFloat => read_float_le(a, off, key.length)
            .partial_cmp(&read_float_le(b, off, key.length))
            .unwrap_or(Ordering::Equal),
    }
}

/// Compare two records under the full key list: earlier keys dominate,
/// descending keys reverse their field ordering, equal fields fall through.
#[inline]
pub fn compare_records(a: &[u8], b: &[u8], keys: &[KeySpec]) -> Ordering {
    for key in keys {
        let ord = compare_field(a, b, key);
        let ord = match key.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
