//! Lower-bound search over random-access entries.
//!
//! Both the on-disk index levels and decoded blocks are searched through the
//! same routine: find the first position in a range whose key satisfies a
//! monotonic predicate (false below some threshold, true at and above it).

use crate::error::Result;
use std::borrow::Cow;
use std::ops::Range;

/// Random access to the keys of a sequence of entries.
pub trait EntrySource {
    /// Number of entries.
    fn entry_count(&self) -> u64;

    /// Key of entry `index`.
    fn key_at(&mut self, index: u64) -> Result<Cow<'_, [u8]>>;
}

/// Returns the first position in `range` for which `pred` is true, or
/// `range.end` if there is none.
///
/// `pred` must be monotonic over the range. Each position is tested at most
/// once and positions outside the range are never tested.
pub fn lower_bound<P>(range: Range<u64>, mut pred: P) -> Result<u64>
where
    P: FnMut(u64) -> Result<bool>,
{
    let mut lo = range.start;
    let mut hi = range.end;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid)? {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }

    Ok(lo)
}

/// First entry of `source` in `range` whose key satisfies `test`.
pub fn first_satisfying<S, F>(source: &mut S, range: Range<u64>, test: &mut F) -> Result<u64>
where
    S: EntrySource + ?Sized,
    F: FnMut(&[u8]) -> bool + ?Sized,
{
    lower_bound(range, |i| Ok(test(&source.key_at(i)?)))
}

/// The group an entry range hands down to its children.
///
/// `found` is the first position satisfying the predicate. The group that
/// can hold the first satisfying record is the one just before it, unless
/// the range's first entry already satisfies.
pub fn candidate(range: &Range<u64>, found: u64) -> u64 {
    if found > range.start {
        found - 1
    } else {
        range.start
    }
}
