//! Ordering of sequential sibling nodes.
//!
//! The coordination service suffixes sequential node names with a fixed-width
//! signed 32-bit counter that wraps from the maximum positive value to the
//! minimum negative one. Acquisition order is creation order, so siblings
//! must be sorted oldest to newest across that wrap. Interpreting the
//! counter's bits as unsigned turns the wrap into a single monotonic ring;
//! the one place the ring "breaks" (newest back to oldest) shows up as a
//! dominant gap between consecutive values. When no gap dominates - a few
//! nodes scattered right at the wrap point - ordering falls back to the
//! nodes' creation timestamps.

use std::future::Future;

/// A dominant gap must cover at least this share of the unsigned range to be
/// unambiguously the old-to-new wrap boundary (~93%).
const WRAP_GAP_THRESHOLD: u64 = (1u64 << 32) / 100 * 93;

/// One sequential sibling, parsed and ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SequentialEntry {
    /// Full node path.
    pub path: String,
    /// Child name as listed by the service.
    pub name: String,
    /// The prefix this name matched.
    pub prefix: &'static str,
    /// Sequence counter bits, unsigned interpretation.
    pub sequence_bits: u32,
}

impl SequentialEntry {
    /// The counter value as the service assigned it.
    #[cfg(test)]
    pub fn sequence(&self) -> i32 {
        self.sequence_bits as i32
    }
}

/// Parses `name` against `prefix`, accepting a suffix of exactly 10 digits or
/// a `-` followed by 10 digits (the service's fixed-width signed format).
fn parse_entry(
    parent: &str,
    name: &str,
    prefix: &'static str,
) -> Option<SequentialEntry> {
    let suffix = name.strip_prefix(prefix)?;
    let (negative, digits) = match suffix.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, suffix),
    };
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: i64 = digits.parse().ok()?;
    let value = if negative { -magnitude } else { magnitude };
    if value < i64::from(i32::MIN) || value > i64::from(i32::MAX) {
        return None;
    }

    let path = if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    };
    Some(SequentialEntry {
        path,
        name: name.to_string(),
        prefix,
        sequence_bits: (value as i32) as u32,
    })
}

/// Whether `name` is a well-formed sequential node name for `prefix`.
pub(crate) fn is_sequential_name(name: &str, prefix: &'static str) -> bool {
    parse_entry("/", name, prefix).is_some()
}

/// Filters `children` to names matching `prefix` (or `alt_prefix`) and
/// returns them ordered oldest to newest.
///
/// `ctime_lookup` resolves a node path to its creation time in milliseconds;
/// it is only consulted in the ambiguous-wrap case, and nodes it can no
/// longer find (deleted since the listing) are dropped. Returns an empty
/// vector when nothing matches.
pub(crate) async fn filter_and_sort<F, Fut>(
    parent: &str,
    children: &[String],
    prefix: &'static str,
    alt_prefix: Option<&'static str>,
    ctime_lookup: F,
) -> Vec<SequentialEntry>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Option<i64>>,
{
    let mut entries: Vec<SequentialEntry> = children
        .iter()
        .filter_map(|name| {
            parse_entry(parent, name, prefix)
                .or_else(|| alt_prefix.and_then(|alt| parse_entry(parent, name, alt)))
        })
        .collect();

    if entries.len() <= 1 {
        return entries;
    }

    entries.sort_by_key(|e| e.sequence_bits);

    // Largest gap around the unsigned ring. `gap_end` is the index of the
    // entry just after the gap, i.e. the oldest node if the gap is the wrap
    // boundary. Without wraparound the dominant gap is the one closing the
    // ring (last back to first), making the rotation a no-op.
    let mut max_gap = 0u64;
    let mut gap_end = 0usize;
    for i in 0..entries.len() {
        let current = u64::from(entries[i].sequence_bits);
        let next_index = (i + 1) % entries.len();
        let next = u64::from(entries[next_index].sequence_bits) + if next_index == 0 { 1 << 32 } else { 0 };
        let gap = next - current;
        if gap > max_gap {
            max_gap = gap;
            gap_end = next_index;
        }
    }

    if max_gap >= WRAP_GAP_THRESHOLD {
        entries.rotate_left(gap_end);
        return entries;
    }

    // Ambiguous: order by creation time instead, dropping nodes that have
    // already been deleted. Original index breaks timestamp ties.
    let mut stamped = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        if let Some(ctime) = ctime_lookup(entry.path.clone()).await {
            stamped.push((ctime, index, entry));
        }
    }
    stamped.sort_by_key(|(ctime, index, _)| (*ctime, *index));
    stamped.into_iter().map(|(_, _, entry)| entry).collect()
}
