//! Provides an inversion-list representation of code point sets.
//!
//! An inversion list stores the boundaries of its ranges in one sorted
//! vector, with index parity carrying membership: a boundary at an even
//! index opens an included range, a boundary at an odd index closes it. A
//! list whose last boundary sits at an even index extends to the maximum
//! code point. This keeps set algebra linear in the number of boundaries
//! rather than in the number of code points covered.
//!
//! # Example
//!
//! ```
//! use pattern_program::interval::InversionList;
//!
//! let mut list = InversionList::new();
//! list.append_range('a' as u32, 'c' as u32);
//! list.append_range('x' as u32, 'z' as u32);
//!
//! assert!(list.contains('b' as u32));
//! assert!(!list.contains('w' as u32));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

/// The largest valid Unicode code point.
pub const MAX_CODE_POINT: u32 = 0x10FFFF;

/// How a pair of overlapping lists combines during a merge scan.
///
/// Each variant names the membership count (how many of the two operands
/// contain a code point) at which the output flips between excluded and
/// included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    /// Included while at least one operand contains the point.
    Union,
    /// Included while both operands contain the point.
    Intersect,
    /// Included while exactly one operand contains the point.
    SymmetricDifference,
}

/// Represents a set of code points as a sorted boundary vector.
///
/// The backing vector always begins with a `0` boundary; `skip` records
/// whether that leading boundary belongs to the logical list. Toggling
/// `skip` is what makes [`InversionList::invert`] constant time.
///
/// Lookups remember the boundary index of the last hit so that runs of
/// nearby queries, the common access pattern while classes are built,
/// resolve without a fresh binary search. The hint is a relaxed atomic so
/// finished lists stay shareable across threads.
#[derive(Debug)]
pub struct InversionList {
    bounds: Vec<u32>,
    skip: bool,
    hint: AtomicUsize,
}

impl InversionList {
    /// Returns the empty set.
    pub fn new() -> Self {
        Self {
            bounds: vec![0],
            skip: true,
            hint: AtomicUsize::new(0),
        }
    }

    /// Returns the set containing every code point.
    pub fn full() -> Self {
        Self {
            bounds: vec![0],
            skip: false,
            hint: AtomicUsize::new(0),
        }
    }

    /// Builds a list from inclusive ranges in any order, merging overlaps
    /// and adjacency.
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut sorted: Vec<(u32, u32)> = ranges.into_iter().collect();
        sorted.sort_unstable();

        let mut list = Self::new();
        let mut pending: Option<(u32, u32)> = None;
        for (lo, hi) in sorted {
            match pending {
                None => pending = Some((lo, hi)),
                Some((plo, phi)) if lo <= phi.saturating_add(1) => {
                    pending = Some((plo, phi.max(hi)));
                }
                Some((plo, phi)) => {
                    list.append_range(plo, phi);
                    pending = Some((lo, hi));
                }
            }
        }
        if let Some((plo, phi)) = pending {
            list.append_range(plo, phi);
        }
        list
    }

    fn from_bounds(logical: Vec<u32>) -> Self {
        if logical.first() == Some(&0) {
            Self {
                bounds: logical,
                skip: false,
                hint: AtomicUsize::new(0),
            }
        } else {
            let mut bounds = Vec::with_capacity(logical.len() + 1);
            bounds.push(0);
            bounds.extend(logical);
            Self {
                bounds,
                skip: true,
                hint: AtomicUsize::new(0),
            }
        }
    }

    /// The logical boundary slice, skipping the placeholder leading zero
    /// when it is not part of the set.
    fn logical(&self) -> &[u32] {
        &self.bounds[self.skip as usize..]
    }

    /// Returns true when the set contains no code points.
    pub fn is_empty(&self) -> bool {
        self.logical().is_empty()
    }

    /// Returns true when the set contains every code point.
    pub fn is_full(&self) -> bool {
        self.logical() == [0]
    }

    /// The number of contiguous ranges in the set.
    pub fn range_count(&self) -> usize {
        (self.logical().len() + 1) / 2
    }

    /// When the set holds exactly one code point, returns it.
    pub fn single_code_point(&self) -> Option<u32> {
        let b = self.logical();
        match b {
            [lo, hi] if *hi == lo + 1 => Some(*lo),
            _ => None,
        }
    }

    /// Membership test via binary search, seeded by the index of the most
    /// recent hit.
    pub fn contains(&self, cp: u32) -> bool {
        let b = self.logical();
        if b.is_empty() {
            return false;
        }

        let hint = self.hint.load(Ordering::Relaxed);
        if hint > 0 && hint <= b.len() {
            let lo_ok = b[hint - 1] <= cp;
            let hi_ok = hint == b.len() || cp < b[hint];
            if lo_ok && hi_ok {
                return hint % 2 == 1;
            }
        }

        // partition_point yields the count of boundaries <= cp; an odd
        // count leaves cp inside an included range.
        let k = b.partition_point(|&bound| bound <= cp);
        self.hint.store(k, Ordering::Relaxed);
        k % 2 == 1
    }

    /// Appends an inclusive range, which must start at or after the end of
    /// the last appended range. Violating that ordering is a programming
    /// error, not an input error, and aborts.
    pub fn append_range(&mut self, lo: u32, hi: u32) {
        assert!(
            lo <= hi && hi <= MAX_CODE_POINT,
            "append_range: invalid range {:#x}..={:#x}",
            lo,
            hi
        );
        self.hint.store(0, Ordering::Relaxed);

        let logical_len = self.logical().len();
        if logical_len == 0 {
            if lo == 0 {
                self.skip = false;
            } else {
                self.bounds.push(lo);
            }
            if hi < MAX_CODE_POINT {
                self.bounds.push(hi + 1);
            }
            return;
        }

        assert!(
            logical_len % 2 == 0,
            "append_range: list already extends to the maximum code point"
        );
        let end = *self.bounds.last().unwrap();
        assert!(
            lo >= end,
            "append_range: range {:#x}..={:#x} starts before {:#x}",
            lo,
            hi,
            end
        );

        if lo == end {
            // Adjacent to the previous range: extend it instead of opening
            // a new one.
            self.bounds.pop();
        } else {
            self.bounds.push(lo);
        }
        if hi < MAX_CODE_POINT {
            self.bounds.push(hi + 1);
        }
    }

    /// Complements the set in place by toggling whether code point 0 is a
    /// member. Constant time by construction.
    pub fn invert(&mut self) {
        self.skip = !self.skip;
        self.hint.store(0, Ordering::Relaxed);
    }

    /// The union of two sets.
    pub fn union(&self, other: &Self) -> Self {
        self.combine(other, Combine::Union, false)
    }

    /// The union of this set with the complement of `other`, without
    /// materializing the complement.
    pub fn union_complement(&self, other: &Self) -> Self {
        self.combine(other, Combine::Union, true)
    }

    /// The intersection of two sets.
    pub fn intersect(&self, other: &Self) -> Self {
        self.combine(other, Combine::Intersect, false)
    }

    /// The intersection of this set with the complement of `other`.
    pub fn intersect_complement(&self, other: &Self) -> Self {
        self.combine(other, Combine::Intersect, true)
    }

    /// The set difference `self - other`.
    pub fn subtract(&self, other: &Self) -> Self {
        self.intersect_complement(other)
    }

    /// The set of code points in exactly one of the two operands.
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.combine(other, Combine::SymmetricDifference, false)
    }

    /// One merge-sort-style scan over both boundary vectors. A membership
    /// count (0, 1 or 2) tracks how many operands contain the current
    /// position; the output records a boundary exactly where the count
    /// crosses the threshold the operation cares about.
    fn combine(&self, other: &Self, mode: Combine, complement_other: bool) -> Self {
        let a = self.logical();
        let b = other.logical();
        let mut out: Vec<u32> = Vec::with_capacity(a.len() + b.len());

        let mut in_a = false;
        let mut in_b = complement_other;
        let mut cur = Self::included(mode, in_a, in_b);
        if cur {
            push_bound(&mut out, 0);
        }

        let (mut ia, mut ib) = (0usize, 0usize);
        while ia < a.len() || ib < b.len() {
            let va = a.get(ia).copied();
            let vb = b.get(ib).copied();
            let v = match (va, vb) {
                (Some(x), Some(y)) => x.min(y),
                (Some(x), None) => x,
                (None, Some(y)) => y,
                (None, None) => unreachable!(),
            };
            if va == Some(v) {
                in_a = !in_a;
                ia += 1;
            }
            if vb == Some(v) {
                in_b = !in_b;
                ib += 1;
            }
            let now = Self::included(mode, in_a, in_b);
            if now != cur {
                push_bound(&mut out, v);
                cur = now;
            }
        }

        Self::from_bounds(out)
    }

    fn included(mode: Combine, in_a: bool, in_b: bool) -> bool {
        let count = in_a as u8 + in_b as u8;
        match mode {
            Combine::Union => count >= 1,
            Combine::Intersect => count == 2,
            Combine::SymmetricDifference => count == 1,
        }
    }

    /// Iterates the inclusive ranges of the set in ascending order.
    pub fn ranges(&self) -> Ranges<'_> {
        Ranges {
            bounds: self.logical(),
            idx: 0,
        }
    }

    /// Iterates every member code point in ascending order.
    pub fn code_points(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges().flat_map(|(lo, hi)| lo..=hi)
    }
}

impl Default for InversionList {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InversionList {
    fn clone(&self) -> Self {
        Self {
            bounds: self.bounds.clone(),
            skip: self.skip,
            hint: AtomicUsize::new(0),
        }
    }
}

impl PartialEq for InversionList {
    fn eq(&self, other: &Self) -> bool {
        self.logical() == other.logical()
    }
}

impl Eq for InversionList {}

impl FromIterator<(u32, u32)> for InversionList {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        Self::from_ranges(iter)
    }
}

/// Records a boundary transition, cancelling a zero-width flip-flop at the
/// same value.
fn push_bound(out: &mut Vec<u32>, v: u32) {
    if out.last() == Some(&v) {
        out.pop();
    } else {
        out.push(v);
    }
}

/// Iterator over the inclusive ranges of an [`InversionList`].
#[derive(Debug, Clone)]
pub struct Ranges<'a> {
    bounds: &'a [u32],
    idx: usize,
}

impl<'a> Iterator for Ranges<'a> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.bounds.len() {
            return None;
        }
        let lo = self.bounds[self.idx];
        let hi = if self.idx + 1 < self.bounds.len() {
            self.bounds[self.idx + 1] - 1
        } else {
            MAX_CODE_POINT
        };
        self.idx += 2;
        Some((lo, hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ranges: &[(char, char)]) -> InversionList {
        InversionList::from_ranges(ranges.iter().map(|&(lo, hi)| (lo as u32, hi as u32)))
    }

    #[test]
    fn should_report_membership_across_two_ranges() {
        let input_output = vec![
            ('a', true),
            ('b', true),
            ('c', true),
            ('d', false),
            ('w', false),
            ('x', true),
            ('z', true),
            ('{', false),
        ];

        let l = list(&[('a', 'c'), ('x', 'z')]);
        assert_eq!(l.range_count(), 2);

        for (test_id, (cp, expected)) in input_output.into_iter().enumerate() {
            assert_eq!((test_id, expected), (test_id, l.contains(cp as u32)));
        }
    }

    #[test]
    fn should_resolve_sequential_lookups_after_a_cached_hit() {
        let l = list(&[('a', 'f'), ('p', 't')]);

        // Walk an ascending run so later probes land on the hinted range.
        for cp in 'a'..='f' {
            assert!(l.contains(cp as u32));
        }
        assert!(!l.contains('g' as u32));
        assert!(l.contains('q' as u32));
        assert!(l.contains('r' as u32));
        assert!(!l.contains('u' as u32));
    }

    #[test]
    fn should_coalesce_adjacent_appends() {
        let mut l = InversionList::new();
        l.append_range(10, 19);
        l.append_range(20, 29);
        assert_eq!(l.range_count(), 1);
        assert_eq!(l.ranges().collect::<Vec<_>>(), vec![(10, 29)]);
    }

    #[test]
    #[should_panic]
    fn should_abort_on_out_of_order_append() {
        let mut l = InversionList::new();
        l.append_range(50, 60);
        l.append_range(40, 45);
    }

    #[test]
    fn should_round_trip_a_double_inversion() {
        let orig = list(&[('0', '9'), ('A', 'F')]);
        let mut l = orig.clone();
        l.invert();
        assert!(!l.contains('5' as u32));
        assert!(l.contains('G' as u32));
        l.invert();
        assert_eq!(orig, l);
    }

    #[test]
    fn should_extend_to_the_maximum_code_point() {
        let mut l = InversionList::new();
        l.append_range(0x100, MAX_CODE_POINT);
        assert!(l.contains(MAX_CODE_POINT));
        assert!(!l.contains(0xFF));
        assert_eq!(l.ranges().collect::<Vec<_>>(), vec![(0x100, MAX_CODE_POINT)]);
    }

    #[test]
    fn should_satisfy_de_morgan_over_union_and_intersection() {
        let a = list(&[('a', 'm'), ('0', '4')]);
        let b = list(&[('g', 'z'), ('2', '8')]);

        let mut left = a.union_complement(&b);
        left.invert();

        let mut not_a = a.clone();
        not_a.invert();
        let right = not_a.intersect(&b);

        assert_eq!(left, right);
    }

    #[test]
    fn should_subtract_via_a_complemented_second_operand() {
        let a = list(&[('a', 'z')]);
        let b = list(&[('m', 'p')]);

        let diff = a.subtract(&b);
        assert!(diff.contains('a' as u32));
        assert!(!diff.contains('n' as u32));
        assert!(diff.contains('q' as u32));
        assert_eq!(diff.ranges().count(), 2);
    }

    #[test]
    fn should_compute_symmetric_difference_as_single_membership() {
        let a = list(&[('a', 'f')]);
        let b = list(&[('d', 'k')]);

        let xor = a.symmetric_difference(&b);
        assert!(xor.contains('b' as u32));
        assert!(!xor.contains('e' as u32));
        assert!(xor.contains('j' as u32));

        let manual = a.union(&b).subtract(&a.intersect(&b));
        assert_eq!(xor, manual);
    }

    #[test]
    fn should_build_from_unsorted_overlapping_ranges() {
        let l = InversionList::from_ranges(vec![(20, 30), (5, 10), (8, 15), (31, 40)]);
        assert_eq!(l.ranges().collect::<Vec<_>>(), vec![(5, 15), (20, 40)]);
    }

    #[test]
    fn should_treat_the_empty_and_full_sets_as_inverses() {
        let mut empty = InversionList::new();
        assert!(empty.is_empty());
        empty.invert();
        assert!(empty.is_full());
        assert!(empty.contains(0));
        assert!(empty.contains(MAX_CODE_POINT));
    }

    #[test]
    fn should_expose_a_single_code_point() {
        let mut l = InversionList::new();
        l.append_range('q' as u32, 'q' as u32);
        assert_eq!(l.single_code_point(), Some('q' as u32));

        let two = list(&[('a', 'b')]);
        assert_eq!(two.single_code_point(), None);
    }
}
