//! Dense ordering keys.
//!
//! A key is a fraction in base 65536 written as its digits. Between any two
//! distinct keys another key exists, so reordering never has to renumber
//! other tasks. Every generated key ends in digits taken from the writing
//! agent's id, so two replicas that pick the same slot concurrently still
//! produce distinct keys. Generated keys never end in a zero digit, which
//! keeps lexicographic order on the digit vector equal to numeric order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::AgentId;

const BASE: u32 = 1 << 16;

/// Digits of writer id appended to every generated key.
const WRITER_DIGITS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(Vec<u32>);

impl OrderKey {
    /// Key for the first task of an empty list.
    pub fn first(writer: &AgentId) -> Self {
        Self::between(None, None, writer)
    }

    pub fn after(key: &OrderKey, writer: &AgentId) -> Self {
        Self::between(Some(key), None, writer)
    }

    pub fn before(key: &OrderKey, writer: &AgentId) -> Self {
        Self::between(None, Some(key), writer)
    }

    /// A key strictly between `lo` and `hi`. Missing bounds are open.
    ///
    /// If `hi` is not greater than `lo` it is ignored and the result is just
    /// greater than `lo`.
    pub fn between(lo: Option<&OrderKey>, hi: Option<&OrderKey>, writer: &AgentId) -> Self {
        let mut digits = midpoint(lo, hi);
        digits.extend(writer_digits(writer));
        Self(digits)
    }

    pub fn digits(&self) -> &[u32] {
        &self.0
    }
}

/// Shortest digit string strictly between the bounds. Works in `u64` so
/// out-of-range digits from a remote replica cannot overflow.
fn midpoint(lo: Option<&OrderKey>, hi: Option<&OrderKey>) -> Vec<u32> {
    let hi = hi.filter(|h| lo.map_or(true, |l| *h > l));
    let lo_digits: &[u32] = lo.map_or(&[], |k| &k.0);
    let hi_digits: &[u32] = hi.map_or(&[], |k| &k.0);

    let mut digits = Vec::new();
    let mut bounded_above = hi.is_some();
    for i in 0.. {
        let l = u64::from(lo_digits.get(i).copied().unwrap_or(0));
        let h = match (bounded_above, hi_digits.get(i)) {
            (true, Some(h)) => u64::from(*h),
            _ => u64::from(BASE),
        };

        if h > l + 1 {
            // Lies between two u32 values.
            digits.push((l + (h - l) / 2) as u32);
            break;
        }
        digits.push(l as u32);
        if h > l {
            bounded_above = false;
        }
    }
    digits
}

/// Non-zero digits derived from the writer's id.
fn writer_digits(writer: &AgentId) -> impl Iterator<Item = u32> + '_ {
    writer
        .as_bytes()
        .chunks_exact(2)
        .take(WRITER_DIGITS)
        .map(|pair| 1 + u32::from(u16::from_be_bytes([pair[0], pair[1]])) % (BASE - 1))
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, digit) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{:04x}", digit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(n: u8) -> AgentId {
        AgentId::from_bytes([n; 32])
    }

    #[test]
    fn test_first_key() {
        let key = OrderKey::first(&writer(1));
        assert_eq!(key.digits()[0], 32768);
        assert_eq!(key.digits().len(), 1 + WRITER_DIGITS);
        assert!(key.digits()[1..].iter().all(|d| *d != 0 && *d < BASE));
    }

    #[test]
    fn test_between_adjacent_digits() {
        let lo = OrderKey(vec![5]);
        let hi = OrderKey(vec![6]);
        let mid = OrderKey::between(Some(&lo), Some(&hi), &writer(1));
        assert!(lo < mid && mid < hi);
        assert_eq!(&mid.digits()[..2], &[5, 32768]);
    }

    #[test]
    fn test_concurrent_appends_differ_per_writer() {
        let last = OrderKey::first(&writer(1));
        let a = OrderKey::after(&last, &writer(2));
        let b = OrderKey::after(&last, &writer(3));
        assert_ne!(a, b);
        assert!(a > last && b > last);

        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let mid = OrderKey::between(Some(&lo), Some(&hi), &writer(4));
        assert!(lo < mid && mid < hi);
    }

    #[test]
    fn test_repeated_insertion_at_front_stays_ordered() {
        let mut hi = OrderKey::first(&writer(1));
        for _ in 0..64 {
            let key = OrderKey::before(&hi, &writer(1));
            assert!(key < hi);
            assert_ne!(key.digits().last(), Some(&0));
            hi = key;
        }
    }

    #[test]
    fn test_repeated_insertion_in_gap_stays_ordered() {
        let lo = OrderKey::first(&writer(1));
        let mut hi = OrderKey::after(&lo, &writer(1));
        for _ in 0..64 {
            let key = OrderKey::between(Some(&lo), Some(&hi), &writer(2));
            assert!(lo < key && key < hi);
            hi = key;
        }
    }

    #[test]
    fn test_equal_bounds_yield_greater_key() {
        let key = OrderKey::first(&writer(1));
        let next = OrderKey::between(Some(&key), Some(&key), &writer(1));
        assert!(next > key);
    }

    #[test]
    fn test_oversized_remote_digits() {
        let lo = OrderKey(vec![u32::MAX, u32::MAX]);
        let next = OrderKey::after(&lo, &writer(1));
        assert!(next > lo);

        let hi = OrderKey(vec![u32::MAX]);
        let mid = OrderKey::between(Some(&OrderKey(vec![u32::MAX - 1])), Some(&hi), &writer(1));
        assert!(mid < hi);
    }

    #[test]
    fn test_display() {
        assert_eq!(OrderKey(vec![1, 65535]).to_string(), "0001.ffff");
    }
}
