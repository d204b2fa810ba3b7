//! Utility functions for address-block calculations.
//!
//! These helpers are useful when implementing a custom transport that wants to
//! batch transfers the same way the register tables do.

use crate::value::Address;

/// Merges ascending addresses into inclusive runs of consecutive addresses.
///
/// Each run can be fetched with a single burst transfer instead of one transfer
/// per register. Input must be sorted ascending; duplicates are folded into the
/// run they belong to.
///
/// # Example
/// ```
/// use embedded_regwatch::helpers::coalesce;
///
/// let mut addrs: Vec<u8> = (0x00..=0x09).collect();
/// addrs.push(0x20);
/// assert_eq!(coalesce(addrs), vec![(0x00, 0x09), (0x20, 0x20)]);
/// ```
pub fn coalesce<A: Address>(addresses: impl IntoIterator<Item = A>) -> Vec<(A, A)> {
    let mut runs: Vec<(A, A)> = Vec::new();
    for addr in addresses {
        match runs.last_mut() {
            Some((_, end)) if *end == addr => {}
            Some((_, end)) if end.next() == Some(addr) => *end = addr,
            _ => runs.push((addr, addr)),
        }
    }
    runs
}

/// Total number of addresses covered by `runs`.
pub fn run_span<A: Address>(runs: &[(A, A)]) -> usize {
    runs.iter().map(|(start, end)| start.distance(*end)).sum()
}
