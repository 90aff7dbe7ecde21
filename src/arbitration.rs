//! Grant arbitration over already-read window usage.
//!
//! The grant is a sequential reduction, not a `min` over independent
//! remainders: each quota in list order may only lower the candidate, and a
//! quota is recorded as reached only when it lowers it strictly. Ties go to
//! the first quota that produced the lower value.
//!
//! ```rust
//! use windowquota::arbitration::arbitrate;
//!
//! // limits 10 and 5, nothing used yet, 6 requested
//! let outcome = arbitrate(6, [10, 5], [0, 0]);
//! assert_eq!(outcome.granted, 5);
//! assert_eq!(outcome.reached, vec![1]);
//! ```

/// Result of one reduction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Arbitration {
    /// Units granted; credited to every quota of the request.
    pub granted: u64,
    /// Indices of quotas that strictly lowered the candidate, ascending.
    pub reached: Vec<usize>,
}

/// Remaining capacity of a quota with `limit` after `used` units.
pub fn remaining(limit: u64, used: u64) -> u64 {
    limit.saturating_sub(used)
}

/// Reduce `requested` through each `(limit, used)` pair in order.
///
/// `limits` and `used` are zipped; extra elements on either side are ignored.
pub fn arbitrate<L, U>(requested: u64, limits: L, used: U) -> Arbitration
where
    L: IntoIterator<Item = u64>,
    U: IntoIterator<Item = u64>,
{
    let mut outcome = Arbitration { granted: requested, reached: Vec::new() };
    for (index, (limit, used)) in limits.into_iter().zip(used).enumerate() {
        let left = remaining(limit, used);
        if left < outcome.granted {
            outcome.granted = left;
            outcome.reached.push(index);
        }
    }
    outcome
}
