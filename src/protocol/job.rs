//! Job identifiers for request/response correlation.
//!
//! The generator only guarantees unique issuance. Matching a reply's
//! `target_job_id` against an earlier request's `source_job_id` is left to the
//! handler that sent the request.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 64-bit job identifier. All bits set means "no job".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl JobId {
    pub const NONE: JobId = JobId(u64::MAX);

    pub fn is_none(self) -> bool {
        self == JobId::NONE
    }
}

impl Default for JobId {
    fn default() -> Self {
        JobId::NONE
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Lock-free monotonically increasing job id source.
#[derive(Debug, Default)]
pub struct JobIdGenerator {
    counter: AtomicU64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next id. The first id issued is 1.
    pub fn next_job_id(&self) -> JobId {
        JobId(self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
    }

    /// Last id issued, or 0 if none yet.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let jobs = JobIdGenerator::new();
        assert_eq!(jobs.next_job_id(), JobId(1));
        assert_eq!(jobs.next_job_id(), JobId(2));
        assert_eq!(jobs.current(), 2);
    }

    #[test]
    fn test_none_sentinel() {
        assert!(JobId::default().is_none());
        assert_eq!(JobId::NONE.to_string(), "none");
        assert_eq!(JobId(42).to_string(), "42");
    }
}
