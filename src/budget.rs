//! Derives how many probes may run at once from the open file limit.
use std::fmt;
use std::num::NonZeroUsize;

use log::{debug, warn};
use rlimit::Resource;
use tokio::sync::Semaphore;

use crate::error::ScanError;

/// Maximum number of probes in flight during one scan.
///
/// Computed once when a scanner is built and never revised while it runs,
/// even if the process limit changes underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConcurrencyBudget(NonZeroUsize);

impl ConcurrencyBudget {
    /// Budget used when the environment cannot report a limit.
    pub const DEFAULT: ConcurrencyBudget = ConcurrencyBudget(NonZeroUsize::MIN.saturating_add(255));

    /// Wraps a raw capacity, clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        ConcurrencyBudget(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    /// The capacity as a plain integer, always at least one.
    pub fn get(self) -> usize {
        self.0.get()
    }

    fn from_limit(soft: u64) -> Self {
        Self::new(usize::try_from(soft).unwrap_or(usize::MAX))
    }
}

impl Default for ConcurrencyBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ConcurrencyBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reads the soft open file limit of this process.
///
/// ```rust
/// # use netsweep::budget::infer_budget;
/// let budget = infer_budget().unwrap();
/// assert!(budget.get() >= 1);
/// ```
pub fn infer_budget() -> Result<ConcurrencyBudget, ScanError> {
    let (soft, hard) = Resource::NOFILE
        .get()
        .map_err(ScanError::EnvironmentQueryFailed)?;
    debug!("Open file limit: soft {soft}, hard {hard}");

    Ok(ConcurrencyBudget::from_limit(soft))
}

/// Like [`infer_budget`], substituting [`ConcurrencyBudget::DEFAULT`] when
/// the limit cannot be read.
pub fn infer_budget_or_default() -> ConcurrencyBudget {
    infer_budget().unwrap_or_else(|e| {
        warn!("{e}, falling back to {} concurrent probes", ConcurrencyBudget::DEFAULT);
        ConcurrencyBudget::DEFAULT
    })
}

/// Raises the soft and hard open file limit to `limit`.
///
/// Returns the soft limit in effect afterwards; when the change is refused
/// the previous limit stays and is returned instead.
pub fn raise_nofile_limit(limit: u64) -> Result<u64, ScanError> {
    if let Err(e) = Resource::NOFILE.set(limit, limit) {
        warn!("Failed to set the open file limit to {limit}: {e}");
    } else {
        debug!("Open file limit raised to {limit}");
    }

    let (soft, _) = Resource::NOFILE
        .get()
        .map_err(ScanError::EnvironmentQueryFailed)?;
    Ok(soft)
}

#[cfg(test)]
mod tests {
    use super::{infer_budget, infer_budget_or_default, ConcurrencyBudget};
    use tokio::sync::Semaphore;

    #[test]
    fn budget_is_at_least_one() {
        assert_eq!(ConcurrencyBudget::new(0).get(), 1);
        assert_eq!(ConcurrencyBudget::new(7).get(), 7);
    }

    #[test]
    fn unlimited_ceiling_is_clamped() {
        let budget = ConcurrencyBudget::from_limit(u64::MAX);
        assert_eq!(budget.get(), Semaphore::MAX_PERMITS);
    }

    #[test]
    fn default_budget_is_conservative() {
        assert_eq!(ConcurrencyBudget::default().get(), 256);
    }

    #[cfg(unix)]
    #[test]
    fn budget_follows_soft_limit() {
        let (soft, _) = rlimit::Resource::NOFILE.get().unwrap();
        let budget = infer_budget().unwrap();

        assert_eq!(budget, ConcurrencyBudget::from_limit(soft));
        assert_eq!(infer_budget_or_default(), budget);
    }
}
