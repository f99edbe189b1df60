//! Core functionality for actual scanning behaviour.
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::address::expand_addresses;
use crate::budget::{infer_budget, ConcurrencyBudget};
use crate::device::{Device, Target};
use crate::error::ScanError;
use crate::input::ScanConfig;

mod limiter;
mod probe;

pub use limiter::{ConcurrencyLimiter, Permit};
pub use probe::{probe, Outcome, PortProbe};

/// Dispatches one probe per target, never more at once than the budget
/// allows, and assembles the devices in target order.
///
/// A scanner owns one cancellation token for its lifetime. Once cancelled,
/// every later run fails.
#[derive(Debug)]
pub struct Scanner {
    config: ScanConfig,
    limiter: ConcurrencyLimiter,
    probe: Arc<PortProbe>,
    cancel: CancellationToken,
}

impl Scanner {
    /// Creates a scanner probing with `config` and at most `budget`
    /// probes in flight.
    pub fn new(config: ScanConfig, budget: ConcurrencyBudget) -> Self {
        let probe = PortProbe::new(config.timeout(), config.exhaustion_retries());
        Self {
            limiter: ConcurrencyLimiter::new(budget),
            probe: Arc::new(probe),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Settings every run of this scanner uses.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The gate bounding in-flight probes, exposed for instrumentation.
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Handle that aborts an in-flight scan when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Expands `addresses` and probes every resulting target.
    ///
    /// Closed devices are dropped when the configuration asks for open ones
    /// only; otherwise the result lines up with the expanded targets.
    pub async fn run<S: AsRef<str>>(&self, addresses: &[S]) -> Result<Vec<Device>, ScanError> {
        let targets = expand_addresses(
            addresses,
            self.config.ports(),
            self.config.protocol(),
            self.config.expand_entire_block(),
        )?;

        let devices = self.run_targets(&targets).await?;
        Ok(filter_open(devices, self.config.return_only_open()))
    }

    /// Probes already expanded targets. `result[i]` describes `targets[i]`.
    ///
    /// A permit is acquired before each probe is spawned and held by that
    /// probe until it finishes. If a permit cannot be acquired every probe
    /// still running is aborted and the error returned.
    pub async fn run_targets(&self, targets: &[Target]) -> Result<Vec<Device>, ScanError> {
        debug!(
            "Start scanning targets.\nBudget {}\nTimeout {:?}\nTargets all together {}",
            self.limiter.capacity(),
            self.config.timeout(),
            targets.len()
        );

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let permit = match self.limiter.acquire(&self.cancel).await {
                Ok(permit) => permit,
                Err(e) => {
                    handles.iter().for_each(tokio::task::JoinHandle::abort);
                    return Err(e);
                }
            };

            let probe = Arc::clone(&self.probe);
            let cancel = self.cancel.clone();
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = probe.probe(&target, &cancel).await;
                let mut device = Device::from(&target);
                device.open = outcome.is_open();
                (device, outcome)
            }));
        }

        let mut errors: HashSet<String> = HashSet::new();
        let devices = targets
            .iter()
            .zip(join_all(handles).await)
            .map(|(target, joined)| match joined {
                Ok((device, outcome)) => {
                    match outcome {
                        Outcome::TransportError(e) => {
                            if errors.len() < 1000 {
                                errors.insert(e);
                            }
                        }
                        Outcome::RetriesExhausted { attempts } => {
                            warn!("{target} left closed after {attempts} exhausted attempts");
                        }
                        _ => {}
                    }
                    device
                }
                Err(e) => {
                    warn!("Probe for {target} did not complete: {e}");
                    Device::from(target)
                }
            })
            .collect::<Vec<_>>();

        if !errors.is_empty() {
            warn!("{} targets failed with transport errors", errors.len());
        }
        debug!("Typical transport errors {:?}", errors);

        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        debug!(
            "Open devices found: {}",
            devices.iter().filter(|d| d.open).count()
        );
        Ok(devices)
    }
}

/// Keeps only open devices when `only_open` is set, preserving order.
pub fn filter_open(devices: Vec<Device>, only_open: bool) -> Vec<Device> {
    if only_open {
        devices.into_iter().filter(|device| device.open).collect()
    } else {
        devices
    }
}

/// Scans `addresses` with a budget read from the open file limit.
///
/// Callers that want a fallback when the limit cannot be read build a
/// [`Scanner`] with [`infer_budget_or_default`](crate::budget::infer_budget_or_default).
pub async fn scan<S: AsRef<str>>(
    addresses: &[S],
    config: ScanConfig,
) -> Result<Vec<Device>, ScanError> {
    let budget = infer_budget()?;
    Scanner::new(config, budget).run(addresses).await
}
