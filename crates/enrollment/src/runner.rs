//! Batch loop: repeat attempts on one device slot until a target number of
//! successes is reached.

use crate::adapters::SharedSlot;
use crate::attempt::AttemptRequest;
use crate::cancel::CancelToken;
use crate::error::EnrollmentError;
use crate::orchestrator::{AttemptReport, Orchestrator};
use account_ledger::FailureReason;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Why a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    AttemptLimit,
    DeviceFatal,
    Cancelled,
}

/// Totals for one batch run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub attempts: usize,
    pub successes: usize,
    pub failures: HashMap<FailureReason, usize>,
    pub total_cost: f64,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
    pub reports: Vec<AttemptReport>,
}

impl RunSummary {
    /// Mean wall time per successful account.
    pub fn average_per_success(&self) -> Option<Duration> {
        if self.successes == 0 {
            return None;
        }
        Some(self.elapsed / self.successes as u32)
    }
}

/// Drives sequential attempts against a single device slot.
pub struct EnrollmentRunner {
    orchestrator: Arc<Orchestrator>,
    slot: SharedSlot,
    request: AttemptRequest,
}

impl EnrollmentRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, slot: SharedSlot, request: AttemptRequest) -> Self {
        Self {
            orchestrator,
            slot,
            request,
        }
    }

    /// Run attempts until `target` successes, `max_attempts` attempts, a
    /// device-fatal failure, or cancellation.
    pub async fn run(
        &self,
        target: usize,
        max_attempts: usize,
        cancel: &CancelToken,
    ) -> Result<RunSummary, EnrollmentError> {
        let started = Instant::now();
        let mut summary = RunSummary {
            attempts: 0,
            successes: 0,
            failures: HashMap::new(),
            total_cost: 0.0,
            elapsed: Duration::ZERO,
            stop_reason: StopReason::AttemptLimit,
            reports: Vec::new(),
        };

        info!(target, max_attempts, "Starting enrollment run");

        let stop_reason = loop {
            if summary.successes >= target {
                break StopReason::TargetReached;
            }
            if summary.attempts >= max_attempts {
                break StopReason::AttemptLimit;
            }
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let report = self
                .orchestrator
                .run_attempt(&self.slot, &self.request, cancel)
                .await?;

            summary.attempts += 1;
            summary.total_cost += report.cost;
            if report.is_success() {
                summary.successes += 1;
            } else if let Some(reason) = report.reason {
                *summary.failures.entry(reason).or_insert(0) += 1;
            }

            let device_fatal = report.device_fatal();
            let cancelled = report.reason == Some(FailureReason::Cancelled);
            summary.reports.push(report);

            if device_fatal {
                warn!("Device slot unusable, stopping run");
                break StopReason::DeviceFatal;
            }
            if cancelled {
                break StopReason::Cancelled;
            }
        };

        summary.stop_reason = stop_reason;
        summary.elapsed = started.elapsed();

        info!(
            attempts = summary.attempts,
            successes = summary.successes,
            total_cost = summary.total_cost,
            stop_reason = ?summary.stop_reason,
            avg_per_success = ?summary.average_per_success(),
            "Enrollment run finished"
        );

        Ok(summary)
    }
}
