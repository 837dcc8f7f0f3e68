//! Resumable sweeps over a range of generated identifiers.
//!
//! A [`Scanner`] walks the counter upward from its start point, assesses
//! one identifier at a time, paces itself according to how the previous
//! check went, and persists a [`ScanState`] snapshot periodically and once
//! more when it stops.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consensus::{Assess, ConsensusResult, ConsensusStatus};
use crate::generate::IdentifierKind;
use crate::pacing::{Interrupt, Sleep, jittered};
use crate::progress::{ProgressKey, ProgressStore};

/// Resumable position of a scan.
///
/// `position` is the next counter to check. It only ever moves forward,
/// by one per completed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    /// Next counter value to check.
    #[serde(rename = "current_number")]
    pub position: u64,
    /// Identifier length.
    pub length: usize,
    /// Identifier alphabet.
    #[serde(rename = "username_type")]
    pub kind: IdentifierKind,
    /// Identifiers judged available, in discovery order.
    #[serde(rename = "available_usernames")]
    pub found: Vec<String>,
    /// Checks completed across all runs of this scan.
    #[serde(rename = "check_count")]
    pub total_checks: u64,
}

impl ScanState {
    /// A state with nothing found yet, positioned at `position`.
    #[must_use]
    pub fn fresh(key: ProgressKey, position: u64) -> Self {
        Self {
            position,
            length: key.length,
            kind: key.kind,
            found: Vec::new(),
            total_checks: 0,
        }
    }

    /// The key this state belongs to.
    #[must_use]
    pub const fn key(&self) -> ProgressKey {
        ProgressKey::new(self.length, self.kind)
    }
}

/// Delays between checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPacing {
    /// Wait after a definitive check (milliseconds).
    pub between_checks_ms: u64,
    /// Random extra on top of `between_checks_ms`, up to this many milliseconds.
    pub between_checks_jitter_ms: u64,
    /// Base wait after a failed check (milliseconds).
    pub failure_base_ms: u64,
    /// Extra wait per consecutive failure (milliseconds).
    pub failure_step_ms: u64,
    /// Consecutive failures that trigger a cool-down instead.
    pub escalation_ceiling: u32,
    /// Cool-down length (milliseconds).
    pub cooldown_ms: u64,
}

impl Default for ScanPacing {
    fn default() -> Self {
        Self {
            between_checks_ms: 2_000,
            between_checks_jitter_ms: 1_000,
            failure_base_ms: 2_000,
            failure_step_ms: 2_000,
            escalation_ceiling: 10,
            cooldown_ms: 30_000,
        }
    }
}

/// Limits and cadence of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Stop once this many identifiers were found in the current run.
    /// `None` never stops on findings.
    pub target_found: Option<usize>,
    /// Stop after this many checks in the current run.
    pub max_checks: Option<u64>,
    /// Hard cap on the counter, whatever the identifier space.
    pub space_cap: u64,
    /// Save a snapshot every this many checks.
    pub save_interval: u64,
    /// Delays between checks.
    pub pacing: ScanPacing,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            target_found: Some(10),
            max_checks: None,
            space_cap: 50_000,
            save_interval: 25,
            pacing: ScanPacing::default(),
        }
    }
}

/// Where a scan begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPoint {
    /// Resume the stored snapshot for this key, or start at zero.
    Stored,
    /// Start at zero, overwriting any stored snapshot on the first save.
    Fresh,
    /// Continue from a state the caller already holds.
    Resume(ScanState),
    /// Start at an explicit counter. Nothing is persisted, so an unrelated
    /// resumable run for the same key is left alone.
    Manual(u64),
}

/// Why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The target number of findings was reached.
    TargetReached,
    /// The per-run check limit was reached.
    CheckLimit,
    /// The counter passed the upper bound.
    Exhausted,
    /// An interrupt was observed.
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetReached => write!(f, "target reached"),
            Self::CheckLimit => write!(f, "check limit reached"),
            Self::Exhausted => write!(f, "range exhausted"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Result of one scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// State at the moment the scan stopped, as persisted.
    pub state: ScanState,
    /// What ended the run.
    pub stop: StopReason,
    /// Checks completed in this run.
    pub checked: u64,
    /// Available results from this run, in order.
    pub findings: Vec<ConsensusResult>,
}

/// Drives the consensus engine over a counter range.
#[derive(Debug)]
pub struct Scanner<A, P, S> {
    key: ProgressKey,
    settings: ScanSettings,
    assessor: A,
    store: P,
    sleep: S,
    interrupt: Interrupt,
}

impl<A: Assess, P: ProgressStore, S: Sleep> Scanner<A, P, S> {
    /// Scanner for the identifiers described by `key`.
    pub fn new(key: ProgressKey, settings: ScanSettings, assessor: A, store: P, sleep: S) -> Self {
        Self {
            key,
            settings,
            assessor,
            store,
            sleep,
            interrupt: Interrupt::new(),
        }
    }

    /// Stop at the next opportunity once `interrupt` fires.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Highest counter this scan will check.
    #[must_use]
    pub fn upper_bound(&self) -> u64 {
        self.key
            .kind
            .upper_bound(self.key.length, self.settings.space_cap)
    }

    fn initial_state(&self, start: StartPoint) -> ScanState {
        match start {
            StartPoint::Stored => self
                .store
                .load(self.key)
                .unwrap_or_else(|| ScanState::fresh(self.key, 0)),
            StartPoint::Fresh => ScanState::fresh(self.key, 0),
            StartPoint::Resume(state) if state.key() == self.key => state,
            StartPoint::Resume(state) => {
                warn!(
                    expected = %self.key,
                    got = %state.key(),
                    "resume state belongs to another scan, starting fresh"
                );
                ScanState::fresh(self.key, 0)
            }
            StartPoint::Manual(position) => ScanState::fresh(self.key, position),
        }
    }

    fn persist(&self, state: &ScanState) {
        if let Err(e) = self.store.save(self.key, state) {
            warn!(error = %e, "could not save progress, continuing");
        }
    }

    fn stop_reason(&self, state: &ScanState, checked: u64, found: usize) -> Option<StopReason> {
        if self.interrupt.is_triggered() {
            return Some(StopReason::Interrupted);
        }
        if self.settings.target_found.is_some_and(|t| found >= t) {
            return Some(StopReason::TargetReached);
        }
        if self.settings.max_checks.is_some_and(|m| checked >= m) {
            return Some(StopReason::CheckLimit);
        }
        if state.position > self.upper_bound() {
            return Some(StopReason::Exhausted);
        }
        None
    }

    /// Scan until a stop condition holds, then persist the final state
    /// unless the run started from a manual offset.
    pub fn run(&mut self, start: StartPoint) -> ScanOutcome {
        let persist = !matches!(start, StartPoint::Manual(_));
        let mut state = self.initial_state(start);
        let upper = self.upper_bound();
        info!(
            scan = %self.key,
            from = state.position,
            to = upper,
            persist,
            "starting scan"
        );

        let pacing = self.settings.pacing.clone();
        let save_interval = self.settings.save_interval.max(1);
        let mut findings = Vec::new();
        let mut checked = 0u64;
        let mut failures = 0u32;
        let mut pending: Option<Duration> = None;

        let stop = loop {
            if let Some(reason) = self.stop_reason(&state, checked, findings.len()) {
                break reason;
            }
            if let Some(delay) = pending.take() {
                self.sleep.sleep(delay);
                if self.interrupt.is_triggered() {
                    break StopReason::Interrupted;
                }
            }

            let identifier = self.key.kind.generate(state.position, self.key.length);
            let result = self.assessor.assess(&identifier);
            if result.status == ConsensusStatus::Interrupted {
                break StopReason::Interrupted;
            }

            state.position += 1;
            state.total_checks += 1;
            checked += 1;
            info!(
                check = state.total_checks,
                identifier = identifier.as_str(),
                status = %result.status,
                samples = result.sample_count,
                "checked"
            );

            if result.status.is_available() {
                info!(identifier = identifier.as_str(), "found available identifier");
                state.found.push(identifier);
                findings.push(result.clone());
            }
            if persist && checked % save_interval == 0 {
                self.persist(&state);
            }

            pending = Some(if result.status.is_failure() {
                failures += 1;
                if failures >= pacing.escalation_ceiling {
                    warn!(failures, "too many consecutive failures, cooling down");
                    failures = 0;
                    Duration::from_millis(pacing.cooldown_ms)
                } else {
                    Duration::from_millis(pacing.failure_base_ms.saturating_add(
                        u64::from(failures).saturating_mul(pacing.failure_step_ms),
                    ))
                }
            } else {
                failures = 0;
                jittered(
                    Duration::from_millis(pacing.between_checks_ms),
                    Duration::from_millis(pacing.between_checks_jitter_ms),
                )
            });
        };

        if persist {
            self.persist(&state);
        }
        info!(
            scan = %self.key,
            %stop,
            checked,
            found = findings.len(),
            position = state.position,
            "scan stopped"
        );
        ScanOutcome {
            state,
            stop,
            checked,
            findings,
        }
    }
}
