//! Turning a noisy validation endpoint into one verdict per identifier.
//!
//! The endpoint can answer differently for the same identifier, so each
//! variation value is treated as an independent probe of the same truth.
//! Samples accumulate in a [`Tally`]; [`ConsensusConfig::decide`] and
//! [`ConsensusConfig::conclude`] reduce a tally to a status without any
//! I/O, and [`Engine`] drives the probes, pacing, and interrupt checks
//! around that reducer.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{Verdict, classify};
use crate::executor::Probe;
use crate::pacing::{Interrupt, Sleep, jittered};

/// Thresholds of the voting policy. All of them are product heuristics
/// and can be overridden from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// `Available` samples needed to commit to `Available`.
    pub available_threshold: u32,
    /// `Taken` samples that commit to `Taken` regardless of the total.
    /// `None` disables the cap.
    pub taken_cap: Option<u32>,
    /// Samples required before the majority rule applies.
    pub majority_floor: u32,
    /// Share of samples that must be `Taken` under the majority rule.
    pub taken_majority: f64,
    /// Share of samples that must be `NotAppropriate` (strictly exceeded)
    /// for that verdict once sampling stops.
    pub not_appropriate_majority: f64,
    /// Samples after which an identifier is abandoned. `None` samples until
    /// the cycles run out.
    pub sample_ceiling: Option<u32>,
    /// Passes over the variation set.
    pub max_cycles: u32,
    /// Delays between samples.
    pub pacing: SamplePacing,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            available_threshold: 2,
            taken_cap: Some(3),
            majority_floor: 15,
            taken_majority: 0.70,
            not_appropriate_majority: 0.5,
            sample_ceiling: Some(15),
            max_cycles: 10,
            pacing: SamplePacing::default(),
        }
    }
}

/// Waits applied after each sample, by verdict class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplePacing {
    /// After an ordinary answer (milliseconds).
    pub sample_delay_ms: u64,
    /// After HTTP 429 (milliseconds).
    pub rate_limited_delay_ms: u64,
    /// After HTTP 403 (milliseconds).
    pub forbidden_delay_ms: u64,
    /// After a transport failure (milliseconds).
    pub failure_delay_ms: u64,
    /// Random extra added to every delay, up to this many milliseconds.
    pub jitter_ms: u64,
}

impl SamplePacing {
    /// Delay to observe after a sample classified as `verdict`.
    #[must_use]
    pub fn delay_after(&self, verdict: Verdict) -> Duration {
        let base = match verdict {
            Verdict::RateLimited => self.rate_limited_delay_ms,
            Verdict::Forbidden => self.forbidden_delay_ms,
            Verdict::TransportFailure(_) => self.failure_delay_ms,
            _ => self.sample_delay_ms,
        };
        jittered(
            Duration::from_millis(base),
            Duration::from_millis(self.jitter_ms),
        )
    }
}

impl Default for SamplePacing {
    fn default() -> Self {
        Self {
            sample_delay_ms: 500,
            rate_limited_delay_ms: 5_000,
            forbidden_delay_ms: 2_000,
            failure_delay_ms: 1_000,
            jitter_ms: 250,
        }
    }
}

/// Accumulated evidence for one identifier.
///
/// Throttling verdicts are kept in the history and the counts but are not
/// samples: they say nothing about the identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    counts: BTreeMap<Verdict, u32>,
    history: Vec<Verdict>,
    samples: u32,
}

impl Tally {
    /// Empty tally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one classified response.
    pub fn record(&mut self, verdict: Verdict) {
        *self.counts.entry(verdict).or_default() += 1;
        self.history.push(verdict);
        if !verdict.is_throttle() {
            self.samples += 1;
        }
    }

    /// Occurrences of `verdict`.
    #[must_use]
    pub fn count(&self, verdict: Verdict) -> u32 {
        self.counts.get(&verdict).copied().unwrap_or(0)
    }

    /// Evidence-bearing responses recorded so far.
    #[must_use]
    pub const fn samples(&self) -> u32 {
        self.samples
    }

    /// Discarded throttling responses.
    #[must_use]
    pub fn throttled(&self) -> u32 {
        self.count(Verdict::RateLimited) + self.count(Verdict::Forbidden)
    }

    /// Every verdict in arrival order.
    #[must_use]
    pub fn history(&self) -> &[Verdict] {
        &self.history
    }

    /// Per-verdict counts.
    #[must_use]
    pub fn counts(&self) -> &BTreeMap<Verdict, u32> {
        &self.counts
    }
}

impl ConsensusConfig {
    /// Early decision after `last` was recorded into `tally`, if any rule fires.
    #[must_use]
    pub fn decide(&self, tally: &Tally, last: Verdict) -> Option<ConsensusStatus> {
        if last.is_shape_rejection() {
            return Some(ConsensusStatus::Settled(last));
        }
        if tally.count(Verdict::Available) >= self.available_threshold {
            return Some(ConsensusStatus::Settled(Verdict::Available));
        }

        let taken = tally.count(Verdict::Taken);
        let capped = self.taken_cap.is_some_and(|cap| taken >= cap);
        let majority = tally.samples() >= self.majority_floor
            && f64::from(taken) >= self.taken_majority * f64::from(tally.samples());
        if capped || majority {
            return Some(ConsensusStatus::Settled(Verdict::Taken));
        }
        None
    }

    /// Whether sampling should stop for lack of a decision.
    #[must_use]
    pub fn ceiling_reached(&self, tally: &Tally) -> bool {
        self.sample_ceiling
            .is_some_and(|ceiling| tally.samples() >= ceiling)
    }

    /// Final status once sampling has stopped without an early decision.
    #[must_use]
    pub fn conclude(&self, tally: &Tally) -> ConsensusStatus {
        let samples = tally.samples();
        if samples == 0 {
            return ConsensusStatus::NoResponses;
        }
        let not_appropriate = f64::from(tally.count(Verdict::NotAppropriate));
        if not_appropriate > self.not_appropriate_majority * f64::from(samples) {
            ConsensusStatus::Settled(Verdict::NotAppropriate)
        } else {
            ConsensusStatus::Uncertain
        }
    }
}

/// Final decision for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub enum ConsensusStatus {
    /// A verdict backed by enough evidence.
    Settled(Verdict),
    /// Sampling stopped without a decisive pattern.
    Uncertain,
    /// Not a single evidence-bearing response arrived.
    NoResponses,
    /// Sampling was cut short by an interrupt.
    Interrupted,
}

impl ConsensusStatus {
    /// Whether the identifier was judged available.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Settled(Verdict::Available))
    }

    /// Whether the check failed to reach any verdict and is worth retrying.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Uncertain | Self::NoResponses)
    }
}

impl fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settled(v) => v.fmt(f),
            Self::Uncertain => write!(f, "uncertain"),
            Self::NoResponses => write!(f, "check failed: no responses"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Outcome of assessing one identifier. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusResult {
    /// The identifier assessed.
    pub identifier: String,
    /// The decision.
    pub status: ConsensusStatus,
    /// Evidence-bearing samples collected.
    pub sample_count: u32,
    /// Count per verdict, throttling included.
    pub evidence: BTreeMap<Verdict, u32>,
    /// Requests issued, throttled ones included.
    pub requests: u32,
}

impl ConsensusResult {
    fn from_tally(identifier: &str, status: ConsensusStatus, tally: Tally) -> Self {
        Self {
            identifier: identifier.to_owned(),
            status,
            sample_count: tally.samples(),
            requests: u32::try_from(tally.history().len()).unwrap_or(u32::MAX),
            evidence: tally.counts,
        }
    }

    /// A result with no evidence attached, for callers that obtained the
    /// status elsewhere.
    pub fn bare(identifier: &str, status: ConsensusStatus) -> Self {
        Self::from_tally(identifier, status, Tally::default())
    }
}

/// Something that can decide on one identifier at a time.
pub trait Assess {
    /// Assess `identifier` to a final result.
    fn assess(&mut self, identifier: &str) -> ConsensusResult;
}

impl<A: Assess + ?Sized> Assess for &mut A {
    fn assess(&mut self, identifier: &str) -> ConsensusResult {
        (**self).assess(identifier)
    }
}

/// The sampling engine.
#[derive(Debug)]
pub struct Engine<P, S> {
    probe: P,
    sleep: S,
    config: ConsensusConfig,
    variations: Vec<String>,
    interrupt: Interrupt,
}

impl<P: Probe, S: Sleep> Engine<P, S> {
    /// Engine sampling through `probe` over `variations`.
    pub fn new(probe: P, sleep: S, config: ConsensusConfig, variations: Vec<String>) -> Self {
        Self {
            probe,
            sleep,
            config,
            variations,
            interrupt: Interrupt::new(),
        }
    }

    /// Abort sampling as soon as `interrupt` fires.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Policy in use.
    #[must_use]
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Sample `identifier` for up to `max_cycles` passes over `variations`.
    pub fn assess_identifier(
        &self,
        identifier: &str,
        max_cycles: u32,
        variations: &[String],
    ) -> ConsensusResult {
        if variations.is_empty() {
            warn!(identifier, "empty variation set, nothing to sample");
        }
        let mut tally = Tally::new();

        'cycles: for cycle in 1..=max_cycles {
            for variation in variations {
                if self.interrupt.is_triggered() {
                    info!(identifier, samples = tally.samples(), "check interrupted");
                    return ConsensusResult::from_tally(
                        identifier,
                        ConsensusStatus::Interrupted,
                        tally,
                    );
                }

                let verdict = classify(&self.probe.probe(identifier, variation));
                tally.record(verdict);
                debug!(
                    identifier,
                    cycle,
                    variation = variation.as_str(),
                    %verdict,
                    samples = tally.samples(),
                    "sample"
                );

                if let Some(status) = self.config.decide(&tally, verdict) {
                    return ConsensusResult::from_tally(identifier, status, tally);
                }
                if self.config.ceiling_reached(&tally) {
                    debug!(identifier, samples = tally.samples(), "sample ceiling reached");
                    break 'cycles;
                }
                if verdict.is_throttle() {
                    warn!(identifier, %verdict, "throttled, backing off");
                }
                self.sleep.sleep(self.config.pacing.delay_after(verdict));
            }
            if cycle % 5 == 0 {
                debug!(identifier, cycle, requests = tally.history().len(), "sampling progress");
            }
        }

        let status = self.config.conclude(&tally);
        ConsensusResult::from_tally(identifier, status, tally)
    }
}

impl<P: Probe, S: Sleep> Assess for Engine<P, S> {
    fn assess(&mut self, identifier: &str) -> ConsensusResult {
        self.assess_identifier(identifier, self.config.max_cycles, &self.variations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureKind;
    use crate::executor::{RawOutcome, default_variations};
    use crate::testing::{RecordingSleep, ScriptedProbe};

    fn quiet() -> ConsensusConfig {
        ConsensusConfig {
            pacing: SamplePacing {
                jitter_ms: 0,
                ..SamplePacing::default()
            },
            ..ConsensusConfig::default()
        }
    }

    fn run(probe: &ScriptedProbe, config: ConsensusConfig) -> ConsensusResult {
        let sleep = RecordingSleep::default();
        let mut engine = Engine::new(probe, &sleep, config, default_variations());
        engine.assess("abcd")
    }

    #[test]
    fn second_available_sample_settles() {
        let probe = ScriptedProbe::codes(&[1, 0, 1, 0, 1, 1]);
        let result = run(&probe, quiet());
        assert_eq!(result.status, ConsensusStatus::Settled(Verdict::Available));
        assert_eq!(result.sample_count, 4);
        assert_eq!(probe.calls().len(), 4);
    }

    #[test]
    fn every_assessment_restarts_the_variation_set() {
        let probe = ScriptedProbe::codes(&[0, 0, 0, 0]);
        let sleep = RecordingSleep::default();
        let mut engine = Engine::new(&probe, &sleep, quiet(), default_variations());
        assert!(engine.assess("abcd").status.is_available());
        assert!(engine.assess("bcde").status.is_available());
        let variations: Vec<String> = probe.calls().into_iter().map(|(_, v)| v).collect();
        assert_eq!(variations[0], variations[2]);
        assert_eq!(variations[1], variations[3]);
        assert_eq!(variations[1], "2005-01-02T00:00:00.000Z");
    }

    #[test]
    fn taken_cap_settles() {
        let probe = ScriptedProbe::codes(&[1, 2, 1, 7, 1, 0]);
        let result = run(&probe, quiet());
        assert_eq!(result.status, ConsensusStatus::Settled(Verdict::Taken));
        assert_eq!(result.sample_count, 5);
    }

    #[test]
    fn taken_majority_needs_the_floor() {
        let config = ConsensusConfig {
            taken_cap: None,
            sample_ceiling: None,
            majority_floor: 20,
            ..quiet()
        };
        // 16 taken, 4 unknown, spread out
        let codes: Vec<i64> = (0..20).map(|i| if i % 5 == 0 { 7 } else { 1 }).collect();
        let probe = ScriptedProbe::codes(&codes);
        let result = run(&probe, config);
        assert_eq!(result.status, ConsensusStatus::Settled(Verdict::Taken));
        assert_eq!(result.sample_count, 20);
        assert_eq!(result.evidence[&Verdict::Taken], 16);
        assert_eq!(result.evidence[&Verdict::UnknownCode(7)], 4);
    }

    #[test]
    fn taken_minority_stays_uncertain() {
        let config = ConsensusConfig {
            taken_cap: None,
            sample_ceiling: Some(20),
            majority_floor: 20,
            ..quiet()
        };
        let codes: Vec<i64> = (0..20).map(|i| if i % 2 == 0 { 7 } else { 1 }).collect();
        let probe = ScriptedProbe::codes(&codes);
        let result = run(&probe, config);
        assert_eq!(result.status, ConsensusStatus::Uncertain);
        assert_eq!(result.sample_count, 20);
    }

    #[test]
    fn ceiling_stops_sampling_and_majority_not_appropriate_wins() {
        let probe = ScriptedProbe::codes(&[2; 40]);
        let result = run(&probe, quiet());
        assert_eq!(
            result.status,
            ConsensusStatus::Settled(Verdict::NotAppropriate)
        );
        assert_eq!(result.sample_count, 15);
        assert_eq!(probe.calls().len(), 15);
    }

    #[test]
    fn not_appropriate_must_exceed_half() {
        let codes: Vec<i64> = (0..16).map(|i| if i < 7 { 2 } else { 7 }).collect();
        let config = ConsensusConfig {
            sample_ceiling: Some(14),
            ..quiet()
        };
        let probe = ScriptedProbe::codes(&codes);
        let result = run(&probe, config);
        // 7 of 14 is exactly half
        assert_eq!(result.status, ConsensusStatus::Uncertain);
    }

    #[test]
    fn shape_rejection_ends_sampling() {
        let probe = ScriptedProbe::codes(&[1, 10, 0, 0]);
        let result = run(&probe, quiet());
        assert_eq!(result.status, ConsensusStatus::Settled(Verdict::TooShort));
        assert_eq!(result.sample_count, 2);
    }

    #[test]
    fn throttling_is_not_evidence() {
        let probe = ScriptedProbe::new(std::iter::repeat_n(RawOutcome::status(429), 31));
        let config = ConsensusConfig {
            max_cycles: 1,
            ..quiet()
        };
        let sleep = RecordingSleep::default();
        let engine = Engine::new(&probe, &sleep, config, default_variations());
        let result = engine.assess_identifier("abcd", 1, &default_variations());
        assert_eq!(result.status, ConsensusStatus::NoResponses);
        assert_eq!(result.sample_count, 0);
        assert_eq!(result.requests, 31);
        assert_eq!(result.evidence[&Verdict::RateLimited], 31);
        assert!(
            sleep
                .recorded()
                .iter()
                .all(|d| *d == Duration::from_millis(5_000))
        );
    }

    #[test]
    fn transport_failures_count_but_never_decide() {
        let probe = ScriptedProbe::new(std::iter::repeat_n(RawOutcome::status(500), 40));
        let result = run(&probe, quiet());
        assert_eq!(result.status, ConsensusStatus::Uncertain);
        assert_eq!(result.sample_count, 15);
        assert_eq!(
            result.evidence[&Verdict::TransportFailure(FailureKind::Status(500))],
            15
        );
    }

    #[test]
    fn variations_are_cycled_in_order() {
        let probe = ScriptedProbe::codes(&[7; 6]);
        let variations = vec!["a".to_owned(), "b".to_owned()];
        let sleep = RecordingSleep::default();
        let engine = Engine::new(&probe, &sleep, quiet(), variations.clone());
        let result = engine.assess_identifier("x", 3, &variations);
        assert_eq!(result.status, ConsensusStatus::Uncertain);
        let order: Vec<String> = probe.calls().into_iter().map(|(_, v)| v).collect();
        assert_eq!(order, ["a", "b", "a", "b", "a", "b"]);
        assert_eq!(sleep.recorded().len(), 6);
    }

    #[test]
    fn interrupt_preserves_evidence() {
        let interrupt = Interrupt::new();
        let probe = ScriptedProbe::codes(&[1, 2, 7, 1, 1]).interrupt_after(3, interrupt.clone());
        let sleep = RecordingSleep::default();
        let mut engine =
            Engine::new(&probe, &sleep, quiet(), default_variations()).with_interrupt(interrupt);
        let result = engine.assess("abcd");
        assert_eq!(result.status, ConsensusStatus::Interrupted);
        assert_eq!(result.sample_count, 3);
        assert_eq!(probe.calls().len(), 3);
    }

    #[test]
    fn no_sleep_after_the_deciding_sample() {
        let probe = ScriptedProbe::codes(&[0, 0]);
        let sleep = RecordingSleep::default();
        let mut engine = Engine::new(&probe, &sleep, quiet(), default_variations());
        let _ = engine.assess("abcd");
        assert_eq!(sleep.recorded(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn decide_is_a_pure_reducer() {
        let config = ConsensusConfig::default();
        let mut tally = Tally::new();
        for v in [Verdict::Taken, Verdict::Available, Verdict::RateLimited] {
            tally.record(v);
            assert_eq!(config.decide(&tally, v), None);
        }
        assert_eq!(tally.samples(), 2);
        assert_eq!(tally.throttled(), 1);
        tally.record(Verdict::Available);
        assert_eq!(
            config.decide(&tally, Verdict::Available),
            Some(ConsensusStatus::Settled(Verdict::Available))
        );
    }

    #[test]
    fn empty_tally_concludes_no_responses() {
        assert_eq!(
            ConsensusConfig::default().conclude(&Tally::new()),
            ConsensusStatus::NoResponses
        );
    }

    #[test]
    fn status_predicates() {
        assert!(ConsensusStatus::Settled(Verdict::Available).is_available());
        assert!(ConsensusStatus::Uncertain.is_failure());
        assert!(ConsensusStatus::NoResponses.is_failure());
        assert!(!ConsensusStatus::Interrupted.is_failure());
        assert!(!ConsensusStatus::Settled(Verdict::Taken).is_failure());
    }
}
