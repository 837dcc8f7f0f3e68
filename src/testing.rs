//! Scripted collaborators shared by unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use crate::consensus::{Assess, ConsensusResult, ConsensusStatus};
use crate::executor::{Probe, ProbeRequest, RawOutcome, Transport, TransportError};
use crate::pacing::{Interrupt, Sleep};

#[derive(Debug, Default)]
pub(crate) struct RecordingSleep {
    slept: RefCell<Vec<Duration>>,
}

impl RecordingSleep {
    pub(crate) fn recorded(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }

    pub(crate) fn total(&self) -> Duration {
        self.slept.borrow().iter().sum()
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    script: RefCell<VecDeque<RawOutcome>>,
    requests: RefCell<Vec<ProbeRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: impl IntoIterator<Item = RawOutcome>) -> Self {
        Self {
            script: RefCell::new(script.into_iter().collect()),
            requests: RefCell::default(),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ProbeRequest> {
        self.requests.borrow().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &ProbeRequest) -> RawOutcome {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or(RawOutcome::Failed(TransportError::Connection))
    }
}

/// Replays outcomes in order; once exhausted, keeps failing. Optionally
/// triggers an interrupt after a given number of probes.
#[derive(Debug)]
pub(crate) struct ScriptedProbe {
    script: RefCell<VecDeque<RawOutcome>>,
    calls: RefCell<Vec<(String, String)>>,
    interrupt_after: Option<(usize, Interrupt)>,
}

impl ScriptedProbe {
    pub(crate) fn new(script: impl IntoIterator<Item = RawOutcome>) -> Self {
        Self {
            script: RefCell::new(script.into_iter().collect()),
            calls: RefCell::default(),
            interrupt_after: None,
        }
    }

    pub(crate) fn codes(codes: &[i64]) -> Self {
        Self::new(codes.iter().map(|&c| RawOutcome::code(c)))
    }

    pub(crate) fn interrupt_after(mut self, probes: usize, interrupt: Interrupt) -> Self {
        self.interrupt_after = Some((probes, interrupt));
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }
}

impl Probe for ScriptedProbe {
    fn probe(&self, identifier: &str, variation: &str) -> RawOutcome {
        let mut calls = self.calls.borrow_mut();
        calls.push((identifier.to_owned(), variation.to_owned()));
        if let Some((after, interrupt)) = &self.interrupt_after {
            if calls.len() >= *after {
                interrupt.trigger();
            }
        }
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or(RawOutcome::Failed(TransportError::Connection))
    }
}

/// Hands out canned consensus statuses, one per identifier.
#[derive(Debug)]
pub(crate) struct ScriptedAssess {
    script: VecDeque<ConsensusStatus>,
    seen: Vec<String>,
    interrupt_after: Option<(usize, Interrupt)>,
}

impl ScriptedAssess {
    pub(crate) fn new(script: impl IntoIterator<Item = ConsensusStatus>) -> Self {
        Self {
            script: script.into_iter().collect(),
            seen: Vec::new(),
            interrupt_after: None,
        }
    }

    pub(crate) fn interrupt_after(mut self, checks: usize, interrupt: Interrupt) -> Self {
        self.interrupt_after = Some((checks, interrupt));
        self
    }

    pub(crate) fn seen(&self) -> &[String] {
        &self.seen
    }
}

impl Assess for ScriptedAssess {
    fn assess(&mut self, identifier: &str) -> ConsensusResult {
        self.seen.push(identifier.to_owned());
        let status = self.script.pop_front().unwrap_or(ConsensusStatus::Uncertain);
        if let Some((after, interrupt)) = &self.interrupt_after {
            if self.seen.len() >= *after {
                interrupt.trigger();
            }
        }
        ConsensusResult::bare(identifier, status)
    }
}
