//! Single and bulk availability checks for front ends.
//!
//! These are thin callers of the consensus engine and the scanner. They
//! validate input, attach verification links, and shape results into
//! serializable records; they make no decisions of their own.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::consensus::{Assess, ConsensusResult};
use crate::generate::{IdentifierKind, MAX_IDENTIFIER_LENGTH};
use crate::pacing::{Interrupt, Sleep};
use crate::progress::{NoProgressStore, ProgressKey};
use crate::scan::{ScanSettings, Scanner, StartPoint};

/// Upper limit on checks per bulk request.
pub const MAX_BULK_CHECKS: u64 = 20;

const IDENTIFIER_PLACEHOLDER: &str = "{identifier}";

/// Errors in front-end input. Network trouble is never an error here; it
/// shows up as an uncertain verdict instead.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CheckError {
    /// Nothing left after trimming.
    #[error("identifier cannot be empty")]
    Empty,
    /// Longer than the registry allows.
    #[error("identifier `{identifier}` is too long (max {max} characters)", max = MAX_IDENTIFIER_LENGTH)]
    TooLong {
        /// The offending identifier.
        identifier: String,
    },
    /// Contains whitespace or control characters.
    #[error("invalid character {ch:?} in identifier `{identifier}`")]
    NotPrintable {
        /// The offending character.
        ch: char,
        /// The offending identifier.
        identifier: String,
    },
    /// Bulk length outside `1..=20`.
    #[error("identifier length must be between 1 and {max}, got {0}", max = MAX_IDENTIFIER_LENGTH)]
    InvalidLength(usize),
    /// Bulk request asking for zero checks.
    #[error("max checks must be at least 1")]
    NoChecks,
}

/// Validate and trim a user-supplied identifier.
///
/// # Errors
///
/// Returns [`CheckError`] if the identifier is empty, longer than
/// [`MAX_IDENTIFIER_LENGTH`], or contains non-printable characters.
///
/// ```
/// use username_avail::check::{validate_identifier, CheckError};
/// assert_eq!(validate_identifier("  builder_man "), Ok("builder_man"));
/// assert_eq!(validate_identifier("   "), Err(CheckError::Empty));
/// ```
pub fn validate_identifier(identifier: &str) -> Result<&str, CheckError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(CheckError::Empty);
    }
    if trimmed.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(CheckError::TooLong {
            identifier: trimmed.to_owned(),
        });
    }
    if let Some(ch) = trimmed.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(CheckError::NotPrintable {
            ch,
            identifier: trimmed.to_owned(),
        });
    }
    Ok(trimmed)
}

/// URL templates for follow-up links. `{identifier}` is substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Where a human can confirm the identifier is unused.
    pub verify: String,
    /// Where the identifier can be claimed.
    pub signup: String,
}

impl LinkConfig {
    /// Verification link for `identifier`.
    #[must_use]
    pub fn verify_url(&self, identifier: &str) -> String {
        self.verify.replace(IDENTIFIER_PLACEHOLDER, identifier)
    }

    /// Signup link for `identifier`.
    #[must_use]
    pub fn signup_url(&self, identifier: &str) -> String {
        self.signup.replace(IDENTIFIER_PLACEHOLDER, identifier)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            verify: "https://www.roblox.com/search/users?keyword={identifier}".to_owned(),
            signup: "https://www.roblox.com/account/signupredir?username={identifier}".to_owned(),
        }
    }
}

/// How often a single check is rerun when its consensus fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckRetry {
    /// Consensus runs per identifier, including the first.
    pub attempts: u32,
    /// Retry `n` waits `n * step_ms` milliseconds first.
    pub step_ms: u64,
}

impl CheckRetry {
    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_before(&self, retry: u32) -> Duration {
        Duration::from_millis(self.step_ms.saturating_mul(u64::from(retry)))
    }
}

impl Default for CheckRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            step_ms: 10_000,
        }
    }
}

/// One checked identifier, ready to show or serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRecord {
    /// The identifier checked.
    pub identifier: String,
    /// Human-readable final status.
    pub verdict: String,
    /// Whether the final status is "available".
    pub available: bool,
    /// Evidence-bearing samples behind the verdict.
    pub samples: u32,
    /// Verification link.
    pub verify_url: String,
    /// Signup link.
    pub signup_url: String,
}

impl CheckRecord {
    /// Shape a consensus result into a record.
    #[must_use]
    pub fn from_result(result: &ConsensusResult, links: &LinkConfig) -> Self {
        Self {
            identifier: result.identifier.clone(),
            verdict: result.status.to_string(),
            available: result.status.is_available(),
            samples: result.sample_count,
            verify_url: links.verify_url(&result.identifier),
            signup_url: links.signup_url(&result.identifier),
        }
    }
}

/// Parameters of a bulk check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BulkRequest {
    /// Identifier length, `1..=20`.
    pub length: usize,
    /// Identifier alphabet.
    #[serde(rename = "username_type")]
    pub kind: IdentifierKind,
    /// Checks to perform, clamped to [`MAX_BULK_CHECKS`].
    pub max_checks: u64,
}

/// Available identifiers found by a bulk check, plus a summary line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    /// One record per available identifier.
    pub results: Vec<CheckRecord>,
    /// Identifiers checked.
    pub checked: u64,
    /// `"<n> available out of <m> checked"`.
    pub summary: String,
}

/// Check one identifier, rerunning the consensus while it ends uncertain
/// or without responses.
///
/// # Errors
///
/// Returns [`CheckError`] if the identifier fails [`validate_identifier`].
pub fn check_identifier<A: Assess, S: Sleep>(
    assessor: &mut A,
    sleep: S,
    identifier: &str,
    retry: &CheckRetry,
    links: &LinkConfig,
) -> Result<CheckRecord, CheckError> {
    let identifier = validate_identifier(identifier)?;
    let mut result = assessor.assess(identifier);
    for attempt in 2..=retry.attempts.max(1) {
        if !result.status.is_failure() {
            break;
        }
        let delay = retry.delay_before(attempt - 1);
        warn!(identifier, attempt, ?delay, status = %result.status, "check failed, retrying");
        sleep.sleep(delay);
        result = assessor.assess(identifier);
    }
    info!(identifier, status = %result.status, samples = result.sample_count, "single check");
    Ok(CheckRecord::from_result(&result, links))
}

/// Check the first `max_checks` identifiers of a kind and length, from
/// counter zero, without touching stored scan progress.
///
/// # Errors
///
/// Returns [`CheckError::InvalidLength`] or [`CheckError::NoChecks`] for
/// out-of-range parameters.
pub fn check_bulk<A: Assess, S: Sleep>(
    assessor: A,
    sleep: S,
    request: &BulkRequest,
    settings: &ScanSettings,
    links: &LinkConfig,
    interrupt: Interrupt,
) -> Result<BulkReport, CheckError> {
    if request.length == 0 || request.length > MAX_IDENTIFIER_LENGTH {
        return Err(CheckError::InvalidLength(request.length));
    }
    if request.max_checks == 0 {
        return Err(CheckError::NoChecks);
    }

    let settings = ScanSettings {
        max_checks: Some(request.max_checks.min(MAX_BULK_CHECKS)),
        ..settings.clone()
    };
    let key = ProgressKey::new(request.length, request.kind);
    let outcome = Scanner::new(key, settings, assessor, NoProgressStore, sleep)
        .with_interrupt(interrupt)
        .run(StartPoint::Manual(0));

    let results: Vec<CheckRecord> = outcome
        .findings
        .iter()
        .map(|r| CheckRecord::from_result(r, links))
        .collect();
    let summary = format!(
        "{} available out of {} checked",
        results.len(),
        outcome.checked
    );
    Ok(BulkReport {
        results,
        checked: outcome.checked,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Verdict;
    use crate::consensus::ConsensusStatus;
    use crate::testing::{RecordingSleep, ScriptedAssess};

    const TAKEN: ConsensusStatus = ConsensusStatus::Settled(Verdict::Taken);
    const AVAILABLE: ConsensusStatus = ConsensusStatus::Settled(Verdict::Available);

    fn request(max_checks: u64) -> BulkRequest {
        BulkRequest {
            length: 4,
            kind: IdentifierKind::Numbers,
            max_checks,
        }
    }

    #[test]
    fn validate_rejects_bad_identifiers() {
        assert_eq!(validate_identifier(""), Err(CheckError::Empty));
        assert!(matches!(
            validate_identifier("abcdefghijklmnopqrstu"),
            Err(CheckError::TooLong { .. })
        ));
        assert!(matches!(
            validate_identifier("ab cd"),
            Err(CheckError::NotPrintable { ch: ' ', .. })
        ));
        assert_eq!(validate_identifier("abcdefghijklmnopqrst"), Ok("abcdefghijklmnopqrst"));
    }

    #[test]
    fn single_check_attaches_links() {
        let sleep = RecordingSleep::default();
        let mut assess = ScriptedAssess::new([AVAILABLE]);
        let record = check_identifier(
            &mut assess,
            &sleep,
            " zq9x ",
            &CheckRetry::default(),
            &LinkConfig::default(),
        )
        .unwrap();
        assert_eq!(assess.seen(), ["zq9x"]);
        assert_eq!(record.identifier, "zq9x");
        assert_eq!(record.verdict, "available");
        assert!(record.available);
        assert_eq!(
            record.verify_url,
            "https://www.roblox.com/search/users?keyword=zq9x"
        );
        assert_eq!(
            record.signup_url,
            "https://www.roblox.com/account/signupredir?username=zq9x"
        );
    }

    #[test]
    fn single_check_reports_uncertain_after_retries() {
        let sleep = RecordingSleep::default();
        let mut assess = ScriptedAssess::new([ConsensusStatus::Uncertain; 3]);
        let record = check_identifier(
            &mut assess,
            &sleep,
            "abcd",
            &CheckRetry::default(),
            &LinkConfig::default(),
        )
        .unwrap();
        assert_eq!(record.verdict, "uncertain");
        assert!(!record.available);
        assert_eq!(assess.seen(), ["abcd", "abcd", "abcd"]);
        assert_eq!(
            sleep.recorded(),
            [Duration::from_secs(10), Duration::from_secs(20)]
        );
    }

    #[test]
    fn failed_check_is_rerun_until_it_settles() {
        let sleep = RecordingSleep::default();
        let mut assess = ScriptedAssess::new([ConsensusStatus::NoResponses, AVAILABLE, TAKEN]);
        let record = check_identifier(
            &mut assess,
            &sleep,
            "abcd",
            &CheckRetry::default(),
            &LinkConfig::default(),
        )
        .unwrap();
        assert!(record.available);
        assert_eq!(assess.seen().len(), 2);
        assert_eq!(sleep.recorded(), [Duration::from_secs(10)]);
    }

    #[test]
    fn settled_and_interrupted_checks_are_not_rerun() {
        for status in [TAKEN, ConsensusStatus::Interrupted] {
            let sleep = RecordingSleep::default();
            let mut assess = ScriptedAssess::new([status, AVAILABLE]);
            let record = check_identifier(
                &mut assess,
                &sleep,
                "abcd",
                &CheckRetry::default(),
                &LinkConfig::default(),
            )
            .unwrap();
            assert_eq!(record.verdict, status.to_string());
            assert_eq!(assess.seen().len(), 1);
            assert!(sleep.recorded().is_empty());
        }
    }

    #[test]
    fn single_attempt_disables_reruns() {
        let sleep = RecordingSleep::default();
        let mut assess = ScriptedAssess::new([ConsensusStatus::Uncertain, AVAILABLE]);
        let retry = CheckRetry {
            attempts: 1,
            ..CheckRetry::default()
        };
        let record =
            check_identifier(&mut assess, &sleep, "abcd", &retry, &LinkConfig::default()).unwrap();
        assert_eq!(record.verdict, "uncertain");
        assert!(sleep.recorded().is_empty());
    }

    #[test]
    fn invalid_identifier_never_reaches_the_engine() {
        let sleep = RecordingSleep::default();
        let mut assess = ScriptedAssess::new([AVAILABLE]);
        assert!(
            check_identifier(
                &mut assess,
                &sleep,
                "  ",
                &CheckRetry::default(),
                &LinkConfig::default()
            )
            .is_err()
        );
        assert!(assess.seen().is_empty());
    }

    #[test]
    fn bulk_lists_only_available_identifiers() {
        let mut assess = ScriptedAssess::new([TAKEN, TAKEN, AVAILABLE]);
        let sleep = RecordingSleep::default();
        let report = check_bulk(
            &mut assess,
            &sleep,
            &request(3),
            &ScanSettings::default(),
            &LinkConfig::default(),
            Interrupt::new(),
        )
        .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].identifier, "0002");
        assert_eq!(report.results[0].verdict, "available");
        assert_eq!(report.summary, "1 available out of 3 checked");
    }

    #[test]
    fn bulk_clamps_max_checks() {
        let mut assess = ScriptedAssess::new([TAKEN; 30]);
        let sleep = RecordingSleep::default();
        let report = check_bulk(
            &mut assess,
            &sleep,
            &request(500),
            &ScanSettings::default(),
            &LinkConfig::default(),
            Interrupt::new(),
        )
        .unwrap();
        assert_eq!(report.checked, MAX_BULK_CHECKS);
        assert_eq!(report.summary, "0 available out of 20 checked");
    }

    #[test]
    fn bulk_rejects_bad_parameters() {
        let sleep = RecordingSleep::default();
        let run = |req: BulkRequest| {
            let mut assess = ScriptedAssess::new([]);
            check_bulk(
                &mut assess,
                &sleep,
                &req,
                &ScanSettings::default(),
                &LinkConfig::default(),
                Interrupt::new(),
            )
        };
        let too_long = BulkRequest {
            length: 21,
            ..request(3)
        };
        assert_eq!(run(too_long), Err(CheckError::InvalidLength(21)));
        assert_eq!(run(request(0)), Err(CheckError::NoChecks));
    }

    #[test]
    fn records_serialize_for_front_ends() {
        let result = ConsensusResult::bare("abcd", TAKEN);
        let record = CheckRecord::from_result(&result, &LinkConfig::default());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["identifier"], "abcd");
        assert_eq!(json["verdict"], "taken");
        assert_eq!(json["available"], false);
    }

    #[test]
    fn check_error_is_send_sync() {
        fn assert_normal<T: Sized + Send + Sync>() {}
        assert_normal::<CheckError>();
    }
}
