//! One validation request against the remote endpoint.
//!
//! [`Executor`] owns everything below the sampling layer: header rotation,
//! the per-call timeout, and the transport-level retry policy. Each attempt
//! goes through a [`Transport`], and [`UreqTransport`] builds a fresh agent
//! for every attempt so no connection or cookie outlives its request.

use std::time::Duration;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use ureq::Agent;

use crate::pacing::{Interrupt, Sleep};

/// Validation endpoint of the registry.
pub const DEFAULT_ENDPOINT: &str = "https://auth.roblox.com/v1/usernames/validate";

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Browser user agents rotated across requests.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_3) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
];

/// How a request failed before producing an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportError {
    /// The per-call timeout elapsed.
    Timeout,
    /// Connecting, resolving, or reading the socket failed.
    Connection,
    /// Anything else the HTTP stack reported.
    Other,
}

/// What one request produced, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// An HTTP exchange completed, with any status.
    Response {
        /// HTTP status code.
        status: u16,
        /// Response body as text.
        body: String,
    },
    /// No usable HTTP exchange.
    Failed(TransportError),
}

impl RawOutcome {
    /// Shorthand for a `200` response carrying `{"code": code}`.
    #[must_use]
    pub fn code(code: i64) -> Self {
        Self::Response {
            status: 200,
            body: format!("{{\"code\":{code}}}"),
        }
    }

    /// Shorthand for an empty-bodied response with `status`.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::Response {
            status,
            body: String::new(),
        }
    }
}

/// Where and how requests are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Validation URL.
    pub url: String,
    /// Per-call timeout (milliseconds).
    pub timeout_ms: u64,
    /// Value of the constant `Context` query parameter (0 = signup).
    pub context: u32,
    /// Values cycled through the `Birthday` query parameter, in order.
    pub variations: Vec<String>,
}

impl EndpointConfig {
    /// Per-call timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_owned(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            context: 0,
            variations: default_variations(),
        }
    }
}

/// The 31 January 2005 birth dates used as the variation dimension.
#[must_use]
pub fn default_variations() -> Vec<String> {
    (1..=31)
        .map(|day| format!("2005-01-{day:02}T00:00:00.000Z"))
        .collect()
}

/// Transport-level retry policy, distinct from consensus sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds); doubles each retry.
    pub backoff_seed_ms: u64,
    /// HTTP statuses that warrant another attempt.
    pub retryable_statuses: Vec<u16>,
    /// Whether connection failures warrant another attempt.
    pub retry_connection_errors: bool,
}

impl RetryConfig {
    fn should_retry(&self, outcome: &RawOutcome) -> bool {
        match outcome {
            RawOutcome::Response { status, .. } => self.retryable_statuses.contains(status),
            RawOutcome::Failed(TransportError::Connection) => self.retry_connection_errors,
            // a timeout is terminal for the call
            RawOutcome::Failed(TransportError::Timeout | TransportError::Other) => false,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_seed_ms.saturating_mul(factor))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seed_ms: 100,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            retry_connection_errors: true,
        }
    }
}

/// A fully resolved single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Validation URL.
    pub url: String,
    /// `Username` query value.
    pub identifier: String,
    /// `Birthday` query value.
    pub variation: String,
    /// `Context` query value.
    pub context: u32,
    /// Headers for this attempt only.
    pub headers: Vec<(&'static str, String)>,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

/// A fresh header set: random user agent plus cache-busting headers.
#[must_use]
pub fn fresh_headers() -> Vec<(&'static str, String)> {
    let user_agent = USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);
    vec![
        ("User-Agent", user_agent.to_owned()),
        ("Accept", "application/json, text/plain, */*".to_owned()),
        ("Accept-Language", "en-US,en;q=0.9".to_owned()),
        ("DNT", "1".to_owned()),
        ("Connection", "close".to_owned()),
        ("Sec-Fetch-Dest", "empty".to_owned()),
        ("Sec-Fetch-Mode", "cors".to_owned()),
        ("Sec-Fetch-Site", "same-site".to_owned()),
        ("Cache-Control", "no-cache, no-store, must-revalidate".to_owned()),
        ("Pragma", "no-cache".to_owned()),
        ("Expires", "0".to_owned()),
    ]
}

/// Sends exactly one attempt. Implementations must not share connection
/// state between calls.
pub trait Transport {
    /// Perform `request` once.
    fn send(&self, request: &ProbeRequest) -> RawOutcome;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &ProbeRequest) -> RawOutcome {
        (**self).send(request)
    }
}

/// [`Transport`] over `ureq`, one agent per attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct UreqTransport;

impl Transport for UreqTransport {
    fn send(&self, request: &ProbeRequest) -> RawOutcome {
        // dropped at the end of this call, taking its connection pool with it
        let config = Agent::config_builder()
            .timeout_global(Some(request.timeout))
            .http_status_as_error(false)
            .build();
        let agent = Agent::new_with_config(config);

        let mut call = agent
            .get(&request.url)
            .query("Username", &request.identifier)
            .query("Birthday", &request.variation)
            .query("Context", request.context.to_string());
        for (name, value) in &request.headers {
            call = call.header(*name, value.as_str());
        }

        match call.call() {
            Ok(mut response) => {
                let status = response.status().as_u16();
                match response.body_mut().read_to_string() {
                    Ok(body) => RawOutcome::Response { status, body },
                    Err(e) => {
                        debug!(status, error = %e, "failed to read response body");
                        RawOutcome::Failed(transport_error(&e))
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "request failed");
                RawOutcome::Failed(transport_error(&e))
            }
        }
    }
}

fn transport_error(err: &ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            TransportError::Timeout
        }
        ureq::Error::Io(_) | ureq::Error::ConnectionFailed | ureq::Error::HostNotFound => {
            TransportError::Connection
        }
        _ => TransportError::Other,
    }
}

/// Anything that can turn an (identifier, variation) pair into a raw outcome.
///
/// The consensus layer only sees this trait, so it can be driven by a
/// script in tests.
pub trait Probe {
    /// Issue one hardened request.
    fn probe(&self, identifier: &str, variation: &str) -> RawOutcome;
}

impl<P: Probe + ?Sized> Probe for &P {
    fn probe(&self, identifier: &str, variation: &str) -> RawOutcome {
        (**self).probe(identifier, variation)
    }
}

/// The request executor: fresh headers, timeout, and bounded retries.
#[derive(Debug)]
pub struct Executor<T, S> {
    transport: T,
    sleep: S,
    endpoint: EndpointConfig,
    retry: RetryConfig,
    interrupt: Interrupt,
}

impl<T: Transport, S: Sleep> Executor<T, S> {
    /// Build an executor over `transport`, waiting between retries with `sleep`.
    pub fn new(transport: T, sleep: S, endpoint: EndpointConfig, retry: RetryConfig) -> Self {
        Self {
            transport,
            sleep,
            endpoint,
            retry,
            interrupt: Interrupt::new(),
        }
    }

    /// Stop retrying once `interrupt` fires.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Endpoint settings in use.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Issue one classification request, retrying transient failures.
    ///
    /// Returns the outcome of the last attempt made.
    pub fn execute(&self, identifier: &str, variation: &str) -> RawOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = ProbeRequest {
                url: self.endpoint.url.clone(),
                identifier: identifier.to_owned(),
                variation: variation.to_owned(),
                context: self.endpoint.context,
                headers: fresh_headers(),
                timeout: self.endpoint.timeout(),
            };
            let outcome = self.transport.send(&request);
            trace!(identifier, variation, attempt, ?outcome, "attempt finished");

            if attempt >= max_attempts
                || !self.retry.should_retry(&outcome)
                || self.interrupt.is_triggered()
            {
                return outcome;
            }
            let delay = self.retry.backoff(attempt);
            debug!(identifier, attempt, ?delay, "retrying transient failure");
            self.sleep.sleep(delay);
            if self.interrupt.is_triggered() {
                return outcome;
            }
        }
    }
}

impl<T: Transport, S: Sleep> Probe for Executor<T, S> {
    fn probe(&self, identifier: &str, variation: &str) -> RawOutcome {
        self.execute(identifier, variation)
    }
}
