#![warn(missing_docs, missing_debug_implementations)]

//! Check whether usernames are available on a remote registry.
//!
//! A single validation response is not trustworthy: the registry rate
//! limits, returns stale answers, and disagrees with itself across request
//! variations. This library therefore samples the validation endpoint
//! repeatedly with rotating variations and fresh headers, tallies the
//! classified responses, and only settles on a verdict once the evidence
//! crosses configurable thresholds. On top of that sits a resumable scanner
//! that walks an identifier space in counter order and persists its
//! position.
//!
//! # Example
//!
//! ```no_run
//! use username_avail::check::check_identifier;
//! use username_avail::config::Config;
//! use username_avail::pacing::{Interrupt, InterruptibleSleep};
//!
//! let interrupt = Interrupt::new();
//! let config = Config::default();
//! let mut engine = config.engine(&interrupt);
//! let sleep = InterruptibleSleep::new(interrupt);
//! match check_identifier(&mut engine, sleep, "builderman42", &config.check, &config.links) {
//!     Ok(record) if record.available => println!("free: {}", record.signup_url),
//!     Ok(record) => println!("{}", record.verdict),
//!     Err(e) => eprintln!("error: {e}"),
//! }
//! ```

pub mod check;
pub mod classify;
pub mod config;
pub mod consensus;
pub mod executor;
pub mod generate;
pub mod pacing;
pub mod progress;
pub mod scan;

#[cfg(test)]
mod testing;
