//! Identifier generation from an integer counter.
//!
//! Each [`IdentifierKind`] is a fixed-width positional encoding of the
//! counter in base 10, 26 or 36. Within `[0, base^length)` the encoding is
//! injective, so a scan that walks the counter upward never produces the
//! same identifier twice.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const LETTERS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const MIXED: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Longest identifier the registry accepts.
pub const MAX_IDENTIFIER_LENGTH: usize = 20;

/// The alphabet an identifier is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Decimal digits, zero-padded (`0001`).
    Numbers,
    /// Lowercase ASCII letters (`aaab`).
    Letters,
    /// Lowercase letters followed by digits in the digit order (`aa0b`).
    Mixed,
}

impl IdentifierKind {
    /// All kinds, in menu order.
    pub const ALL: [Self; 3] = [Self::Numbers, Self::Letters, Self::Mixed];

    /// Positional base of the encoding.
    #[must_use]
    pub const fn base(self) -> u64 {
        match self {
            Self::Numbers => 10,
            Self::Letters => 26,
            Self::Mixed => 36,
        }
    }

    /// Stable lowercase name, also used in progress file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Numbers => "numbers",
            Self::Letters => "letters",
            Self::Mixed => "mixed",
        }
    }

    /// Largest counter worth scanning: `min(base^length - 1, cap)`.
    ///
    /// Lengths whose space overflows `u64` saturate before the cap applies.
    ///
    /// ```
    /// use username_avail::generate::IdentifierKind;
    /// assert_eq!(IdentifierKind::Numbers.upper_bound(3, 50_000), 999);
    /// assert_eq!(IdentifierKind::Mixed.upper_bound(20, 50_000), 50_000);
    /// ```
    #[must_use]
    pub fn upper_bound(self, length: usize, cap: u64) -> u64 {
        let space = u32::try_from(length)
            .ok()
            .and_then(|exp| self.base().checked_pow(exp))
            .map_or(u64::MAX, |n| n.saturating_sub(1));
        space.min(cap)
    }

    /// Encode `counter` as an identifier of exactly `length` characters.
    ///
    /// Counters beyond `base^length` wrap for `Letters` and `Mixed`; for
    /// `Numbers` they widen past `length`. Scans never go there because
    /// [`upper_bound`](Self::upper_bound) stops them first.
    ///
    /// ```
    /// use username_avail::generate::IdentifierKind;
    /// assert_eq!(IdentifierKind::Numbers.generate(42, 4), "0042");
    /// assert_eq!(IdentifierKind::Letters.generate(27, 3), "abb");
    /// assert_eq!(IdentifierKind::Mixed.generate(26, 2), "a0");
    /// ```
    #[must_use]
    pub fn generate(self, counter: u64, length: usize) -> String {
        match self {
            Self::Numbers => format!("{counter:0length$}"),
            Self::Letters => encode(counter, length, LETTERS),
            Self::Mixed => encode(counter, length, MIXED),
        }
    }
}

fn encode(counter: u64, length: usize, alphabet: &[u8]) -> String {
    let base = alphabet.len() as u64;
    let mut num = counter;
    let mut out = vec![0u8; length];
    for slot in out.iter_mut().rev() {
        *slot = alphabet[(num % base) as usize];
        num /= base;
    }
    // alphabets are ASCII
    out.into_iter().map(char::from).collect()
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an identifier kind name is not one of
/// `numbers`, `letters` or `mixed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown identifier type `{0}` (expected numbers, letters or mixed)")]
pub struct ParseKindError(String);

impl FromStr for IdentifierKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numbers" | "1" => Ok(Self::Numbers),
            "letters" | "2" => Ok(Self::Letters),
            "mixed" | "3" => Ok(Self::Mixed),
            _ => Err(ParseKindError(s.to_owned())),
        }
    }
}
