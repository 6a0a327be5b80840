//! # Scannable Code Generation
//!
//! Generates the unique scannable identifiers stamped onto stock units at
//! intake.
//!
//! ## Code Shape
//! ```text
//! IPHO 73051 412 9
//! └┬─┘ └─┬─┘ └┬┘ └── check digit (weighted mod-10 over the 12 body chars)
//!  │     │    └───── 3-digit CSPRNG suffix
//!  │     └────────── 5-digit sub-second timestamp component
//!  └──────────────── 4-char prefix derived from the seed (e.g. the SKU)
//! ```
//! The body is normalized to exactly 12 characters before the check digit,
//! so normal-path codes are always 13 characters and scanner-verifiable.
//!
//! ## Guarantees
//! [`CodeGenerator::generate`] never fails. Collisions reported by the
//! caller's `taken` closure trigger bounded retries with fresh randomness
//! and a short backoff; when retries run out, an emergency fallback code is
//! issued instead - a nanosecond timestamp plus a process-local sequence
//! number, distinct within the process but not checksum-formatted.
//! [`is_checksummed`] distinguishes the two, and the ledger's UNIQUE
//! constraint on barcodes is the final backstop either way.
//!
//! Batch generation additionally tracks the codes already issued within the
//! batch, so a batch can never collide with itself even before anything is
//! persisted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::Rng;

/// Prefix length derived from the seed.
pub const PREFIX_LEN: usize = 4;

/// Body length before the check digit.
pub const BODY_LEN: usize = 12;

/// Full length of a checksummed code.
pub const CODE_LEN: usize = 13;

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry parameters for collision handling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Candidate attempts before falling back.
    pub max_attempts: u32,
    /// Sleep between attempts, letting the sub-second stamp move on.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_micros(200),
        }
    }
}

// =============================================================================
// Code Generator
// =============================================================================

/// Generator for unique scannable codes.
///
/// Cheap to construct, internally atomic; one instance can serve concurrent
/// intakes.
#[derive(Debug)]
pub struct CodeGenerator {
    /// Counter feeding the zero-padded prefix when no seed is given.
    unseeded: AtomicU64,
    /// Discriminator appended to emergency fallback codes.
    fallback_seq: AtomicU64,
    retry: RetryPolicy,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(retry: RetryPolicy) -> Self {
        CodeGenerator {
            unseeded: AtomicU64::new(0),
            fallback_seq: AtomicU64::new(0),
            retry,
        }
    }

    /// Generates one code.
    ///
    /// `taken` reports whether a candidate is already in use (persisted or
    /// otherwise reserved). On collision the generator retries with fresh
    /// randomness, bounded by the retry policy, then issues a fallback
    /// code. This function never returns an error.
    pub fn generate<F>(&self, seed: Option<&str>, mut taken: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        let prefix = match seed {
            Some(s) => seed_prefix(s),
            None => format!(
                "{:0width$}",
                self.unseeded.fetch_add(1, Ordering::Relaxed) % 10_000,
                width = PREFIX_LEN
            ),
        };

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                thread::sleep(self.retry.backoff);
            }
            let code = candidate(&prefix);
            if !taken(&code) {
                return code;
            }
        }

        self.fallback()
    }

    /// Generates `count` codes, unique among themselves as well as against
    /// whatever `taken` reports.
    pub fn generate_batch<F>(&self, count: usize, seed: Option<&str>, mut taken: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut issued: HashSet<String> = HashSet::with_capacity(count);
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            let code = self.generate(seed, |c| issued.contains(c) || taken(c));
            issued.insert(code.clone());
            codes.push(code);
        }
        codes
    }

    /// Emergency code: monotonic-enough high-resolution timestamp plus a
    /// process-local sequence number. Digits only, no check digit.
    fn fallback(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = self.fallback_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}{:04}", nanos, seq % 10_000)
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Building Blocks
// =============================================================================

/// Normalizes a seed into the 4-character code prefix: non-alphanumerics
/// stripped, uppercased, truncated, right-padded with `0`.
///
/// Public so the ledger can prefetch persisted codes sharing a prefix for
/// its collision check.
pub fn seed_prefix(seed: &str) -> String {
    let mut prefix: String = seed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .take(PREFIX_LEN)
        .collect();
    while prefix.len() < PREFIX_LEN {
        prefix.push('0');
    }
    prefix
}

/// One candidate: prefix + sub-second stamp + random suffix, normalized to
/// 12 characters, with the check digit appended.
fn candidate(prefix: &str) -> String {
    // Last five digits of the microsecond clock: sub-second resolution, so
    // near-simultaneous calls diverge even before the random suffix.
    let stamp = Utc::now().timestamp_micros().rem_euclid(100_000);
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);

    let mut body = format!("{prefix}{stamp:05}{suffix:03}");
    body.truncate(BODY_LEN);
    while body.len() < BODY_LEN {
        body.push('0');
    }

    let digit = check_digit(&body);
    body.push((b'0' + digit) as char);
    body
}

/// Weighted mod-10 check digit over a 12-character body.
///
/// Characters are read as digits where possible (non-digits count as 0);
/// odd-indexed positions weigh 3, even-indexed positions weigh 1.
pub fn check_digit(body: &str) -> u8 {
    let total: u32 = body
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let d = c.to_digit(10).unwrap_or(0);
            if i % 2 == 1 {
                d * 3
            } else {
                d
            }
        })
        .sum();
    ((10 - total % 10) % 10) as u8
}

/// True when `code` is a normal-path code: 13 chars whose last character is
/// the check digit of the first 12. Fallback codes fail this.
pub fn is_checksummed(code: &str) -> bool {
    if code.len() != CODE_LEN || !code.is_ascii() {
        return false;
    }
    let (body, last) = code.split_at(BODY_LEN);
    last.chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
        == Some(check_digit(body))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_digit_known_values() {
        // odd positions 2,4,6,8,0,2 -> 22*3 = 66; even 1,3,5,7,9,1 -> 26;
        // total 92 -> (10 - 2) % 10 = 8
        assert_eq!(check_digit("123456789012"), 8);
        assert_eq!(check_digit("000000000000"), 0);
        // letters read as 0
        assert_eq!(check_digit("ABCD00000000"), 0);
        assert_eq!(check_digit("ABCD00000001"), check_digit("000000000001"));
    }

    #[test]
    fn test_seed_prefix() {
        assert_eq!(seed_prefix("iphone-15"), "IPHO");
        assert_eq!(seed_prefix("ab"), "AB00");
        assert_eq!(seed_prefix("x- !!"), "X000");
        assert_eq!(seed_prefix(""), "0000");
    }

    #[test]
    fn test_generate_shape() {
        let gen = CodeGenerator::new();
        let code = gen.generate(Some("GALAXY-S24"), |_| false);

        assert_eq!(code.len(), CODE_LEN);
        assert!(code.starts_with("GALA"));
        assert!(is_checksummed(&code));
    }

    #[test]
    fn test_generate_without_seed_uses_counter_prefix() {
        let gen = CodeGenerator::new();
        let a = gen.generate(None, |_| false);
        let b = gen.generate(None, |_| false);

        assert!(a.starts_with("0000"));
        assert!(b.starts_with("0001"));
        assert!(is_checksummed(&a));
    }

    #[test]
    fn test_collision_retries_with_fresh_candidate() {
        let gen = CodeGenerator::new();
        let mut rejected = Vec::new();
        let code = gen.generate(Some("SKU"), |c| {
            if rejected.len() < 2 {
                rejected.push(c.to_string());
                true
            } else {
                false
            }
        });

        assert_eq!(rejected.len(), 2);
        assert!(is_checksummed(&code));
        assert!(!rejected.contains(&code));
    }

    #[test]
    fn test_exhausted_attempts_fall_back() {
        let gen = CodeGenerator::new();
        let mut attempts: u32 = 0;
        let code = gen.generate(Some("SKU"), |_| {
            attempts += 1;
            true
        });

        assert_eq!(attempts, RetryPolicy::default().max_attempts);
        assert!(!is_checksummed(&code));
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        // fallback codes stay distinct within the process
        let other = gen.generate(Some("SKU"), |_| true);
        assert_ne!(code, other);
    }

    #[test]
    fn test_batch_is_internally_unique() {
        let gen = CodeGenerator::new();
        let codes = gen.generate_batch(200, Some("PIXEL-9"), |_| false);

        assert_eq!(codes.len(), 200);
        let distinct: HashSet<&String> = codes.iter().collect();
        assert_eq!(distinct.len(), 200);
        for code in &codes {
            assert!(code.starts_with("PIXE"));
            assert!(is_checksummed(code));
        }
    }
}
