use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use url::Url;

use crate::site_limits::error::{LimitError, Result};
use crate::site_limits::store::{StateKey, StateStore, StateValues};

/// TOTP time step
pub const TIME_STEP_SECS: i64 = 30;

/// Digits in a one-time code
pub const CODE_DIGITS: u32 = 6;

/// Steps accepted on each side of the current one
pub const SKEW_STEPS: i64 = 1;

/// Size of a freshly generated key (RFC 4226 recommends 160 bits)
const SECRET_BYTES: usize = 20;

/// Issuer shown by authenticator apps
pub const ISSUER: &str = "Accountability";

/// One-time code validation for accountability keys
pub struct CodeValidator;

impl CodeValidator {
    /// Check a submitted code against the steps around `at`
    ///
    /// Returns `Ok(false)` for a well-formed secret and a wrong code, and
    /// `Err(LimitError::Validation)` when the secret itself cannot be decoded.
    pub fn validate(secret_material: &str, submitted_code: &str, at: DateTime<Utc>) -> Result<bool> {
        let key = Self::decode_secret(secret_material)?;
        let submitted_code = submitted_code.trim();
        let step = Self::time_step(at);

        for offset in -SKEW_STEPS..=SKEW_STEPS {
            let candidate = step + offset;
            if candidate < 0 {
                continue;
            }
            if Self::hotp(&key, candidate as u64)? == submitted_code {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// The code for the step containing `at`
    pub fn code_at(secret_material: &str, at: DateTime<Utc>) -> Result<String> {
        let key = Self::decode_secret(secret_material)?;
        let step = Self::time_step(at).max(0);
        Self::hotp(&key, step as u64)
    }

    /// Generate a new random base32 key
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE32_NOPAD.encode(&bytes)
    }

    /// `otpauth://` URI an authenticator app can import (usually via QR code)
    pub fn provisioning_uri(label: &str, secret_material: &str) -> Result<String> {
        let mut url = Url::parse("otpauth://totp/")
            .map_err(|e| LimitError::Validation(format!("failed to build URI: {}", e)))?;

        url.set_path(&format!("/{}:{}", ISSUER, label));
        url.query_pairs_mut()
            .append_pair("secret", secret_material)
            .append_pair("issuer", ISSUER)
            .append_pair("algorithm", "SHA1")
            .append_pair("digits", &CODE_DIGITS.to_string())
            .append_pair("period", &TIME_STEP_SECS.to_string());

        Ok(url.to_string())
    }

    fn time_step(at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(TIME_STEP_SECS)
    }

    /// Decode base32 leniently: case, spaces, dashes and padding are ignored
    fn decode_secret(secret_material: &str) -> Result<Vec<u8>> {
        let cleaned: String = secret_material
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if cleaned.is_empty() {
            return Err(LimitError::Validation("secret is empty".to_string()));
        }

        BASE32_NOPAD
            .decode(cleaned.as_bytes())
            .map_err(|e| LimitError::Validation(format!("secret is not valid base32: {}", e)))
    }

    /// RFC 4226 HOTP with HMAC-SHA1 and dynamic truncation
    fn hotp(key: &[u8], counter: u64) -> Result<String> {
        let mut mac = Hmac::<Sha1>::new_from_slice(key)
            .map_err(|e| LimitError::Validation(format!("invalid key: {}", e)))?;
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = ((digest[offset] as u32 & 0x7f) << 24)
            | ((digest[offset + 1] as u32) << 16)
            | ((digest[offset + 2] as u32) << 8)
            | (digest[offset + 3] as u32);

        let code = binary % 10u32.pow(CODE_DIGITS);
        Ok(format!("{:0width$}", code, width = CODE_DIGITS as usize))
    }
}

/// Sliding-window limiter for code submissions
///
/// Attempt times live in the store under `unlockAttempts`, so every process
/// sharing the state file draws from the same window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    max_attempts: usize,
    window_ms: i64,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window_seconds: u64) -> Self {
        Self {
            max_attempts,
            window_ms: i64::try_from(window_seconds)
                .unwrap_or(i64::MAX)
                .saturating_mul(1000),
        }
    }

    /// Record an attempt at `now_ms`, failing if the window is already full
    pub fn check<S: StateStore + ?Sized>(&self, store: &mut S, now_ms: i64) -> Result<()> {
        let mut attempts = store
            .get(&[StateKey::UnlockAttempts])?
            .unlock_attempts
            .unwrap_or_default();
        attempts.retain(|&attempt| now_ms.saturating_sub(attempt) < self.window_ms);

        if attempts.len() >= self.max_attempts {
            return Err(LimitError::TooManyAttempts {
                retry_after_secs: self.retry_after_secs(&attempts, now_ms),
            });
        }

        attempts.push(now_ms);
        store.set(StateValues {
            unlock_attempts: Some(attempts),
            ..Default::default()
        })
    }

    /// Seconds until the oldest attempt leaves the window
    fn retry_after_secs(&self, attempts: &[i64], now_ms: i64) -> u64 {
        let oldest = attempts.iter().copied().min().unwrap_or(now_ms);
        let remaining_ms = self.window_ms - now_ms.saturating_sub(oldest);
        u64::try_from(remaining_ms.saturating_add(999) / 1000).unwrap_or(1).max(1)
    }

    /// Forget previous attempts (after a successful code)
    pub fn reset<S: StateStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        store.set(StateValues {
            unlock_attempts: Some(Vec::new()),
            ..Default::default()
        })
    }
}
