//! One-time verification codes.

use std::fmt;

use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Smallest code that can be issued.
pub const CODE_MIN: u32 = 10_000;

/// Largest code that can be issued.
pub const CODE_MAX: u32 = 99_999;

/// Number of distinct codes.
const CODE_SPAN: u64 = (CODE_MAX - CODE_MIN + 1) as u64;

/// Draws at or above this bound are rejected so that `draw % CODE_SPAN`
/// stays uniform.
const ACCEPT_BOUND: u64 = (1u64 << 32) - ((1u64 << 32) % CODE_SPAN);

/// A five-digit one-time code in `[CODE_MIN, CODE_MAX]`.
///
/// The range is fixed-width, so no zero padding is involved and the leading
/// digit is never `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OtpCode(String);

impl OtpCode {
    /// Generates a code from the operating system CSPRNG.
    ///
    /// A failing randomness source is reported as an error; there is no
    /// fallback to a weaker generator.
    pub fn generate() -> DomainResult<Self> {
        Self::generate_from(&mut OsRng).map_err(|e| DomainError::Randomness {
            reason: e.to_string(),
        })
    }

    /// Generates a code from the given random source by rejection sampling.
    pub fn generate_from<R>(rng: &mut R) -> Result<Self, R::Error>
    where
        R: TryRngCore + ?Sized,
    {
        loop {
            let draw = u64::from(rng.try_next_u32()?);
            if draw < ACCEPT_BOUND {
                let value = u64::from(CODE_MIN) + draw % CODE_SPAN;
                return Ok(Self(value.to_string()));
            }
        }
    }

    /// Returns the code digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the numeric value of the code.
    pub fn value(&self) -> u32 {
        self.0.parse().unwrap_or_default()
    }
}

impl fmt::Display for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<OtpCode> for String {
    fn from(code: OtpCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::VecDeque;

    /// Replays a fixed sequence of draws, then fails.
    struct ScriptedRng(VecDeque<u32>);

    #[derive(Debug)]
    struct Exhausted;

    impl fmt::Display for Exhausted {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "scripted randomness exhausted")
        }
    }

    impl TryRngCore for ScriptedRng {
        type Error = Exhausted;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            self.0.pop_front().ok_or(Exhausted)
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            let hi = self.try_next_u32()?;
            let lo = self.try_next_u32()?;
            Ok((u64::from(hi) << 32) | u64::from(lo))
        }

        fn try_fill_bytes(&mut self, dst: &mut [u8]) -> Result<(), Self::Error> {
            for byte in dst {
                *byte = self.try_next_u32()? as u8;
            }
            Ok(())
        }
    }

    #[test]
    fn test_os_generated_codes_are_in_range() {
        for _ in 0..1_000 {
            let code = OtpCode::generate().unwrap();
            assert_eq!(code.as_str().len(), 5);
            assert!((CODE_MIN..=CODE_MAX).contains(&code.value()));
            assert!(!code.as_str().starts_with('0'));
        }
    }

    #[test]
    fn test_range_edges() {
        let mut rng = ScriptedRng(VecDeque::from([0, (CODE_SPAN - 1) as u32]));
        assert_eq!(OtpCode::generate_from(&mut rng).unwrap().as_str(), "10000");
        assert_eq!(OtpCode::generate_from(&mut rng).unwrap().as_str(), "99999");
    }

    #[test]
    fn test_draws_in_biased_tail_are_rejected() {
        let mut rng = ScriptedRng(VecDeque::from([u32::MAX, ACCEPT_BOUND as u32, 5]));
        let code = OtpCode::generate_from(&mut rng).unwrap();
        assert_eq!(code.as_str(), "10005");
        assert!(rng.0.is_empty());
    }

    #[test]
    fn test_randomness_failure_is_an_error() {
        let mut rng = ScriptedRng(VecDeque::new());
        assert!(OtpCode::generate_from(&mut rng).is_err());
    }

    #[test]
    fn test_distribution_is_uniform() {
        // Chi-square over the leading digit and over the last digit.
        // Critical values at p = 0.001: 26.12 (8 dof), 27.88 (9 dof).
        const SAMPLES: usize = 180_000;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut leading = [0usize; 9];
        let mut trailing = [0usize; 10];
        let mut sum = 0u64;

        for _ in 0..SAMPLES {
            let code = OtpCode::generate_from(&mut rng).unwrap();
            let value = code.value();
            assert!((CODE_MIN..=CODE_MAX).contains(&value));
            leading[(value / 10_000 - 1) as usize] += 1;
            trailing[(value % 10) as usize] += 1;
            sum += u64::from(value);
        }

        let chi_square = |buckets: &[usize]| {
            let expected = SAMPLES as f64 / buckets.len() as f64;
            buckets
                .iter()
                .map(|&n| (n as f64 - expected).powi(2) / expected)
                .sum::<f64>()
        };

        assert!(chi_square(&leading) < 26.12, "leading digits: {leading:?}");
        assert!(chi_square(&trailing) < 27.88, "trailing digits: {trailing:?}");

        let mean = sum as f64 / SAMPLES as f64;
        assert!((mean - 54_999.5).abs() < 500.0, "mean drifted: {mean}");
    }
}
