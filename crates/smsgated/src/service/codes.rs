//! One-time code issuance and verification.
//!
//! Per phone the lifecycle is `absent -> pending -> absent`; a pending entry
//! leaves on successful verification or store expiry. A wrong guess keeps it
//! pending.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use smsgate_core::{DeliveryJob, DomainError, LocalPhone, OtpCode};

use super::Broadcaster;
use crate::store::{code_key, CodeStore, StoreError, CODE_TTL};

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Result of [`CodeService::issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A new code was broadcast and stored
    Sent,
    /// A live code already exists for this phone
    AlreadyPending,
}

/// Result of [`CodeService::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Code matched and was consumed
    Verified,
    /// Code did not match; the pending entry is kept
    Invalid,
    /// No live code for this phone
    Expired,
}

/// Failures of the code service, distinct from its business outcomes.
#[derive(Debug, Error)]
pub enum CodeError {
    #[error(transparent)]
    InvalidPhone(DomainError),

    #[error("code store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error(transparent)]
    Randomness(DomainError),
}

impl From<DomainError> for CodeError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidPhone { .. } => Self::InvalidPhone(e),
            DomainError::Randomness { .. } => Self::Randomness(e),
        }
    }
}

/// Issues and verifies one-time codes.
#[derive(Clone)]
pub struct CodeService {
    store: Arc<dyn CodeStore>,
    broadcaster: Arc<dyn Broadcaster>,
    store_timeout: Duration,
}

impl CodeService {
    pub fn new(store: Arc<dyn CodeStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Sets the per-call store deadline.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Issues a code for a local-format phone number.
    ///
    /// The delivery job is broadcast before the code is stored. If the store
    /// write then fails the caller gets [`CodeError::StoreUnavailable`] even
    /// though workers already received the code.
    pub async fn issue(&self, raw_phone: &str) -> Result<IssueOutcome, CodeError> {
        let phone = LocalPhone::parse(raw_phone).map_err(|e| {
            warn!(phone = %raw_phone, "Invalid phone number");
            CodeError::from(e)
        })?;
        let key = code_key(phone.as_str());

        let existing = self.bounded("GET", self.store.get(&key)).await?;
        if existing.is_some_and(|code| !code.is_empty()) {
            info!(phone = %phone, "Code already pending, rejecting");
            return Ok(IssueOutcome::AlreadyPending);
        }

        let code = OtpCode::generate().map_err(|e| {
            warn!(phone = %phone, error = %e, "Failed to generate code");
            CodeError::from(e)
        })?;

        let job = DeliveryJob::otp(&phone, &code);
        let recipients = self.broadcaster.deliver(&job);
        info!(phone = %job.phone, recipients, "Code broadcast");

        self.bounded(
            "SETEX",
            self.store.set_with_ttl(&key, code.as_str(), CODE_TTL),
        )
        .await
        .map_err(|e| {
            warn!(phone = %phone, error = %e, "Code broadcast but not stored");
            e
        })?;

        info!(phone = %phone, ttl_secs = CODE_TTL.as_secs(), "Code stored");
        Ok(IssueOutcome::Sent)
    }

    /// Checks a submitted code.
    ///
    /// The phone is used as-is for the lookup; an unknown shape simply
    /// misses and reports [`VerifyOutcome::Expired`].
    pub async fn verify(&self, raw_phone: &str, submitted: &str) -> Result<VerifyOutcome, CodeError> {
        let key = code_key(raw_phone);

        let Some(stored) = self.bounded("GET", self.store.get(&key)).await? else {
            info!(phone = %raw_phone, "Code not found or expired");
            return Ok(VerifyOutcome::Expired);
        };

        if stored != submitted {
            info!(phone = %raw_phone, "Invalid code attempt");
            return Ok(VerifyOutcome::Invalid);
        }

        self.bounded("DEL", self.store.delete(&key)).await?;
        info!(phone = %raw_phone, "Code verified and cleared");
        Ok(VerifyOutcome::Verified)
    }

    /// Runs a store call under the configured deadline.
    async fn bounded<T>(
        &self,
        command: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                command,
                timeout: self.store_timeout,
            }),
        }
    }
}
