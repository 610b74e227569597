//! Free-text message dispatch.

use std::sync::Arc;

use tracing::{info, warn};

use smsgate_core::{DeliveryJob, DomainResult, LocalPhone};

use super::Broadcaster;

/// Validates a phone and broadcasts a text to it.
///
/// Both variants reject a malformed phone before touching the broadcaster
/// and otherwise broadcast unconditionally.
#[derive(Clone)]
pub struct DispatchService {
    broadcaster: Arc<dyn Broadcaster>,
}

impl DispatchService {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Sends to a strictly local-format number.
    pub fn send_local(&self, raw_phone: &str, text: &str) -> DomainResult<DeliveryJob> {
        let phone = LocalPhone::parse(raw_phone).map_err(|e| {
            warn!(phone = %raw_phone, "Invalid phone number");
            e
        })?;
        Ok(self.send(&phone, text))
    }

    /// Sends to a number with or without the country prefix.
    pub fn send_prefixed(&self, raw_phone: &str, text: &str) -> DomainResult<DeliveryJob> {
        let phone = LocalPhone::parse_prefixed(raw_phone).map_err(|e| {
            warn!(phone = %raw_phone, "Invalid phone number");
            e
        })?;
        Ok(self.send(&phone, text))
    }

    fn send(&self, phone: &LocalPhone, text: &str) -> DeliveryJob {
        let job = DeliveryJob::message(phone, text);
        let recipients = self.broadcaster.deliver(&job);
        info!(
            phone = %job.phone,
            message_len = text.len(),
            recipients,
            "Message dispatched"
        );
        job
    }
}
