//! Request-facing services.
//!
//! Both services hand their jobs to a [`Broadcaster`]; in the daemon that is
//! the realtime gateway, in tests a recorder.

pub mod codes;
pub mod dispatch;

pub use codes::{CodeError, CodeService, IssueOutcome, VerifyOutcome};
pub use dispatch::DispatchService;

use smsgate_core::DeliveryJob;

/// Fan-out of delivery jobs to connected workers.
///
/// Delivery is best-effort and never fails from the caller's point of view.
pub trait Broadcaster: Send + Sync {
    /// Sends `job` to every connected worker, returning the recipient count.
    fn deliver(&self, job: &DeliveryJob) -> usize;
}
