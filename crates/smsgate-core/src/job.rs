//! Delivery jobs broadcast to workers.

use serde::{Deserialize, Serialize};

use crate::code::OtpCode;
use crate::phone::LocalPhone;

/// Text sent to the user in front of their activation code.
pub const OTP_MESSAGE_PREFIX: &str = "Siziň aktiwasiýa koduňyz";

/// A transient instruction for workers to deliver a text to a phone.
///
/// Not persisted and not correlated with any particular worker: every
/// connected worker receives every job and decides for itself.
///
/// The wire field for the text is `pass`, which workers already understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Destination in international format (`+993XXXXXXXX`)
    pub phone: String,

    /// Message text to deliver
    pub pass: String,
}

impl DeliveryJob {
    /// Creates a job that delivers a one-time code.
    pub fn otp(phone: &LocalPhone, code: &OtpCode) -> Self {
        Self {
            phone: phone.international(),
            pass: format!("{OTP_MESSAGE_PREFIX} {code}"),
        }
    }

    /// Creates a job that delivers free text.
    pub fn message(phone: &LocalPhone, text: impl Into<String>) -> Self {
        Self {
            phone: phone.international(),
            pass: text.into(),
        }
    }
}
