//! Payment status vocabulary.
//!
//! The payment-clearing service speaks its own lowercase vocabulary
//! (`paid`, `pending`, ...). Everything crossing into the orchestrator is
//! mapped into [`PaymentStatus`] first; unknown words are rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::OrderStatus;

/// Well-known topic on which the clearing service publishes status changes.
pub const PAYMENT_STATUS_TOPIC: &str = "payment_status_changed";

/// Error returned when an external status word has no internal mapping.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unrecognized {vocabulary} status: '{value}'")]
pub struct UnknownStatus {
	pub vocabulary: &'static str,
	pub value: String,
}

/// Internal payment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
	/// Awaiting a decision.
	Open,
	/// Settled in favour of the merchant.
	Approved,
	/// Declined by the customer's issuer or the clearing service.
	Refused,
	/// The clearing service could not process the payment.
	Failed,
}

/// Terminal decision for a payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
	Approved,
	Refused,
	Failed,
}

impl PaymentStatus {
	/// Maps the clearing service's vocabulary into the internal enumeration.
	pub fn from_clearing(value: &str) -> Result<Self, UnknownStatus> {
		match value.trim().to_ascii_lowercase().as_str() {
			"paid" | "approved" => Ok(PaymentStatus::Approved),
			"pending" | "open" | "created" => Ok(PaymentStatus::Open),
			"refused" | "rejected" | "declined" | "canceled" | "cancelled" | "expired" => {
				Ok(PaymentStatus::Refused)
			}
			"failed" | "error" => Ok(PaymentStatus::Failed),
			_ => Err(UnknownStatus {
				vocabulary: "payment",
				value: value.to_string(),
			}),
		}
	}

	/// Returns the settlement decision, or `None` while still open.
	pub fn outcome(&self) -> Option<PaymentOutcome> {
		match self {
			PaymentStatus::Open => None,
			PaymentStatus::Approved => Some(PaymentOutcome::Approved),
			PaymentStatus::Refused => Some(PaymentOutcome::Refused),
			PaymentStatus::Failed => Some(PaymentOutcome::Failed),
		}
	}
}

impl PaymentOutcome {
	/// Order status an outcome settles a waiting order into.
	pub fn order_status(&self) -> OrderStatus {
		match self {
			PaymentOutcome::Approved => OrderStatus::Received,
			PaymentOutcome::Refused => OrderStatus::Canceled,
			PaymentOutcome::Failed => OrderStatus::FailedPayment,
		}
	}
}

impl fmt::Display for PaymentOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PaymentOutcome::Approved => write!(f, "approved"),
			PaymentOutcome::Refused => write!(f, "refused"),
			PaymentOutcome::Failed => write!(f, "failed"),
		}
	}
}

/// Payment record as reported by the clearing service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentReceipt {
	pub payment_id: String,
	pub order_id: String,
	pub status: PaymentStatus,
}

/// Payment-status-changed message as published by the clearing service.
///
/// Either identifier may be missing, but not both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusChangedMessage {
	#[serde(default, alias = "id", alias = "paymentID", alias = "paymentId")]
	pub payment_id: Option<String>,
	#[serde(default, alias = "orderID", alias = "orderId")]
	pub order_id: Option<String>,
	pub status: String,
}
