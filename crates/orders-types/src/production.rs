//! Production (kitchen) status vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderStatus, UnknownStatus};

/// Well-known topic on which the kitchen publishes status changes.
pub const PRODUCTION_STATUS_TOPIC: &str = "production_status_changed";

/// Maps a kitchen status word into an order status.
///
/// Only the statuses the kitchen owns are recognised. The kitchen service
/// publishes the storefront labels, so both those and the enum names are
/// accepted.
pub fn production_status(value: &str) -> Result<OrderStatus, UnknownStatus> {
	let trimmed = value.trim();
	match trimmed.to_ascii_uppercase().as_str() {
		"PREPARING" => return Ok(OrderStatus::Preparing),
		"DONE" | "READY" => return Ok(OrderStatus::Done),
		"FINISHED" | "DELIVERED" => return Ok(OrderStatus::Finished),
		_ => {}
	}

	[OrderStatus::Preparing, OrderStatus::Done, OrderStatus::Finished]
		.into_iter()
		.find(|status| status.label().eq_ignore_ascii_case(trimmed))
		.ok_or_else(|| UnknownStatus {
			vocabulary: "production",
			value: value.to_string(),
		})
}

/// Production-status-changed message as published by the kitchen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionStatusChangedMessage {
	#[serde(alias = "orderID", alias = "orderId")]
	pub order_id: String,
	pub status: String,
	#[serde(default, alias = "updatedAt", skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<DateTime<Utc>>,
}

/// Preparation request sent to the kitchen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparationRequest {
	pub order_id: String,
	pub status: OrderStatus,
}
