//! Storage-related types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Storage namespaces.
///
/// Replaces string literals in storage calls with typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order records keyed by order id.
	Orders,
	/// Reverse index from payment id to order id.
	OrderByPaymentId,
	/// The pending work queue.
	PendingWork,
	/// Ids of paid orders the kitchen has not accepted yet.
	AwaitingPreparation,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::OrderByPaymentId => "order_by_payment_id",
			StorageKey::PendingWork => "pending_work",
			StorageKey::AwaitingPreparation => "awaiting_preparation",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::OrderByPaymentId,
			Self::PendingWork,
			Self::AwaitingPreparation,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"order_by_payment_id" => Ok(Self::OrderByPaymentId),
			"pending_work" => Ok(Self::PendingWork),
			"awaiting_preparation" => Ok(Self::AwaitingPreparation),
			_ => Err(()),
		}
	}
}

/// A checked-out order awaiting payment settlement.
///
/// Its presence in the pending work queue is the only signal the reconciler
/// uses to keep polling the payment gateway for that order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PendingWorkEntry {
	pub order_id: String,
	pub payment_id: String,
}

impl PendingWorkEntry {
	pub fn new(order_id: impl Into<String>, payment_id: impl Into<String>) -> Self {
		Self {
			order_id: order_id.into(),
			payment_id: payment_id.into(),
		}
	}
}
