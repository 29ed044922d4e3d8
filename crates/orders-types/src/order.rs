//! Order types for the lifecycle orchestrator.
//!
//! An order is a priced snapshot of the products a customer picked. Its
//! `status` is driven exclusively by the orchestrator as payment and production
//! events arrive.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::current_timestamp;

/// A product as it looked when it was added to an order.
///
/// Snapshots are independent of later catalog edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSnapshot {
	/// Catalog identifier of the product.
	pub id: String,
	/// Product name at the time of ordering.
	pub name: String,
	/// Product description at the time of ordering.
	#[serde(default)]
	pub description: String,
	/// Category the product belonged to.
	pub category_id: String,
	/// Unit price captured at ordering time.
	pub price: Decimal,
}

/// An order record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	/// Owner of the order; absent for anonymous orders.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	/// Payment created at checkout. Unset until then.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payment_id: Option<String>,
	/// Timestamp when this order was created.
	pub created_at: u64,
	/// Timestamp when this order was last updated.
	pub updated_at: u64,
	/// Soft-delete marker.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_at: Option<u64>,
	/// Sum of the snapshot prices.
	pub price: Decimal,
	/// Current status of the order.
	pub status: OrderStatus,
	/// Ordered product snapshots.
	pub products: Vec<ProductSnapshot>,
	/// Kitchen timestamp of the last production status applied.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub kitchen_updated_at: Option<DateTime<Utc>>,
}

impl Order {
	/// Builds a new `OPEN` order from product snapshots.
	///
	/// The caller is responsible for rejecting empty product lists.
	pub fn new(id: String, user_id: Option<String>, products: Vec<ProductSnapshot>) -> Self {
		let now = current_timestamp();
		Self {
			id,
			user_id,
			payment_id: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
			price: Self::total_of(&products),
			status: OrderStatus::Open,
			products,
			kitchen_updated_at: None,
		}
	}

	/// Sum of the prices of the given snapshots.
	pub fn total_of(products: &[ProductSnapshot]) -> Decimal {
		products.iter().map(|p| p.price).sum()
	}

	/// Appends snapshots and keeps `price` equal to their sum.
	pub fn add_products(&mut self, products: Vec<ProductSnapshot>) {
		self.products.extend(products);
		self.price = Self::total_of(&self.products);
	}

	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}

	/// Whether a kitchen report taken at `reported_at` predates the last one
	/// applied. Reports without a timestamp are never stale.
	pub fn is_stale_kitchen_report(&self, reported_at: Option<DateTime<Utc>>) -> bool {
		matches!(
			(reported_at, self.kitchen_updated_at),
			(Some(reported), Some(last)) if reported < last
		)
	}
}

/// A page of orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderList {
	pub orders: Vec<Order>,
	pub limit: usize,
	pub offset: usize,
	/// Number of orders matching the query, regardless of paging.
	pub total: usize,
}

/// Status of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
	/// No status recorded yet.
	#[default]
	Unset,
	/// Created and accepting items.
	Open,
	/// Checked out, payment requested.
	WaitingPayment,
	/// Payment approved.
	Received,
	/// The kitchen is preparing the order.
	Preparing,
	/// Ready for pickup.
	Done,
	/// Delivered to the customer.
	Finished,
	/// Payment refused.
	Canceled,
	/// Payment could not be processed.
	FailedPayment,
}

impl OrderStatus {
	/// Returns true for states no transition may leave.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Finished | OrderStatus::Canceled | OrderStatus::FailedPayment
		)
	}

	/// Returns true once an order has been settled by the payment side.
	pub fn is_settled(&self) -> bool {
		!matches!(
			self,
			OrderStatus::Unset | OrderStatus::Open | OrderStatus::WaitingPayment
		)
	}

	/// Customer-facing label used by the storefront and the kitchen service.
	pub fn label(&self) -> &'static str {
		match self {
			OrderStatus::Unset => "",
			OrderStatus::Open => "Aberto",
			OrderStatus::WaitingPayment => "Aguardando Pagamento",
			OrderStatus::Received => "Recebido",
			OrderStatus::Preparing => "Em Preparação",
			OrderStatus::Done => "Pronto",
			OrderStatus::Finished => "Finalizado",
			OrderStatus::Canceled => "Cancelado",
			OrderStatus::FailedPayment => "Falha no Pagamento",
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderStatus::Unset => write!(f, "UNSET"),
			OrderStatus::Open => write!(f, "OPEN"),
			OrderStatus::WaitingPayment => write!(f, "WAITING_PAYMENT"),
			OrderStatus::Received => write!(f, "RECEIVED"),
			OrderStatus::Preparing => write!(f, "PREPARING"),
			OrderStatus::Done => write!(f, "DONE"),
			OrderStatus::Finished => write!(f, "FINISHED"),
			OrderStatus::Canceled => write!(f, "CANCELED"),
			OrderStatus::FailedPayment => write!(f, "FAILED_PAYMENT"),
		}
	}
}
