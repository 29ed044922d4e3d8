//! Order state machine implementation.
//!
//! Every status write is a compare-and-swap: the current status is checked
//! against the caller's expectation and the transition table while holding the
//! order's lock, and nothing is written if either check fails. Two workers
//! racing to settle the same order therefore converge on whichever write lands
//! first.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use orders_storage::{OrderStore, StorageError, UpdateError};
use orders_types::{Order, OrderStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order status is {actual}, expected {expected}")]
	StatusMismatch {
		expected: OrderStatus,
		actual: OrderStatus,
	},
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Invalid order update: {0}")]
	InvalidUpdate(String),
	#[error("Kitchen report from {reported} predates the last one applied ({last})")]
	StaleReport {
		reported: DateTime<Utc>,
		last: DateTime<Utc>,
	},
}

// Each state maps to the states it may move to.
static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	use OrderStatus::*;

	let mut m = HashMap::new();
	m.insert(Unset, HashSet::from([Open]));
	m.insert(Open, HashSet::from([WaitingPayment]));
	m.insert(
		WaitingPayment,
		HashSet::from([Received, Canceled, FailedPayment]),
	);
	m.insert(Received, HashSet::from([Preparing, Done, Finished]));
	m.insert(Preparing, HashSet::from([Done, Finished]));
	// Kitchen updates may arrive out of order.
	m.insert(Done, HashSet::from([Preparing, Finished]));
	m.insert(Finished, HashSet::new()); // terminal
	m.insert(Canceled, HashSet::new()); // terminal
	m.insert(FailedPayment, HashSet::new()); // terminal
	m
});

/// Manages order state transitions and persistence.
pub struct OrderStateMachine {
	store: Arc<OrderStore>,
}

impl OrderStateMachine {
	pub fn new(store: Arc<OrderStore>) -> Self {
		Self { store }
	}

	/// Checks if a state transition is valid.
	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		TRANSITIONS
			.get(&from)
			.is_some_and(|allowed| allowed.contains(&to))
	}

	/// Updates an order with a closure and persists it.
	///
	/// The closure runs under the order's lock; returning an error leaves the
	/// stored record untouched.
	pub async fn update_order_with<F>(
		&self,
		order_id: &str,
		updater: F,
	) -> Result<Order, OrderStateError>
	where
		F: FnOnce(&mut Order) -> Result<(), OrderStateError>,
	{
		self.store
			.update_with(order_id, updater)
			.await
			.map_err(|e| match e {
				UpdateError::Storage(StorageError::NotFound) => {
					OrderStateError::OrderNotFound(order_id.to_string())
				}
				UpdateError::Storage(e) => OrderStateError::Storage(e.to_string()),
				UpdateError::Rejected(e) => e,
			})
	}

	/// Moves an order from `expected` to `new_status`.
	///
	/// Fails with `StatusMismatch` if the order is no longer at `expected`,
	/// which callers treat as having lost a race.
	pub async fn compare_and_transition(
		&self,
		order_id: &str,
		expected: OrderStatus,
		new_status: OrderStatus,
	) -> Result<Order, OrderStateError> {
		if !Self::is_valid_transition(expected, new_status) {
			return Err(OrderStateError::InvalidTransition {
				from: expected,
				to: new_status,
			});
		}

		self.update_order_with(order_id, |order| {
			if order.status != expected {
				return Err(OrderStateError::StatusMismatch {
					expected,
					actual: order.status,
				});
			}
			order.status = new_status;
			Ok(())
		})
		.await
	}

	/// Applies a kitchen status, moving the order from `expected`.
	///
	/// Same compare-and-swap as [`Self::compare_and_transition`]; a report
	/// taken before the last applied one fails with `StaleReport`.
	pub async fn apply_kitchen_report(
		&self,
		order_id: &str,
		expected: OrderStatus,
		new_status: OrderStatus,
		reported_at: Option<DateTime<Utc>>,
	) -> Result<Order, OrderStateError> {
		if !Self::is_valid_transition(expected, new_status) {
			return Err(OrderStateError::InvalidTransition {
				from: expected,
				to: new_status,
			});
		}

		self.update_order_with(order_id, |order| {
			if order.status != expected {
				return Err(OrderStateError::StatusMismatch {
					expected,
					actual: order.status,
				});
			}
			if let (Some(reported), Some(last)) = (reported_at, order.kitchen_updated_at) {
				if reported < last {
					return Err(OrderStateError::StaleReport { reported, last });
				}
			}
			order.status = new_status;
			if reported_at.is_some() {
				order.kitchen_updated_at = reported_at;
			}
			Ok(())
		})
		.await
	}

	/// Records the payment created at checkout.
	///
	/// Only valid while the order waits for payment and has no payment yet.
	pub async fn set_payment_id(
		&self,
		order_id: &str,
		payment_id: &str,
	) -> Result<Order, OrderStateError> {
		self.update_order_with(order_id, |order| {
			if order.status != OrderStatus::WaitingPayment {
				return Err(OrderStateError::StatusMismatch {
					expected: OrderStatus::WaitingPayment,
					actual: order.status,
				});
			}
			if let Some(existing) = &order.payment_id {
				return Err(OrderStateError::InvalidUpdate(format!(
					"order already has payment {}",
					existing
				)));
			}
			order.payment_id = Some(payment_id.to_string());
			Ok(())
		})
		.await
	}

	/// Gets an order by ID.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		self.store.get(order_id).await.map_err(|e| match e {
			StorageError::NotFound => OrderStateError::OrderNotFound(order_id.to_string()),
			e => OrderStateError::Storage(e.to_string()),
		})
	}

	/// Stores a new order.
	pub async fn store_order(&self, order: &Order) -> Result<(), OrderStateError> {
		self.store
			.create(order)
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))
	}
}
