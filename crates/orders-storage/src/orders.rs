//! Order repository.
//!
//! Orders live under the `orders` namespace keyed by id; a reverse index under
//! `order_by_payment_id` resolves settlement events that only carry a payment
//! id, and `awaiting_preparation` lists the orders sitting at `RECEIVED` so
//! they can be found without scanning every order. Updates to a single order
//! are serialized with a per-order async lock so a caller can read, validate
//! and write as one step.

use crate::{KeyedLocks, StorageError, StorageService};
use orders_types::{current_timestamp, Order, OrderList, OrderStatus, StorageKey};
use std::sync::Arc;

/// Outcome of a failed [`OrderStore::update_with`].
#[derive(Debug)]
pub enum UpdateError<E> {
	/// Reading or writing the record failed.
	Storage(StorageError),
	/// The updater refused the change; nothing was written.
	Rejected(E),
}

/// Typed access to order records.
pub struct OrderStore {
	storage: Arc<StorageService>,
	locks: KeyedLocks,
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			locks: KeyedLocks::new(),
		}
	}

	/// Gets an order by id, including soft-deleted ones.
	pub async fn get(&self, order_id: &str) -> Result<Order, StorageError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), order_id)
			.await
	}

	/// Resolves an order through the payment id recorded at checkout.
	pub async fn get_by_payment_id(&self, payment_id: &str) -> Result<Order, StorageError> {
		let order_id: String = self
			.storage
			.retrieve(StorageKey::OrderByPaymentId.as_str(), payment_id)
			.await?;
		let order = self.get(&order_id).await?;

		// The index is written after the record; a stale entry pointing at an
		// order that has since moved to a different payment is not a match.
		if order.payment_id.as_deref() != Some(payment_id) {
			return Err(StorageError::NotFound);
		}
		Ok(order)
	}

	/// Stores a new order. Fails if the id is already taken.
	pub async fn create(&self, order: &Order) -> Result<(), StorageError> {
		let _guard = self.locks.lock(&order.id).await;

		if self
			.storage
			.exists(StorageKey::Orders.as_str(), &order.id)
			.await?
		{
			return Err(StorageError::AlreadyExists(order.id.clone()));
		}
		if order.status == OrderStatus::Received {
			self.mark_awaiting_preparation(&order.id).await?;
		}
		self.storage
			.store(StorageKey::Orders.as_str(), &order.id, order)
			.await?;
		self.index_payment(order).await
	}

	/// Overwrites an existing order with the given record.
	pub async fn update(&self, order: &Order) -> Result<Order, StorageError> {
		let replacement = order.clone();
		self.update_with(&order.id, move |current| {
			*current = replacement;
			Ok::<(), std::convert::Infallible>(())
		})
		.await
		.map_err(|e| match e {
			UpdateError::Storage(e) => e,
			UpdateError::Rejected(never) => match never {},
		})
	}

	/// Reads an order, applies `updater` and persists the result atomically
	/// with respect to other updates of the same order.
	///
	/// `updated_at` is refreshed on every successful write. If the updater
	/// returns an error nothing is written.
	pub async fn update_with<F, E>(&self, order_id: &str, updater: F) -> Result<Order, UpdateError<E>>
	where
		F: FnOnce(&mut Order) -> Result<(), E>,
	{
		let _guard = self.locks.lock(order_id).await;

		let mut order = self.get(order_id).await.map_err(UpdateError::Storage)?;
		let previous_payment = order.payment_id.clone();
		let previous_status = order.status;

		updater(&mut order).map_err(UpdateError::Rejected)?;
		order.updated_at = current_timestamp();

		// Indexed before the record so a paid order is never missing from it.
		if order.status == OrderStatus::Received && previous_status != OrderStatus::Received {
			self.mark_awaiting_preparation(order_id)
				.await
				.map_err(UpdateError::Storage)?;
		}

		self.storage
			.update(StorageKey::Orders.as_str(), order_id, &order)
			.await
			.map_err(UpdateError::Storage)?;

		if previous_status == OrderStatus::Received && order.status != OrderStatus::Received {
			// A leftover id is skipped and pruned by `awaiting_preparation`.
			if let Err(e) = self
				.storage
				.remove(StorageKey::AwaitingPreparation.as_str(), order_id)
				.await
			{
				tracing::warn!(order_id = %order_id, error = %e, "Failed to unindex prepared order");
			}
		}

		if order.payment_id != previous_payment {
			self.index_payment(&order)
				.await
				.map_err(UpdateError::Storage)?;
		}

		Ok(order)
	}

	/// Marks an order as deleted. Deleting twice keeps the first timestamp.
	pub async fn delete(&self, order_id: &str) -> Result<Order, StorageError> {
		self.update_with(order_id, |order| {
			if order.deleted_at.is_none() {
				order.deleted_at = Some(current_timestamp());
			}
			Ok::<(), std::convert::Infallible>(())
		})
		.await
		.map_err(|e| match e {
			UpdateError::Storage(e) => e,
			UpdateError::Rejected(never) => match never {},
		})
	}

	/// Lists live orders, oldest first.
	pub async fn list(&self, limit: usize, offset: usize) -> Result<OrderList, StorageError> {
		self.page(|_| true, limit, offset).await
	}

	/// Lists live orders belonging to a user, oldest first.
	pub async fn list_by_user(
		&self,
		user_id: &str,
		limit: usize,
		offset: usize,
	) -> Result<OrderList, StorageError> {
		self.page(|order| order.user_id.as_deref() == Some(user_id), limit, offset)
			.await
	}

	/// Returns live orders that were paid for but not yet accepted by the
	/// kitchen, least recently updated first.
	///
	/// Reads only the `awaiting_preparation` index and the orders it names.
	pub async fn awaiting_preparation(&self) -> Result<Vec<Order>, StorageError> {
		let ids: Vec<String> = self
			.storage
			.retrieve_all(StorageKey::AwaitingPreparation.as_str())
			.await?;

		let mut orders = Vec::with_capacity(ids.len());
		for id in ids {
			match self.get(&id).await {
				Ok(order) if order.status == OrderStatus::Received && !order.is_deleted() => {
					orders.push(order);
				}
				Ok(_) | Err(StorageError::NotFound) => {
					self.storage
						.remove(StorageKey::AwaitingPreparation.as_str(), &id)
						.await?;
				}
				Err(e) => return Err(e),
			}
		}
		orders.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
		Ok(orders)
	}

	async fn live_orders(&self) -> Result<Vec<Order>, StorageError> {
		let mut orders: Vec<Order> = self
			.storage
			.retrieve_all(StorageKey::Orders.as_str())
			.await?;
		orders.retain(|order| !order.is_deleted());
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
		Ok(orders)
	}

	async fn page<P>(&self, predicate: P, limit: usize, offset: usize) -> Result<OrderList, StorageError>
	where
		P: Fn(&Order) -> bool,
	{
		let matching: Vec<Order> = self
			.live_orders()
			.await?
			.into_iter()
			.filter(|order| predicate(order))
			.collect();
		let total = matching.len();

		Ok(OrderList {
			orders: matching.into_iter().skip(offset).take(limit).collect(),
			limit,
			offset,
			total,
		})
	}

	async fn mark_awaiting_preparation(&self, order_id: &str) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::AwaitingPreparation.as_str(), order_id, &order_id)
			.await
	}

	async fn index_payment(&self, order: &Order) -> Result<(), StorageError> {
		match &order.payment_id {
			Some(payment_id) => {
				self.storage
					.store(StorageKey::OrderByPaymentId.as_str(), payment_id, &order.id)
					.await
			}
			None => Ok(()),
		}
	}
}
