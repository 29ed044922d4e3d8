//! Event bus for inter-component communication.
//!
//! A thin wrapper over a tokio broadcast channel. Publishing never blocks and
//! succeeds only when at least one subscriber is attached; callers that do not
//! care about delivery ignore the result.

use orders_types::OrderEvent;
use tokio::sync::broadcast;

/// Broadcast bus for [`OrderEvent`]s.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<OrderEvent>,
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Subscribes to events published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to every subscriber.
	pub fn publish(
		&self,
		event: OrderEvent,
	) -> Result<(), broadcast::error::SendError<OrderEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}
