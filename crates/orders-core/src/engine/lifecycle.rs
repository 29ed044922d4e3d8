//! Lifecycle management for the order engine.
//!
//! [`OrderEngine::start`] launches the payment listener, the production
//! listener and the reconciler and hands back a [`WorkerHandles`] that stops
//! them again. Pending work entries are durable, so anything still in flight
//! at shutdown is picked up by the reconciler after a restart.

use super::{EngineError, OrderEngine};
use orders_payment::PaymentService;
use orders_production::ProductionService;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

/// Handles to the running background workers.
pub struct WorkerHandles {
	shutdown_tx: watch::Sender<bool>,
	payment_listener: JoinHandle<()>,
	production_listener: JoinHandle<()>,
	reconciler: JoinHandle<()>,
	handler_permits: Arc<Semaphore>,
	permit_count: u32,
	payment: Arc<PaymentService>,
	production: Arc<ProductionService>,
}

impl WorkerHandles {
	/// Stops all workers and waits for in-flight handlers to finish.
	pub async fn shutdown(self) -> Result<(), EngineError> {
		tracing::info!("Shutting down order workers");

		self.shutdown_tx.send(true).ok();
		let payment_stopped = self.payment.stop_listening().await;
		let production_stopped = self.production.stop_listening().await;

		for (name, handle) in [
			("payment listener", self.payment_listener),
			("production listener", self.production_listener),
			("reconciler", self.reconciler),
		] {
			if let Err(e) = handle.await {
				tracing::error!(worker = name, error = %e, "Worker ended abnormally");
			}
		}

		// Every spawned handler holds a permit until it finishes.
		if let Err(e) = self.handler_permits.acquire_many(self.permit_count).await {
			tracing::warn!(error = %e, "Could not wait for in-flight handlers");
		}

		payment_stopped.map_err(|e| EngineError::Service(e.to_string()))?;
		production_stopped.map_err(|e| EngineError::Service(e.to_string()))?;

		tracing::info!("Order workers stopped");
		Ok(())
	}
}

impl OrderEngine {
	/// Starts the listeners and the reconciler.
	pub async fn start(&self) -> Result<WorkerHandles, EngineError> {
		let (payment_tx, payment_rx) = mpsc::unbounded_channel();
		let (production_tx, production_rx) = mpsc::unbounded_channel();

		self.payment
			.start_listening(payment_tx)
			.await
			.map_err(|e| EngineError::Service(e.to_string()))?;
		if let Err(e) = self.production.start_listening(production_tx).await {
			self.payment.stop_listening().await.ok();
			return Err(EngineError::Service(e.to_string()));
		}

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let permit_count = self.config.max_concurrent_handlers.clamp(1, u32::MAX as usize) as u32;
		let handler_permits = Arc::new(Semaphore::new(permit_count as usize));

		let payment_listener = tokio::spawn(self.clone().run_listener(
			Topic::Payment,
			payment_rx,
			shutdown_rx.clone(),
			handler_permits.clone(),
		));
		let production_listener = tokio::spawn(self.clone().run_listener(
			Topic::Production,
			production_rx,
			shutdown_rx.clone(),
			handler_permits.clone(),
		));
		let reconciler = tokio::spawn(self.reconciler.clone().run(shutdown_rx));

		tracing::info!("Order workers started");

		Ok(WorkerHandles {
			shutdown_tx,
			payment_listener,
			production_listener,
			reconciler,
			handler_permits,
			permit_count,
			payment: self.payment.clone(),
			production: self.production.clone(),
		})
	}

	/// Runs the workers until Ctrl+C, then shuts them down.
	pub async fn run(&self) -> Result<(), EngineError> {
		let workers = self.start().await?;

		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "Failed to listen for shutdown signal");
		}

		workers.shutdown().await
	}

	async fn run_listener(
		self,
		topic: Topic,
		mut messages: mpsc::UnboundedReceiver<String>,
		mut shutdown: watch::Receiver<bool>,
		semaphore: Arc<Semaphore>,
	) {
		tracing::info!(topic = topic.name(), "Listener started");
		let stopping = shutdown.clone();

		loop {
			tokio::select! {
				payload = messages.recv() => {
					let Some(payload) = payload else {
						if !*stopping.borrow() {
							tracing::error!(topic = topic.name(), "Event channel closed unexpectedly");
						}
						break;
					};
					match topic {
						Topic::Payment => {
							self.spawn_handler(&semaphore, move |engine| async move {
								engine.payment_handler.handle_message(&payload).await
							})
							.await;
						}
						// Kitchen updates for one order must apply in arrival order.
						Topic::Production => {
							if let Err(e) = self.production_handler.handle_message(&payload).await {
								tracing::warn!(error = %e, "Handler error");
							}
						}
					}
				}
				_ = shutdown.changed() => break,
			}
		}

		tracing::info!(topic = topic.name(), "Listener stopped");
	}
}

#[derive(Debug, Clone, Copy)]
enum Topic {
	Payment,
	Production,
}

impl Topic {
	fn name(&self) -> &'static str {
		match self {
			Topic::Payment => orders_types::PAYMENT_STATUS_TOPIC,
			Topic::Production => orders_types::PRODUCTION_STATUS_TOPIC,
		}
	}
}
