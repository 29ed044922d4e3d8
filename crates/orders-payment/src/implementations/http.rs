//! HTTP client for the payment-clearing service.
//!
//! Synchronous calls go to the clearing service's REST API:
//!
//! - `POST {base_url}/payments` with `{"order_id": "...", "amount": "42.00"}`
//!   answers `{"id": "..."}` (`payment_id` is accepted as well)
//! - `GET {base_url}/payments/{payment_id}` answers
//!   `{"id": "...", "order_id": "...", "status": "paid"}`
//!
//! Status-changed messages are pushed by the clearing service to a webhook
//! served by this process at `POST /topics/payment_status_changed`. The body
//! is forwarded verbatim to the orchestrator.

use crate::{PaymentError, PaymentFactory, PaymentInterface, PaymentRegistry};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Router};
use orders_types::{
	http_url, ConfigSchema, Field, FieldType, ImplementationRegistry, PaymentReceipt,
	PaymentStatus, Schema, ValidationError, PAYMENT_STATUS_TOPIC,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;

#[derive(Debug, Serialize)]
struct CreatePaymentRequest<'a> {
	order_id: &'a str,
	amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
	#[serde(alias = "payment_id", alias = "paymentID")]
	id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
	#[serde(alias = "payment_id", alias = "paymentID")]
	id: String,
	#[serde(alias = "orderID", alias = "orderId")]
	order_id: String,
	status: String,
}

/// Payment gateway talking to the clearing service over HTTP.
pub struct HttpPayment {
	client: reqwest::Client,
	base_url: String,
	listen_host: String,
	listen_port: u16,
	is_listening: Arc<AtomicBool>,
	shutdown_signal: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl HttpPayment {
	pub fn new(
		base_url: String,
		listen_host: String,
		listen_port: u16,
		timeout: Duration,
	) -> Result<Self, PaymentError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| PaymentError::Configuration(e.to_string()))?;

		Ok(Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
			listen_host,
			listen_port,
			is_listening: Arc::new(AtomicBool::new(false)),
			shutdown_signal: Arc::new(Mutex::new(None)),
		})
	}

	async fn bind_webhook(listen_host: &str, listen_port: u16) -> Result<TcpListener, String> {
		let addr = format!("{}:{}", listen_host, listen_port)
			.parse::<SocketAddr>()
			.map_err(|e| format!("Invalid address '{}:{}': {}", listen_host, listen_port, e))?;

		let listener = TcpListener::bind(addr)
			.await
			.map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;

		tracing::info!("Payment webhook listening on {}", addr);
		Ok(listener)
	}

	async fn serve_webhook(
		listener: TcpListener,
		sender: mpsc::UnboundedSender<String>,
		mut shutdown_rx: mpsc::Receiver<()>,
	) -> Result<(), String> {
		let app = Router::new()
			.route(
				&format!("/topics/{}", PAYMENT_STATUS_TOPIC),
				post(handle_status_changed),
			)
			.layer(CorsLayer::permissive())
			.with_state(sender);

		axum::serve(listener, app)
			.with_graceful_shutdown(async move {
				let _ = shutdown_rx.recv().await;
				tracing::info!("Shutting down payment webhook");
			})
			.await
			.map_err(|e| format!("Server error: {}", e))
	}
}

/// Forwards a payment-status-changed body to the orchestrator.
async fn handle_status_changed(
	State(sender): State<mpsc::UnboundedSender<String>>,
	body: String,
) -> StatusCode {
	match sender.send(body) {
		Ok(()) => StatusCode::ACCEPTED,
		Err(_) => StatusCode::SERVICE_UNAVAILABLE,
	}
}

fn transport(e: reqwest::Error) -> PaymentError {
	PaymentError::Transport(e.to_string())
}

#[async_trait]
impl PaymentInterface for HttpPayment {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpPaymentSchema)
	}

	async fn create_payment(&self, order_id: &str, price: Decimal) -> Result<String, PaymentError> {
		let response = self
			.client
			.post(format!("{}/payments", self.base_url))
			.json(&CreatePaymentRequest {
				order_id,
				amount: price,
			})
			.send()
			.await
			.map_err(transport)?
			.error_for_status()
			.map_err(transport)?;

		let created: CreatePaymentResponse = response
			.json()
			.await
			.map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;
		Ok(created.id)
	}

	async fn get_payment(&self, payment_id: &str) -> Result<PaymentReceipt, PaymentError> {
		let response = self
			.client
			.get(format!("{}/payments/{}", self.base_url, payment_id))
			.send()
			.await
			.map_err(transport)?;

		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(PaymentError::NotFound(payment_id.to_string()));
		}

		let payment: PaymentResponse = response
			.error_for_status()
			.map_err(transport)?
			.json()
			.await
			.map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

		let status = PaymentStatus::from_clearing(&payment.status)
			.map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

		Ok(PaymentReceipt {
			payment_id: payment.id,
			order_id: payment.order_id,
			status,
		})
	}

	async fn start_listening(
		&self,
		sender: mpsc::UnboundedSender<String>,
	) -> Result<(), PaymentError> {
		if self.is_listening.swap(true, Ordering::SeqCst) {
			return Err(PaymentError::AlreadyListening);
		}

		let listener = match Self::bind_webhook(&self.listen_host, self.listen_port).await {
			Ok(listener) => listener,
			Err(e) => {
				self.is_listening.store(false, Ordering::SeqCst);
				return Err(PaymentError::Listener(e));
			}
		};

		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		*self.shutdown_signal.lock().await = Some(shutdown_tx);

		let is_listening = self.is_listening.clone();

		tokio::spawn(async move {
			if let Err(e) = Self::serve_webhook(listener, sender, shutdown_rx).await {
				tracing::error!("Payment webhook error: {}", e);
			}
			is_listening.store(false, Ordering::SeqCst);
		});

		Ok(())
	}

	async fn stop_listening(&self) -> Result<(), PaymentError> {
		if let Some(shutdown_tx) = self.shutdown_signal.lock().await.take() {
			let _ = shutdown_tx.send(()).await;
		}
		Ok(())
	}
}

/// Configuration schema for HttpPayment.
pub struct HttpPaymentSchema;

impl ConfigSchema for HttpPaymentSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::String).with_validator(http_url)],
			vec![
				Field::new("listen_host", FieldType::String),
				Field::new(
					"listen_port",
					FieldType::Integer {
						min: Some(1),
						max: Some(65535),
					},
				),
				Field::new(
					"timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an HTTP payment gateway.
///
/// Configuration parameters:
/// - `base_url`: clearing service base URL (required)
/// - `listen_host`: webhook bind host (default: "0.0.0.0")
/// - `listen_port`: webhook bind port (default: 8090)
/// - `timeout_seconds`: per-request timeout (default: 10)
pub fn create_payment(config: &toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError> {
	HttpPaymentSchema
		.validate(config)
		.map_err(|e| PaymentError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| PaymentError::Configuration("base_url is required".to_string()))?
		.to_string();

	let listen_host = config
		.get("listen_host")
		.and_then(|v| v.as_str())
		.unwrap_or("0.0.0.0")
		.to_string();

	let listen_port = config
		.get("listen_port")
		.and_then(|v| v.as_integer())
		.unwrap_or(8090) as u16;

	let timeout = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.unwrap_or(10) as u64;

	let gateway = HttpPayment::new(
		base_url,
		listen_host,
		listen_port,
		Duration::from_secs(timeout),
	)?;
	Ok(Box::new(gateway))
}

/// Registry for the HTTP payment implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = PaymentFactory;

	fn factory() -> Self::Factory {
		create_payment
	}
}

impl PaymentRegistry for Registry {}
