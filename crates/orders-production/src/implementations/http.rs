//! HTTP client for the kitchen service.
//!
//! Preparation requests are sent as `POST {base_url}/orders` with
//! `{"order_id": "...", "status": "RECEIVED"}`. The kitchen pushes status
//! changes to a webhook served at `POST /topics/production_status_changed`;
//! bodies are forwarded verbatim.

use crate::{ProductionError, ProductionFactory, ProductionInterface, ProductionRegistry};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Router};
use orders_types::{
	http_url, ConfigSchema, Field, FieldType, ImplementationRegistry, OrderStatus,
	PreparationRequest, Schema, ValidationError, PRODUCTION_STATUS_TOPIC,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;

/// Production gateway talking to the kitchen service over HTTP.
pub struct HttpProduction {
	client: reqwest::Client,
	base_url: String,
	listen_host: String,
	listen_port: u16,
	is_listening: Arc<AtomicBool>,
	shutdown_signal: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl HttpProduction {
	pub fn new(
		base_url: String,
		listen_host: String,
		listen_port: u16,
		timeout: Duration,
	) -> Result<Self, ProductionError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ProductionError::Configuration(e.to_string()))?;

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

		tracing::info!("Production webhook listening on {}", addr);
		Ok(listener)
	}

	async fn serve_webhook(
		listener: TcpListener,
		sender: mpsc::UnboundedSender<String>,
		mut shutdown_rx: mpsc::Receiver<()>,
	) -> Result<(), String> {
		let app = Router::new()
			.route(
				&format!("/topics/{}", PRODUCTION_STATUS_TOPIC),
				post(handle_status_changed),
			)
			.layer(CorsLayer::permissive())
			.with_state(sender);

		axum::serve(listener, app)
			.with_graceful_shutdown(async move {
				let _ = shutdown_rx.recv().await;
				tracing::info!("Shutting down production webhook");
			})
			.await
			.map_err(|e| format!("Server error: {}", e))
	}
}

async fn handle_status_changed(
	State(sender): State<mpsc::UnboundedSender<String>>,
	body: String,
) -> StatusCode {
	match sender.send(body) {
		Ok(()) => StatusCode::ACCEPTED,
		Err(_) => StatusCode::SERVICE_UNAVAILABLE,
	}
}

#[async_trait]
impl ProductionInterface for HttpProduction {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpProductionSchema)
	}

	async fn request_preparation(&self, order_id: &str) -> Result<(), ProductionError> {
		let request = PreparationRequest {
			order_id: order_id.to_string(),
			status: OrderStatus::Received,
		};

		self.client
			.post(format!("{}/orders", self.base_url))
			.json(&request)
			.send()
			.await
			.and_then(|response| response.error_for_status())
			.map_err(|e| ProductionError::Transport(e.to_string()))?;

		Ok(())
	}

	async fn start_listening(
		&self,
		sender: mpsc::UnboundedSender<String>,
	) -> Result<(), ProductionError> {
		if self.is_listening.swap(true, Ordering::SeqCst) {
			return Err(ProductionError::AlreadyListening);
		}

		let listener = match Self::bind_webhook(&self.listen_host, self.listen_port).await {
			Ok(listener) => listener,
			Err(e) => {
				self.is_listening.store(false, Ordering::SeqCst);
				return Err(ProductionError::Listener(e));
			}
		};

		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		*self.shutdown_signal.lock().await = Some(shutdown_tx);

		let is_listening = self.is_listening.clone();

		tokio::spawn(async move {
			if let Err(e) = Self::serve_webhook(listener, sender, shutdown_rx).await {
				tracing::error!("Production webhook error: {}", e);
			}
			is_listening.store(false, Ordering::SeqCst);
		});

		Ok(())
	}

	async fn stop_listening(&self) -> Result<(), ProductionError> {
		if let Some(shutdown_tx) = self.shutdown_signal.lock().await.take() {
			let _ = shutdown_tx.send(()).await;
		}
		Ok(())
	}
}

/// Configuration schema for HttpProduction.
pub struct HttpProductionSchema;

impl ConfigSchema for HttpProductionSchema {
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

/// Factory function to create an HTTP production gateway.
///
/// Configuration parameters:
/// - `base_url`: kitchen service base URL (required)
/// - `listen_host`: webhook bind host (default: "0.0.0.0")
/// - `listen_port`: webhook bind port (default: 8091)
/// - `timeout_seconds`: per-request timeout (default: 10)
pub fn create_production(
	config: &toml::Value,
) -> Result<Box<dyn ProductionInterface>, ProductionError> {
	HttpProductionSchema
		.validate(config)
		.map_err(|e| ProductionError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ProductionError::Configuration("base_url is required".to_string()))?
		.to_string();

	let listen_host = config
		.get("listen_host")
		.and_then(|v| v.as_str())
		.unwrap_or("0.0.0.0")
		.to_string();

	let listen_port = config
		.get("listen_port")
		.and_then(|v| v.as_integer())
		.unwrap_or(8091) as u16;

	let timeout = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.unwrap_or(10) as u64;

	let gateway = HttpProduction::new(
		base_url,
		listen_host,
		listen_port,
		Duration::from_secs(timeout),
	)?;
	Ok(Box::new(gateway))
}

/// Registry for the HTTP production implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = ProductionFactory;

	fn factory() -> Self::Factory {
		create_production
	}
}

impl ProductionRegistry for Registry {}
