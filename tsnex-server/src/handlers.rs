use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tsnex_core::{
    DatasetLoader, EngineConfig, InteractionEvent, QualityReport, Session, SessionOptions,
    StatusPatch,
};

use crate::datasets::{DatasetRegistry, BLOBS};
use crate::error::{Result, ServiceError};

/// Handler context wrapping the session and its collaborators.
pub struct HandlerContext {
    session: Mutex<Session>,
    registry: DatasetRegistry,
    outbound: mpsc::UnboundedSender<String>,
    /// Status tunables from the command line, re-applied after every reset
    defaults: StatusPatch,
}

impl HandlerContext {
    pub(crate) fn new(
        registry: DatasetRegistry,
        outbound: mpsc::UnboundedSender<String>,
        defaults: StatusPatch,
    ) -> Result<Self> {
        let session = Session::new();
        session.status().merge(&defaults)?;
        Ok(Self {
            session: Mutex::new(session),
            registry,
            outbound,
            defaults,
        })
    }

    /// start: load a dataset and launch the optimizer and dispatcher.
    pub async fn handle_start(&self, body: Value) -> Result<Value> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct StartRequest {
            #[serde(default = "default_dataset")]
            dataset: String,
            #[serde(default)]
            config: EngineConfig,
            #[serde(default)]
            status: StatusPatch,
            #[serde(default)]
            embedding: Option<Vec<[f64; 2]>>,
        }

        fn default_dataset() -> String {
            BLOBS.to_string()
        }

        #[derive(Serialize)]
        struct StartResponse {
            dataset: String,
            points: usize,
            features: usize,
            labelled: bool,
        }

        let req: StartRequest = parse_body(body, "start")?;

        let mut session = self.session.lock().await;
        if session.is_running() {
            return Err(ServiceError::FailedPrecondition(
                "a session is already running; reset it first".into(),
            ));
        }

        let registry = self.registry.clone();
        let name = req.dataset.clone();
        let dataset = tokio::task::spawn_blocking(move || registry.load(&name))
            .await
            .map_err(|e| ServiceError::Internal(format!("dataset loader failed: {}", e)))??;

        let response = StartResponse {
            dataset: dataset.name().to_string(),
            points: dataset.len(),
            features: dataset.dims(),
            labelled: dataset.classes().is_some(),
        };

        let options = SessionOptions {
            config: req.config,
            status: req.status,
            embedding: req.embedding,
        };
        session.start(dataset, options, self.outbound.clone())?;

        json_response(&response)
    }

    /// interact: pin points (`ids` + `positions`) or replace the layout (`embedding`).
    pub async fn handle_interact(&self, body: Value) -> Result<Value> {
        let event: InteractionEvent = parse_body(body, "interact")?;
        let event = match event {
            InteractionEvent::Pin { ids, positions } => InteractionEvent::pin(ids, positions)?,
            InteractionEvent::Reseed { embedding } => InteractionEvent::reseed(embedding)?,
        };

        self.session.lock().await.interact(event)?;
        Ok(serde_json::json!({ "queued": true }))
    }

    /// ack: the client has rendered the frame at `client_iteration`.
    pub async fn handle_ack(&self, body: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct AckRequest {
            client_iteration: u64,
        }

        let req: AckRequest = parse_body(body, "ack")?;
        self.session.lock().await.acknowledge(req.client_iteration)?;
        Ok(serde_json::json!({ "client_iteration": req.client_iteration }))
    }

    /// status: merge `set` (if any), then read back `fields` or the full record.
    pub async fn handle_status(&self, body: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        #[serde(deny_unknown_fields)]
        struct StatusRequest {
            #[serde(default)]
            set: Option<Value>,
            #[serde(default)]
            fields: Option<Vec<String>>,
        }

        let req: StatusRequest = if body.is_null() {
            StatusRequest::default()
        } else {
            parse_body(body, "status")?
        };

        let status = self.session.lock().await.status().clone();
        if let Some(set) = req.set {
            status.merge_json(set)?;
        }

        match req.fields {
            Some(fields) => {
                let names: Vec<&str> = fields.iter().map(String::as_str).collect();
                Ok(Value::Object(status.read_fields(&names)?))
            }
            None => json_response(&status.read()),
        }
    }

    /// reset: stop the run and return the final layout and quality report.
    pub async fn handle_reset(&self) -> Result<Value> {
        #[derive(Serialize)]
        struct ResetResponse {
            iteration: Option<u64>,
            embedding: Option<Vec<[f64; 2]>>,
            report: Option<QualityReport>,
        }

        let mut session = self.session.lock().await;
        let report = session.reset().await?;
        session.status().merge(&self.defaults)?;

        let last = session.last_state();
        json_response(&ResetResponse {
            iteration: last.map(|s| s.iteration),
            embedding: last.map(|s| s.positions.clone()),
            report,
        })
    }

    /// health: liveness plus a summary of the current session.
    pub async fn handle_health(&self) -> Result<Value> {
        #[derive(Serialize)]
        struct HealthResponse {
            healthy: bool,
            version: &'static str,
            running: bool,
            dataset: Option<String>,
            iteration: u64,
            client_iteration: u64,
            datasets: Vec<String>,
        }

        let session = self.session.lock().await;
        let status = session.status().read();
        json_response(&HealthResponse {
            healthy: true,
            version: env!("CARGO_PKG_VERSION"),
            running: session.is_running(),
            dataset: session.dataset().map(|d| d.name().to_string()),
            iteration: status.iteration,
            client_iteration: status.client_iteration,
            datasets: self.registry.available(),
        })
    }

    /// Stop any running session before the process exits.
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if !session.is_running() {
            return;
        }
        match session.reset().await {
            Ok(_) => info!("Session stopped on shutdown"),
            Err(e) => warn!("Session did not stop cleanly: {}", e),
        }
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: Value, command: &str) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| ServiceError::InvalidArgument(format!("Invalid {} command: {}", command, e)))
}

fn json_response<T: Serialize>(data: &T) -> Result<Value> {
    serde_json::to_value(data)
        .map_err(|e| ServiceError::Internal(format!("Failed to serialize response: {}", e)))
}
