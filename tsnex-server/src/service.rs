use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tsnex_core::StatusPatch;

use crate::datasets::DatasetRegistry;
use crate::error::{Result, ServiceError};
use crate::handlers::HandlerContext;

/// Line-protocol command service.
///
/// Each input line is one JSON object with a `type` field naming the command.
/// The reply is one JSON frame: `{"kind":"response","type":..,"status":200,"body":..}`
/// on success, `{"kind":"error","type":..,"status":code,"error":msg}` otherwise.
/// Snapshot frames from the dispatcher go straight to the outbound sender.
pub struct TsnexService {
    handlers: HandlerContext,
}

impl TsnexService {
    pub fn new(
        registry: DatasetRegistry,
        outbound: mpsc::UnboundedSender<String>,
        defaults: StatusPatch,
    ) -> Result<Self> {
        Ok(Self {
            handlers: HandlerContext::new(registry, outbound, defaults)?,
        })
    }

    /// Handle one command line. Blank lines produce no reply.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (command, result) = match parse_command(line) {
            Ok((command, body)) => {
                debug!("Command: {}", command);
                let result = self.dispatch(&command, body).await;
                (Some(command), result)
            }
            Err(e) => (None, Err(e)),
        };

        let frame = match result {
            Ok(body) => json!({
                "kind": "response",
                "type": command,
                "status": 200,
                "body": body,
            }),
            Err(err) => {
                warn!("Command {} failed: {}", command.as_deref().unwrap_or("?"), err);
                json!({
                    "kind": "error",
                    "type": command,
                    "status": err.status_code(),
                    "error": err.to_string(),
                })
            }
        };
        Some(serde_json::to_string(&frame).unwrap_or_default())
    }

    /// Stop the running session, if any.
    pub async fn shutdown(&self) {
        info!("Shutting down command service");
        self.handlers.shutdown().await;
    }

    async fn dispatch(&self, command: &str, body: Value) -> Result<Value> {
        match command {
            "start" => self.handlers.handle_start(body).await,
            "interact" => self.handlers.handle_interact(body).await,
            "ack" => self.handlers.handle_ack(body).await,
            "status" => self.handlers.handle_status(body).await,
            "reset" => self.handlers.handle_reset().await,
            "health" => self.handlers.handle_health().await,
            _ => Err(ServiceError::NotFound(format!(
                "Unknown command: {}",
                command
            ))),
        }
    }
}

/// Split a command line into its `type` and the remaining fields.
fn parse_command(line: &str) -> Result<(String, Value)> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ServiceError::InvalidArgument(format!("Invalid JSON command: {}", e)))?;
    let Value::Object(mut fields) = value else {
        return Err(ServiceError::InvalidArgument(
            "command must be a JSON object".into(),
        ));
    };
    let command = match fields.remove("type") {
        Some(Value::String(command)) => command,
        _ => {
            return Err(ServiceError::InvalidArgument(
                "command needs a string \"type\" field".into(),
            ))
        }
    };
    Ok((command, Value::Object(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const DEADLINE: Duration = Duration::from_secs(30);

    fn service() -> (TsnexService, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let defaults = StatusPatch {
            tick_frequency_ms: Some(1),
            n_jump: Some(7),
            ..Default::default()
        };
        let registry = DatasetRegistry::new(std::env::temp_dir().join("tsnex-no-such-dir"));
        (TsnexService::new(registry, tx, defaults).unwrap(), rx)
    }

    async fn call(service: &TsnexService, line: &str) -> Value {
        let reply = service.handle_line(line).await.unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let (service, _rx) = service();
        assert!(service.handle_line("   ").await.is_none());
    }

    #[tokio::test]
    async fn malformed_commands_get_error_frames() {
        let (service, _rx) = service();

        let reply = call(&service, "{not json").await;
        assert_eq!(reply["kind"], "error");
        assert_eq!(reply["status"], 400);

        let reply = call(&service, r#"{"kind":"start"}"#).await;
        assert_eq!(reply["status"], 400);

        let reply = call(&service, r#"{"type":"launch"}"#).await;
        assert_eq!(reply["status"], 404);
        assert_eq!(reply["type"], "launch");
    }

    #[tokio::test]
    async fn session_commands_need_a_session() {
        let (service, _rx) = service();
        let reply = call(&service, r#"{"type":"ack","client_iteration":3}"#).await;
        assert_eq!(reply["status"], 412);

        let reply = call(&service, r#"{"type":"interact","ids":[0],"positions":[[0,0]]}"#).await;
        assert_eq!(reply["status"], 412);
    }

    #[tokio::test]
    async fn status_sets_then_reads_fields() {
        let (service, _rx) = service();
        let reply = call(
            &service,
            r#"{"type":"status","set":{"measure":true},"fields":["measure","n_jump"]}"#,
        )
        .await;
        assert_eq!(reply["status"], 200);
        assert_eq!(reply["body"], json!({"measure": true, "n_jump": 7}));

        let reply = call(&service, r#"{"type":"status","set":{"n_jump":0}}"#).await;
        assert_eq!(reply["status"], 400);
    }

    #[tokio::test]
    async fn missing_dataset_is_not_found() {
        let (service, _rx) = service();
        let reply = call(&service, r#"{"type":"start","dataset":"absent"}"#).await;
        assert_eq!(reply["status"], 404);
    }

    #[tokio::test]
    async fn full_session_over_the_line_protocol() {
        let (service, mut rx) = service();

        let reply = call(
            &service,
            r#"{"type":"start","dataset":"blobs:20","config":{"perplexity":5.0},"status":{"n_jump":5}}"#,
        )
        .await;
        assert_eq!(reply["status"], 200, "{}", reply);
        assert_eq!(reply["body"]["points"], 20);
        assert_eq!(reply["body"]["labelled"], true);

        let reply = call(&service, r#"{"type":"start","dataset":"blobs:20"}"#).await;
        assert_eq!(reply["status"], 412);

        let frame = timeout(DEADLINE, rx.recv()).await.unwrap().unwrap();
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["kind"], "snapshot");
        let iteration = frame["iteration"].as_u64().unwrap();
        assert_eq!(iteration % 5, 0);

        let reply = call(
            &service,
            r#"{"type":"interact","ids":[1],"positions":[[2.0,2.0]]}"#,
        )
        .await;
        assert_eq!(reply["body"]["queued"], true);

        let ack = json!({"type": "ack", "client_iteration": iteration}).to_string();
        let reply = call(&service, &ack).await;
        assert_eq!(reply["status"], 200);

        let health = call(&service, r#"{"type":"health"}"#).await;
        assert_eq!(health["body"]["running"], true);
        assert_eq!(health["body"]["dataset"], "blobs:20");

        let reply = call(&service, r#"{"type":"reset"}"#).await;
        assert_eq!(reply["status"], 200);
        assert_eq!(reply["body"]["embedding"].as_array().unwrap().len(), 20);
        assert!(reply["body"]["report"].is_null());

        let fields = call(&service, r#"{"type":"status","fields":["n_jump","stop"]}"#).await;
        assert_eq!(fields["body"], json!({"n_jump": 7, "stop": false}));
    }
}
