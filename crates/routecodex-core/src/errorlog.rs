//! JSONL error logs: terminal request failures go to
//! `~/.routecodex/stats/error.log`, swallowed best-effort failures to
//! `~/.routecodex/logs/non-blocking-errors.log`. Both sinks sit behind a
//! bounded queue so emission never blocks a request.

use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use routecodex_common::home;

use crate::error::GatewayError;

const QUEUE_DEPTH: usize = 512;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogEntry {
    pub ts: String,
    pub request_id: String,
    pub kind: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

fn now_ts() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

impl ErrorLogEntry {
    /// Entry for a node failure reported through the pipeline's error
    /// callback (best-effort channel, not the terminal request error).
    pub fn pipeline(request_id: &str, message: String, stage: &str) -> Self {
        Self {
            ts: now_ts(),
            request_id: request_id.to_string(),
            kind: "pipeline".to_string(),
            code: "PIPELINE_NODE_ERROR".to_string(),
            message,
            provider_key: None,
            provider_type: None,
            route_name: None,
            upstream_status: None,
            stage: Some(stage.to_string()),
        }
    }

    pub fn from_gateway(error: &GatewayError) -> Self {
        Self {
            ts: now_ts(),
            request_id: error.request_id.clone(),
            kind: serde_json::to_value(error.kind)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default(),
            code: error.code.clone(),
            message: error.message.clone(),
            provider_key: error.provider_key.clone(),
            provider_type: error.provider_type.clone(),
            route_name: error.route_name.clone(),
            upstream_status: error.upstream_status,
            stage: error
                .details
                .get("stage")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        }
    }
}

fn spawn_appender(path: PathBuf) -> mpsc::Sender<ErrorLogEntry> {
    let (tx, mut rx) = mpsc::channel::<ErrorLogEntry>(QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            let Ok(mut line) = serde_json::to_vec(&entry) else {
                continue;
            };
            line.push(b'\n');
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;
            if let Ok(mut file) = file {
                let _ = file.write_all(&line).await;
            }
        }
    });
    tx
}

#[derive(Clone)]
pub struct ErrorLog {
    terminal: mpsc::Sender<ErrorLogEntry>,
    non_blocking: mpsc::Sender<ErrorLogEntry>,
}

impl ErrorLog {
    pub fn new(home_dir: &str) -> Self {
        Self {
            terminal: spawn_appender(home::stats_dir(home_dir).join("error.log")),
            non_blocking: spawn_appender(
                home::logs_dir(home_dir).join("non-blocking-errors.log"),
            ),
        }
    }

    /// Record a terminal request failure.
    pub fn record(&self, entry: ErrorLogEntry) {
        let _ = self.terminal.try_send(entry);
    }

    /// Record a swallowed failure (snapshots, log IO, hooks).
    pub fn record_non_blocking(&self, entry: ErrorLogEntry) {
        let _ = self.non_blocking.try_send(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[tokio::test]
    async fn entries_append_as_jsonl() {
        let root = std::env::temp_dir().join(format!("rcx-errlog-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let log = ErrorLog::new(root.to_str().unwrap());

        let error = GatewayError::new(ErrorKind::Router, "PROVIDER_NOT_AVAILABLE", "nope")
            .with_request_id("req_1")
            .with_route("default");
        log.record(ErrorLogEntry::from_gateway(&error));
        log.record(ErrorLogEntry::from_gateway(&error));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let content =
            std::fs::read_to_string(root.join(".routecodex/stats/error.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["code"], "PROVIDER_NOT_AVAILABLE");
        assert_eq!(parsed["kind"], "router");
        assert_eq!(parsed["route_name"], "default");

        let _ = std::fs::remove_dir_all(&root);
    }
}
