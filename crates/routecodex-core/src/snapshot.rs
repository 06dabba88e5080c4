//! Best-effort request/response snapshots under
//! `~/.routecodex/codex-samples`. Writes go through a bounded queue and
//! a single worker; a full queue drops the snapshot and a failed write
//! is swallowed. Nothing here can fail a request.

use std::path::PathBuf;
use std::sync::OnceLock;

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;

use routecodex_common::home;

const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy)]
pub enum SnapshotDialect {
    OpenAIChat,
    OpenAIResponses,
    AnthropicMessages,
}

impl SnapshotDialect {
    fn dir(&self) -> &'static str {
        match self {
            SnapshotDialect::OpenAIChat => "openai-chat",
            SnapshotDialect::OpenAIResponses => "openai-responses",
            SnapshotDialect::AnthropicMessages => "anthropic-messages",
        }
    }
}

struct Job {
    path: PathBuf,
    payload: Value,
}

#[derive(Clone)]
pub struct SnapshotWriter {
    tx: Option<mpsc::Sender<Job>>,
    root: PathBuf,
}

fn build_time() -> &'static str {
    static BUILD_TIME: OnceLock<String> = OnceLock::new();
    BUILD_TIME.get_or_init(|| {
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default()
    })
}

fn envelope(stage: &str, data: &Value) -> Value {
    serde_json::json!({
        "meta": {
            "stage": stage,
            "version": env!("CARGO_PKG_VERSION"),
            "buildTime": build_time(),
        },
        "data": data,
    })
}

impl SnapshotWriter {
    /// Spawns the writer task. With `enabled == false` every write is a
    /// no-op but the paths still resolve (useful in tests).
    pub fn new(home_dir: &str, enabled: bool) -> Self {
        let root = home::samples_dir(home_dir);
        if !enabled {
            return Self { tx: None, root };
        }
        let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Some(parent) = job.path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Ok(bytes) = serde_json::to_vec_pretty(&job.payload) {
                    let _ = tokio::fs::write(&job.path, bytes).await;
                }
            }
        });
        Self { tx: Some(tx), root }
    }

    pub fn disabled(home_dir: &str) -> Self {
        Self::new(home_dir, false)
    }

    fn enqueue(&self, path: PathBuf, payload: Value) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(Job { path, payload });
        }
    }

    /// `<dialect>/${requestId}_${phase}.json`; rewriting the same pair
    /// overwrites idempotently.
    pub fn write_entry(
        &self,
        dialect: SnapshotDialect,
        request_id: &str,
        phase: &str,
        data: &Value,
    ) {
        let path = self
            .root
            .join(dialect.dir())
            .join(format!("{request_id}_{phase}.json"));
        self.enqueue(path, envelope(phase, data));
    }

    /// `pipeline/${requestId}_${stage}.json`.
    pub fn write_stage(&self, request_id: &str, stage: &str, data: &Value) {
        let file_stage = stage.replace([':', '/'], "-");
        let path = self
            .root
            .join("pipeline")
            .join(format!("{request_id}_{file_stage}.json"));
        self.enqueue(path, envelope(stage, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn writes_envelope_and_overwrites_idempotently() {
        let root = std::env::temp_dir().join(format!("rcx-snap-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let writer = SnapshotWriter::new(root.to_str().unwrap(), true);

        let data = serde_json::json!({"model": "m"});
        writer.write_entry(SnapshotDialect::OpenAIChat, "req_1", "request", &data);
        writer.write_entry(SnapshotDialect::OpenAIChat, "req_1", "request", &data);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let path = root
            .join(".routecodex/codex-samples/openai-chat")
            .join("req_1_request.json");
        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["meta"]["stage"], "request");
        assert_eq!(written["data"]["model"], "m");
        assert!(written["meta"]["version"].is_string());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn disabled_writer_writes_nothing() {
        let root = std::env::temp_dir().join(format!("rcx-snap-off-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let writer = SnapshotWriter::disabled(root.to_str().unwrap());
        writer.write_stage("req_1", "provider:upstream", &serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!root.join(".routecodex").exists());
    }
}
