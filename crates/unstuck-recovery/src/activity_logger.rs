//! Activity Logger - Human-readable recovery log in `.unstuck/activity.md`
//!
//! Appends one markdown entry per signal, ambiguous detection and state
//! transition so a person can follow what recovery did to each task.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use unstuck_core::fail_open::fail_open;

use crate::events::{EventSink, RecoveryEvent};

/// Activity logger for recovery events
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Create a logger writing to `<state_dir>/activity.md`
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            output_path: state_dir.as_ref().join("activity.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Append a markdown entry for `event`
    ///
    /// This operation is fail-open - logging failures won't stop recovery
    pub async fn log(&self, event: &RecoveryEvent) {
        fail_open("activity_logger::log", || async {
            let content = render(event);
            self.append_internal(&content).await
        })
        .await;
    }

    /// Append content to the activity log (internal, returns Result for fail_open)
    async fn append_internal(&self, content: &str) -> unstuck_core::Result<()> {
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl EventSink for ActivityLogger {
    async fn emit(&self, event: RecoveryEvent) {
        self.log(&event).await;
    }
}

fn render(event: &RecoveryEvent) -> String {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

    match event {
        RecoveryEvent::SignalRaised { task_id, signal } => format!(
            "### {} signal: {}\n**Time**: {}\n**Confidence**: {}\n**Recommended**: {}\n\n> {}\n\n",
            task_id,
            signal.pattern,
            timestamp,
            signal.confidence,
            signal.recommended_action,
            signal.diagnosis.replace('\n', "\n> ")
        ),
        RecoveryEvent::DetectionAmbiguous { task_id, near_misses } => {
            let mut content = format!(
                "### {} ambiguous detection\n**Time**: {}\n\n",
                task_id, timestamp
            );
            for near_miss in near_misses {
                content.push_str(&format!("- {}: {}\n", near_miss.pattern, near_miss.detail));
            }
            content.push('\n');
            content
        }
        RecoveryEvent::Transition {
            task_id,
            from,
            to,
            action,
            outcome,
        } => {
            let mut content = format!("**{}**: {} -> {} ({})", task_id, from, to, timestamp);
            if let Some(action) = action {
                content.push_str(&format!("\n- Action: {}", action));
            }
            if let Some(outcome) = outcome {
                content.push_str(&format!("\n- Outcome: {}", outcome));
            }
            content.push_str("\n\n");
            content
        }
    }
}
