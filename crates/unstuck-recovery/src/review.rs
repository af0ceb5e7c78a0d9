//! Human-review queue
//!
//! Escalated tasks are parked here with their full diagnostic trail. The
//! file-backed queue keeps one JSON report per task for tooling plus a
//! markdown rendering for people.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};
use unstuck_core::{EscalationReport, Result, UnstuckError};

#[async_trait]
pub trait ReviewQueue: Send + Sync {
    /// Park a report; a second report for the same task replaces the first
    async fn park(&self, report: EscalationReport) -> Result<()>;

    /// All parked reports, oldest escalation first
    async fn list(&self) -> Result<Vec<EscalationReport>>;

    async fn load(&self, task_id: &str) -> Result<EscalationReport>;
}

#[derive(Debug, Default)]
pub struct MemoryReviewQueue {
    reports: RwLock<Vec<EscalationReport>>,
}

impl MemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reports.read().await.is_empty()
    }
}

#[async_trait]
impl ReviewQueue for MemoryReviewQueue {
    async fn park(&self, report: EscalationReport) -> Result<()> {
        let mut reports = self.reports.write().await;
        reports.retain(|r| r.task.id != report.task.id);
        reports.push(report);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<EscalationReport>> {
        Ok(self.reports.read().await.clone())
    }

    async fn load(&self, task_id: &str) -> Result<EscalationReport> {
        self.reports
            .read()
            .await
            .iter()
            .find(|r| r.task.id == task_id)
            .cloned()
            .ok_or_else(|| UnstuckError::TaskNotFound(task_id.to_string()))
    }
}

/// Review queue stored as `<task_id>.json` + `<task_id>.md` under a directory
#[derive(Debug, Clone)]
pub struct FileReviewQueue {
    dir: PathBuf,
}

impl FileReviewQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn json_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(task_id)))
    }

    fn markdown_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", file_stem(task_id)))
    }
}

/// Task IDs are caller-chosen; keep them from escaping the review directory
fn file_stem(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

#[async_trait]
impl ReviewQueue for FileReviewQueue {
    async fn park(&self, report: EscalationReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(self.json_path(&report.task.id), json).await?;
        tokio::fs::write(self.markdown_path(&report.task.id), report.to_markdown()).await?;

        info!(
            task_id = %report.task.id,
            reason = %report.reason,
            dir = %self.dir.display(),
            "Task parked for review"
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<EscalationReport>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reports = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<EscalationReport>(&content) {
                Ok(report) => reports.push(report),
                Err(e) => debug!(path = %path.display(), "Skipping unreadable report: {}", e),
            }
        }

        reports.sort_by(|a, b| a.escalated_at.cmp(&b.escalated_at).then_with(|| a.task.id.cmp(&b.task.id)));
        Ok(reports)
    }

    async fn load(&self, task_id: &str) -> Result<EscalationReport> {
        let path = self.json_path(task_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UnstuckError::TaskNotFound(task_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}
