//! Configuration management for Unstuck
//!
//! Thresholds, budgets and model selection for stuck recovery. Loaded from
//! `.unstuck/config.toml` in the project root; every field has a default so
//! partial files are fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, UnstuckError};

/// Directory holding Unstuck state inside a project
pub const STATE_DIR: &str = ".unstuck";

/// Recovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Number of recent iteration records the detector keeps per task
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Pairwise output similarity above which outputs count as repeats
    #[serde(default = "default_repetitive_similarity_threshold")]
    pub repetitive_similarity_threshold: f64,

    /// How many trailing outputs must all repeat each other
    #[serde(default = "default_repetitive_output_count")]
    pub repetitive_output_count: usize,

    /// Consecutive iterations with no file changes before NO_PROGRESS
    #[serde(default = "default_no_progress_iterations")]
    pub no_progress_iterations: usize,

    /// Repetitions of an identical tool call before CIRCULAR_TOOLS
    #[serde(default = "default_circular_tool_repeat_count")]
    pub circular_tool_repeat_count: usize,

    /// Token budget for pruned context
    #[serde(default = "default_max_pruned_tokens")]
    pub max_pruned_tokens: usize,

    /// Maximum subtasks a decomposition may produce
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,

    /// Maximum decomposition depth from a root task
    #[serde(default = "default_max_decomposition_depth")]
    pub max_decomposition_depth: u32,

    /// Consecutive prunes allowed before escalating
    #[serde(default = "default_max_prune_retries")]
    pub max_prune_retries: u32,

    /// Token budget for memory summaries
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: usize,

    /// Iterations a single task may consume before escalating
    #[serde(default = "default_max_task_iterations")]
    pub max_task_iterations: u32,

    /// Wall-clock budget per task in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Directory (relative to the project root) for parked review items
    #[serde(default = "default_review_dir")]
    pub review_dir: PathBuf,

    /// Model selection
    #[serde(default)]
    pub models: ModelConfig,
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Cheaper model used for pruning and summarization
    #[serde(default = "default_compression_model")]
    pub compression: String,

    /// Stronger model used for decomposition
    #[serde(default = "default_planning_model")]
    pub planning: String,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value providers
fn default_history_window() -> usize {
    5
}

fn default_repetitive_similarity_threshold() -> f64 {
    0.9
}

fn default_repetitive_output_count() -> usize {
    3
}

fn default_no_progress_iterations() -> usize {
    3
}

fn default_circular_tool_repeat_count() -> usize {
    3
}

fn default_max_pruned_tokens() -> usize {
    4000
}

fn default_max_subtasks() -> usize {
    4
}

fn default_max_decomposition_depth() -> u32 {
    2
}

fn default_max_prune_retries() -> u32 {
    2
}

fn default_max_summary_tokens() -> usize {
    1000
}

fn default_max_task_iterations() -> u32 {
    20
}

fn default_task_timeout_secs() -> u64 {
    1800
}

fn default_review_dir() -> PathBuf {
    PathBuf::from(STATE_DIR).join("review")
}

fn default_compression_model() -> String {
    "claude-haiku-4-5".to_string()
}

fn default_planning_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl RecoveryConfig {
    /// Load configuration from `.unstuck/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(STATE_DIR).join("config.toml");

        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| UnstuckError::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.unstuck/config.toml`
    ///
    /// Returns the path written.
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(STATE_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| UnstuckError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject values the detector or orchestrator cannot work with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.repetitive_similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(UnstuckError::Config(format!(
                "repetitive_similarity_threshold must be within (0, 1], got {}",
                self.repetitive_similarity_threshold
            )));
        }
        if self.repetitive_output_count < 2 {
            return Err(UnstuckError::Config(
                "repetitive_output_count must be at least 2".to_string(),
            ));
        }
        if self.circular_tool_repeat_count < 2 {
            return Err(UnstuckError::Config(
                "circular_tool_repeat_count must be at least 2".to_string(),
            ));
        }
        if self.no_progress_iterations == 0 {
            return Err(UnstuckError::Config(
                "no_progress_iterations must be at least 1".to_string(),
            ));
        }

        let widest_rule = self
            .repetitive_output_count
            .max(self.no_progress_iterations);
        if self.history_window < widest_rule {
            return Err(UnstuckError::Config(format!(
                "history_window ({}) must hold at least {} records",
                self.history_window, widest_rule
            )));
        }
        if !(2..=4).contains(&self.max_subtasks) {
            return Err(UnstuckError::Config(format!(
                "max_subtasks must be between 2 and 4, got {}",
                self.max_subtasks
            )));
        }
        if self.max_pruned_tokens == 0 || self.max_summary_tokens == 0 {
            return Err(UnstuckError::Config(
                "token budgets must be greater than zero".to_string(),
            ));
        }
        if self.max_task_iterations == 0 {
            return Err(UnstuckError::Config(
                "max_task_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-task wall-clock budget
    pub fn task_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.task_timeout_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            repetitive_similarity_threshold: default_repetitive_similarity_threshold(),
            repetitive_output_count: default_repetitive_output_count(),
            no_progress_iterations: default_no_progress_iterations(),
            circular_tool_repeat_count: default_circular_tool_repeat_count(),
            max_pruned_tokens: default_max_pruned_tokens(),
            max_subtasks: default_max_subtasks(),
            max_decomposition_depth: default_max_decomposition_depth(),
            max_prune_retries: default_max_prune_retries(),
            max_summary_tokens: default_max_summary_tokens(),
            max_task_iterations: default_max_task_iterations(),
            task_timeout_secs: default_task_timeout_secs(),
            review_dir: default_review_dir(),
            models: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            compression: default_compression_model(),
            planning: default_planning_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RecoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history_window, 5);
        assert_eq!(config.max_prune_retries, 2);
        assert_eq!(config.max_decomposition_depth, 2);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RecoveryConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, RecoveryConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            dir.path().join(STATE_DIR).join("config.toml"),
            "max_subtasks = 3\n\n[models]\nplanning = \"claude-opus-4\"\n",
        )
        .unwrap();

        let config = RecoveryConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.max_subtasks, 3);
        assert_eq!(config.models.planning, "claude-opus-4");
        assert_eq!(config.models.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.history_window, 5);
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = RecoveryConfig::write_default(dir.path()).unwrap();
        assert!(path.ends_with("config.toml"));

        let config = RecoveryConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, RecoveryConfig::default());
    }

    #[test]
    fn test_window_smaller_than_rule_rejected() {
        let config = RecoveryConfig {
            history_window: 2,
            ..RecoveryConfig::default()
        };
        assert!(matches!(config.validate(), Err(UnstuckError::Config(_))));
    }

    #[test]
    fn test_subtask_range_enforced() {
        for max_subtasks in [1, 5] {
            let config = RecoveryConfig {
                max_subtasks,
                ..RecoveryConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(dir.path().join(STATE_DIR).join("config.toml"), "max_subtasks = [").unwrap();

        let err = RecoveryConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, UnstuckError::Config(_)));
    }
}
