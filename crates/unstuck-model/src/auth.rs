//! API key resolution

use std::env;

use crate::ModelError;

/// Read the API key from the environment variable named in config
///
/// Empty values count as missing.
pub fn resolve_api_key(env_var: &str) -> Result<String, ModelError> {
    match env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_var);
            Ok(key)
        }
        _ => Err(ModelError::Auth(format!(
            "No API key found. Set {}=sk-ant-... or point models.api_key_env at another variable",
            env_var
        ))),
    }
}
