use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::AppError;

const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const DEFAULT_MODEL_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL_NAME: &str = "gemini-2.0-flash";

/// Resolved service configuration. Built once at startup from process env
/// and `.env` files; API base URLs are overridable so tests can point the
/// clients at local fixtures.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub gmail_api_base: String,
    pub model_api_base: String,
    pub model_name: String,
    /// Gmail access token used when the sync request carries no bearer token.
    pub gmail_access_token: Option<String>,
    pub model_api_key: String,
}

/// Return the first non-empty value from the given environment variable keys.
pub fn env_var_first_nonempty(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Return the first non-empty value from the given keys found in `.env` files.
///
/// Searches `.env` and `../.env` relative to the working directory.
pub fn dotenv_var_first_nonempty(keys: &[&str]) -> Option<String> {
    let candidates = [PathBuf::from(".env"), PathBuf::from("../.env")];

    for path in candidates {
        if let Ok(content) = std::fs::read_to_string(&path) {
            let mut map = HashMap::<String, String>::new();
            for line in content.lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                if let Some((k, v)) = trimmed.split_once('=') {
                    map.insert(
                        k.trim().to_string(),
                        v.trim().trim_matches('"').trim_matches('\'').to_string(),
                    );
                }
            }

            for key in keys {
                if let Some(value) = map.get(*key) {
                    if !value.trim().is_empty() {
                        return Some(value.trim().to_string());
                    }
                }
            }
        }
    }

    None
}

fn resolve(keys: &[&str]) -> Option<String> {
    env_var_first_nonempty(keys).or_else(|| dotenv_var_first_nonempty(keys))
}

impl AppConfig {
    /// Resolve configuration from env / `.env`. Fails fast when the model
    /// API key is missing, since the pipeline cannot classify without it.
    pub fn from_env() -> Result<Self, AppError> {
        let bind_addr = resolve(&["MAILSPEND_BIND"])
            .unwrap_or_else(|| "127.0.0.1:9470".into())
            .parse()
            .map_err(|e| AppError::Validation(format!("MAILSPEND_BIND is not a socket address: {e}")))?;

        let data_dir = resolve(&["MAILSPEND_DATA_DIR"])
            .map(PathBuf::from)
            .or_else(|| dirs::data_dir().map(|d| d.join("mailspend")))
            .ok_or_else(|| {
                AppError::Validation(
                    "Cannot resolve a data directory. Set MAILSPEND_DATA_DIR.".into(),
                )
            })?;

        let model_api_key = resolve(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]).ok_or_else(|| {
            AppError::Validation(
                "Model API key is missing. Set GEMINI_API_KEY in app env/.env.".into(),
            )
        })?;

        Ok(Self {
            bind_addr,
            data_dir,
            gmail_api_base: resolve(&["GMAIL_API_BASE"])
                .unwrap_or_else(|| DEFAULT_GMAIL_API_BASE.into()),
            model_api_base: resolve(&["MODEL_API_BASE"])
                .unwrap_or_else(|| DEFAULT_MODEL_API_BASE.into()),
            model_name: resolve(&["MAILSPEND_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL_NAME.into()),
            gmail_access_token: resolve(&["GMAIL_ACCESS_TOKEN"]),
            model_api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_first_nonempty_skips_blank() {
        std::env::set_var("MAILSPEND_TEST_A", "   ");
        std::env::set_var("MAILSPEND_TEST_B", "value");
        assert_eq!(
            env_var_first_nonempty(&["MAILSPEND_TEST_A", "MAILSPEND_TEST_B"]),
            Some("value".into())
        );
        std::env::remove_var("MAILSPEND_TEST_A");
        std::env::remove_var("MAILSPEND_TEST_B");
    }

    #[test]
    fn test_env_var_first_nonempty_missing() {
        assert_eq!(env_var_first_nonempty(&["MAILSPEND_TEST_MISSING"]), None);
    }
}
