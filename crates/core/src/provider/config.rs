//! HTTP provider configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`super::HttpProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// URL the generation request is POSTed to.
    pub endpoint: String,

    /// Bearer token sent in the `Authorization` header.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Model used when a job does not name one.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Request timeout in seconds, covering the generation call and the
    /// output download.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            endpoint = "http://localhost:9000/generate"
        "#;
        let config: ProviderConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.endpoint, "http://localhost:9000/generate");
        assert!(config.api_token.is_none());
        assert!(config.default_model.is_none());
        assert_eq!(config.timeout_secs, 120);
    }
}
