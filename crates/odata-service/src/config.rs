use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_SERVICE_ROOT: &str = "http://localhost:8080/odata.svc";

/// Settings that shape URLs and limits but are not part of the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Absolute URL of the service root. Used for context URLs and Atom ids.
    pub service_root: String,
    /// Upper bound on `$top`; larger values are rejected as client errors.
    pub max_top: Option<u64>,
    /// Render finite collections through the chunked streamer as well.
    pub stream_collections: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_root: DEFAULT_SERVICE_ROOT.to_string(),
            max_top: None,
            stream_collections: false,
        }
    }
}

impl ServiceConfig {
    /// The service root without a trailing slash.
    pub fn root(&self) -> &str {
        self.service_root.trim_end_matches('/')
    }

    /// Path component of the service root, e.g. `/odata.svc`.
    pub fn root_path(&self) -> String {
        match Url::parse(self.root()) {
            Ok(url) => url.path().trim_end_matches('/').to_string(),
            // A bare path such as `/api/odata` is accepted as well.
            Err(_) => self.root().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_comes_from_the_url() {
        let config = ServiceConfig::default();
        assert_eq!(config.root_path(), "/odata.svc");

        let config = ServiceConfig {
            service_root: "https://example.org/api/v2/".to_string(),
            ..ServiceConfig::default()
        };
        assert_eq!(config.root(), "https://example.org/api/v2");
        assert_eq!(config.root_path(), "/api/v2");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ServiceConfig = serde_json::from_str(r#"{"max_top": 100}"#).expect("json");
        assert_eq!(config.max_top, Some(100));
        assert_eq!(config.service_root, DEFAULT_SERVICE_ROOT);
        assert!(!config.stream_collections);
    }
}
