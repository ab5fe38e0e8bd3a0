use pl_types::{config_error, PlResult};
use reqwest::Url;

/// Environment variable holding the tracking server address.
pub const TRACKING_URI_VAR: &str = "MLFLOW_TRACKING_URI";

/// Validated tracking-service settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    pub tracking_uri: Url,
}

impl TrackingConfig {
    pub fn new(tracking_uri: &str) -> PlResult<Self> {
        let url = Url::parse(tracking_uri.trim())
            .map_err(|e| config_error!("{TRACKING_URI_VAR} '{tracking_uri}' is not a URL: {e}"))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(config_error!(
                    "{TRACKING_URI_VAR} must use http or https, got '{other}'"
                ))
            }
        }
        if url.host_str().is_none() {
            return Err(config_error!("{TRACKING_URI_VAR} '{tracking_uri}' has no host"));
        }
        Ok(Self { tracking_uri: url })
    }

    pub fn from_env() -> PlResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (environment, .env, tests)
    pub fn from_lookup<F>(lookup: F) -> PlResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(TRACKING_URI_VAR) {
            Some(value) if !value.trim().is_empty() => Self::new(&value),
            _ => Err(config_error!("{TRACKING_URI_VAR} is not set")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_uri() {
        let config = TrackingConfig::from_lookup(|_| Some("http://localhost:8080".into())).unwrap();
        assert_eq!(config.tracking_uri.port(), Some(8080));
    }

    #[test]
    fn missing_or_invalid_uri_is_a_config_error() {
        assert!(TrackingConfig::from_lookup(|_| None).unwrap_err().is_config());
        assert!(TrackingConfig::from_lookup(|_| Some("  ".into())).unwrap_err().is_config());
        assert!(TrackingConfig::new("not a url").unwrap_err().is_config());
        assert!(TrackingConfig::new("sqlite:///mlruns.db").unwrap_err().is_config());
    }
}
