//! Blob storage settings read from the environment.

use pl_types::{config_error, PlResult, StorageError};
use reqwest::Url;

/// Environment variable holding the storage connection string.
pub const STORAGE_CONNECTION_VAR: &str = "AzureWebJobsStorage";
/// Environment variable holding the destination container.
pub const CONTAINER_NAME_VAR: &str = "ContainerName";

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// The parts of an Azure Storage connection string the uploader needs.
///
/// Only shared access signature credentials are accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub blob_endpoint: Url,
    /// SAS query string without the leading `?`.
    pub sas_token: String,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("blob_endpoint", &self.blob_endpoint.as_str())
            .field("sas_token", &"<redacted>")
            .finish()
    }
}

fn invalid(message: impl Into<String>) -> StorageError {
    StorageError::InvalidConnectionString {
        message: message.into(),
    }
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let mut protocol = None;
        let mut account_name = None;
        let mut account_key = None;
        let mut endpoint_suffix = None;
        let mut blob_endpoint = None;
        let mut sas_token = None;
        let mut development = false;

        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("segment '{}' is not key=value", redact(pair))))?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = Some(value),
                "accountname" => account_name = Some(value),
                "accountkey" => account_key = Some(value),
                "endpointsuffix" => endpoint_suffix = Some(value),
                "blobendpoint" => blob_endpoint = Some(value),
                "sharedaccesssignature" => sas_token = Some(value),
                "usedevelopmentstorage" => development = value.eq_ignore_ascii_case("true"),
                // queue/table/file endpoints are irrelevant here
                _ => {}
            }
        }

        let sas_token = match sas_token {
            Some(token) if !token.trim_start_matches('?').is_empty() => {
                token.trim_start_matches('?').to_string()
            }
            _ if development || account_key.is_some() => {
                return Err(invalid(
                    "shared key authorization is not supported; provide SharedAccessSignature",
                ))
            }
            _ => return Err(invalid("missing SharedAccessSignature")),
        };

        let endpoint = match blob_endpoint {
            Some(endpoint) => endpoint,
            None => {
                let account = account_name
                    .as_deref()
                    .ok_or_else(|| invalid("needs BlobEndpoint or AccountName"))?;
                format!(
                    "{}://{}.blob.{}",
                    protocol.as_deref().unwrap_or("https"),
                    account,
                    endpoint_suffix.as_deref().unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
                )
            }
        };
        let blob_endpoint =
            Url::parse(&endpoint).map_err(|e| invalid(format!("blob endpoint '{endpoint}': {e}")))?;
        if !matches!(blob_endpoint.scheme(), "http" | "https") || blob_endpoint.cannot_be_a_base()
        {
            return Err(invalid(format!("blob endpoint '{endpoint}' is not an http(s) URL")));
        }

        Ok(Self {
            account_name,
            blob_endpoint,
            sas_token,
        })
    }
}

fn redact(segment: &str) -> String {
    segment.chars().take(24).collect()
}

/// Container names: 3-63 characters of lowercase letters, digits and single
/// hyphens, starting and ending with a letter or digit.
pub fn validate_container_name(name: &str) -> Result<(), StorageError> {
    let fail = |message: &str| StorageError::InvalidContainerName {
        name: name.to_string(),
        message: message.to_string(),
    };
    if !(3..=63).contains(&name.len()) {
        return Err(fail("must be 3 to 63 characters long"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(fail("only lowercase letters, digits and hyphens are allowed"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(fail("must start and end with a letter or digit"));
    }
    if name.contains("--") {
        return Err(fail("consecutive hyphens are not allowed"));
    }
    Ok(())
}

/// Validated settings for the promotion uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionConfig {
    pub connection: ConnectionString,
    pub container: String,
}

impl PromotionConfig {
    pub fn from_env() -> PlResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Every failure is a
    /// configuration error.
    pub fn from_lookup<F>(lookup: F) -> PlResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup(STORAGE_CONNECTION_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| config_error!("{STORAGE_CONNECTION_VAR} is not set"))?;
        let container = lookup(CONTAINER_NAME_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| config_error!("{CONTAINER_NAME_VAR} is not set"))?;

        let connection = ConnectionString::parse(&raw)
            .map_err(|e| config_error!("{STORAGE_CONNECTION_VAR}: {e}"))?;
        validate_container_name(&container)
            .map_err(|e| config_error!("{CONTAINER_NAME_VAR}: {e}"))?;

        Ok(Self {
            connection,
            container,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn parses_account_sas_connection_string() {
        let conn = ConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=plinth;EndpointSuffix=core.windows.net;SharedAccessSignature=?sv=2022-11-02&sig=abc%3D",
        )
        .unwrap();
        assert_eq!(conn.account_name.as_deref(), Some("plinth"));
        assert_eq!(conn.blob_endpoint.as_str(), "https://plinth.blob.core.windows.net/");
        assert_eq!(conn.sas_token, "sv=2022-11-02&sig=abc%3D");
        assert!(!format!("{conn:?}").contains("sig=abc"));
    }

    #[test]
    fn explicit_blob_endpoint_wins() {
        let conn = ConnectionString::parse(
            "BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1;SharedAccessSignature=sv=1&sig=x",
        )
        .unwrap();
        assert_eq!(conn.blob_endpoint.port(), Some(10000));
        assert_eq!(conn.blob_endpoint.path(), "/devstoreaccount1");
    }

    #[test]
    fn rejects_key_only_and_malformed_strings() {
        assert!(ConnectionString::parse("AccountName=a;AccountKey=Zm9v").is_err());
        assert!(ConnectionString::parse("UseDevelopmentStorage=true").is_err());
        assert!(ConnectionString::parse("AccountName").is_err());
        assert!(ConnectionString::parse("SharedAccessSignature=sv=1").is_err());
    }

    #[test]
    fn container_name_rules() {
        assert!(validate_container_name("models").is_ok());
        assert!(validate_container_name("iris-models-01").is_ok());
        for bad in ["ab", "Models", "-models", "models-", "mo--dels", "mod_els"] {
            assert!(validate_container_name(bad).is_err(), "{bad} accepted");
        }
        assert!(validate_container_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn env_problems_are_config_errors() {
        let conn = "AccountName=plinth;SharedAccessSignature=sv=1&sig=x";

        let config = PromotionConfig::from_lookup(lookup(&[
            (STORAGE_CONNECTION_VAR, conn),
            (CONTAINER_NAME_VAR, "models"),
        ]))
        .unwrap();
        assert_eq!(config.container, "models");

        for vars in [
            vec![(CONTAINER_NAME_VAR, "models")],
            vec![(STORAGE_CONNECTION_VAR, conn)],
            vec![(STORAGE_CONNECTION_VAR, conn), (CONTAINER_NAME_VAR, "Bad_Name")],
            vec![(STORAGE_CONNECTION_VAR, "AccountKey=x"), (CONTAINER_NAME_VAR, "models")],
        ] {
            assert!(PromotionConfig::from_lookup(lookup(&vars)).unwrap_err().is_config());
        }
    }
}
