use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The configuration surface recognized by the engine. All keys are optional
/// with sensible defaults; a missing `export_uri` or `wacz_source_uri` simply
/// means the corresponding middleware reports itself not-configured.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Target URI (or templated pattern) for the WACZ produced at crawl end.
    pub export_uri: Option<String>,
    /// Comma-separated WACZ URIs to replay from.
    pub wacz_source_uri: Option<String>,
    /// Drive the crawl from the archive index instead of the seed URLs.
    pub wacz_crawl: bool,
    /// Per-request I/O timeout for storage backends.
    #[serde(with = "humantime_serde")]
    pub wacz_timeout: Duration,
    /// Target instant for the archive selector.
    #[serde(with = "time::serde::rfc3339::option")]
    pub wacz_lookup_target: Option<OffsetDateTime>,
    /// Name of the registered selector strategy.
    pub wacz_lookup_strategy: String,
    pub wacz_title: Option<String>,
    pub wacz_description: Option<String>,
    pub s3: S3Settings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            export_uri: None,
            wacz_source_uri: None,
            wacz_crawl: false,
            wacz_timeout: DEFAULT_TIMEOUT,
            wacz_lookup_target: None,
            wacz_lookup_strategy: "after".to_owned(),
            wacz_title: None,
            wacz_description: None,
            s3: S3Settings::default(),
        }
    }
}

impl Settings {
    /// Splits `wacz_source_uri` into the individual archive URIs.
    pub fn source_uris(&self) -> Vec<String> {
        self.wacz_source_uri
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(|part| part.trim().to_owned())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.wacz_timeout, Duration::from_secs(60));
        assert_eq!(settings.wacz_lookup_strategy, "after");
        assert!(!settings.wacz_crawl);
        assert!(settings.export_uri.is_none());
        assert!(settings.source_uris().is_empty());
    }

    #[test]
    fn source_uri_list_is_comma_split() {
        let settings = Settings {
            wacz_source_uri: Some("file:///tmp/a.wacz, s3://bucket/b.wacz".to_owned()),
            ..Settings::default()
        };
        assert_eq!(
            settings.source_uris(),
            vec!["file:///tmp/a.wacz".to_owned(), "s3://bucket/b.wacz".to_owned()]
        );
    }

    #[test]
    fn timeout_parses_humantime() {
        let settings: Settings =
            serde_json::from_str(r#"{"wacz_timeout": "90s", "wacz_crawl": true}"#).unwrap();
        assert_eq!(settings.wacz_timeout, Duration::from_secs(90));
        assert!(settings.wacz_crawl);
    }
}
