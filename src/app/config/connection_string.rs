use super::ConfigError;
use crate::sender::client::{DEFAULT_INGESTION_URL, normalize_ingestion_url};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Destination of the telemetry: which resource (`InstrumentationKey`) and
/// where to send it (`IngestionEndpoint`).
///
/// Accepts `InstrumentationKey=<guid>;IngestionEndpoint=<url>;LiveEndpoint=<url>`
/// with case-insensitive keys and loose whitespace, or a bare GUID. Segments
/// with unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub instrumentation_key: String,
    pub ingestion_url: Url,
    pub live_endpoint: Option<Url>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("connection string is empty"));
        }

        if !trimmed.contains('=') {
            return Ok(Self {
                instrumentation_key: parse_key(trimmed)?,
                ingestion_url: default_ingestion_url()?,
                live_endpoint: None,
            });
        }

        let mut key = None;
        let mut ingestion = None;
        let mut live = None;

        for segment in trimmed.split(';').map(str::trim) {
            if segment.is_empty() {
                continue;
            }
            let Some((name, value)) = segment.split_once('=') else {
                return Err(invalid(&format!("segment '{segment}' is not key=value")));
            };
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => key = Some(value),
                "ingestionendpoint" => ingestion = Some(value),
                "liveendpoint" => live = Some(value),
                _ => {}
            }
        }

        let Some(key) = key else {
            return Err(invalid("InstrumentationKey is missing"));
        };

        let ingestion_url = match ingestion {
            Some(endpoint) => normalize_ingestion_url(endpoint)
                .map_err(|e| invalid(&format!("IngestionEndpoint: {e}")))?,
            None => default_ingestion_url()?,
        };

        let live_endpoint = live
            .map(|endpoint| {
                Url::parse(endpoint).map_err(|e| invalid(&format!("LiveEndpoint '{endpoint}': {e}")))
            })
            .transpose()?;

        Ok(Self {
            instrumentation_key: parse_key(key)?,
            ingestion_url,
            live_endpoint,
        })
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::InvalidConnectionString(reason.to_string())
}

fn parse_key(raw: &str) -> Result<String, ConfigError> {
    uuid::Uuid::parse_str(raw)
        .map(|key| key.hyphenated().to_string())
        .map_err(|_| invalid(&format!("'{raw}' is not a valid instrumentation key")))
}

fn default_ingestion_url() -> Result<Url, ConfigError> {
    Url::parse(DEFAULT_INGESTION_URL).map_err(|e| ConfigError::InvalidUrl(e.to_string()))
}

impl FromStr for ConnectionString {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InstrumentationKey={};IngestionEndpoint={}",
            self.instrumentation_key, self.ingestion_url
        )?;
        if let Some(live) = &self.live_endpoint {
            write!(f, ";LiveEndpoint={live}")?;
        }
        Ok(())
    }
}
