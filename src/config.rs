//! Environment-driven settings for the service and the gallery client.
//!
//! Values come from the process environment (after `.env` is loaded by the
//! binary). Blank values count as unset.

use std::path::PathBuf;

use url::Url;

use crate::error::ConfigError;
use crate::modelscope::{DEFAULT_MODEL, MODELSCOPE_API_ROOT};

const APP_DIR: &str = "ai-image-gallery";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PAGE_LIMIT: u32 = 10;
const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub bind_address: String,
    pub data_dir: PathBuf,
    pub public_url: String,
    pub modelscope_api_key: Option<String>,
    pub modelscope_api_root: String,
    pub modelscope_model: String,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: Url,
    pub page_limit: u32,
    pub memo_dir: PathBuf,
}

fn lookup_value(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_base_dir() -> PathBuf {
    let mut base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(APP_DIR);
    base
}

impl ServiceSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup_value(&lookup, "GALLERY_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let host = lookup_value(&lookup, "GALLERY_BIND").unwrap_or_else(|| "0.0.0.0".to_string());
        let bind_address = format!("{host}:{port}");

        let data_dir = lookup_value(&lookup, "DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_base_dir);

        let public_url = lookup_value(&lookup, "PUBLIC_URL")
            .or_else(|| lookup_value(&lookup, "DOMAIN"))
            .map(|raw| normalize_public_url(&raw))
            .unwrap_or_else(|| {
                let reachable_host = if host == "0.0.0.0" { "127.0.0.1" } else { host.as_str() };
                format!("http://{reachable_host}:{port}")
            });

        Self {
            bind_address,
            data_dir,
            public_url,
            modelscope_api_key: lookup_value(&lookup, "MODELSCOPE_API_KEY"),
            modelscope_api_root: lookup_value(&lookup, "MODELSCOPE_API_ROOT")
                .unwrap_or_else(|| MODELSCOPE_API_ROOT.to_string()),
            modelscope_model: lookup_value(&lookup, "MODELSCOPE_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.modelscope_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("MODELSCOPE_API_KEY"))
    }
}

impl ClientSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_url =
            lookup_value(&lookup, "GALLERY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = validate_http_url("GALLERY_API_URL", &raw_url)?;
        let page_limit = lookup_value(&lookup, "GALLERY_PAGE_LIMIT")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        let memo_dir = lookup_value(&lookup, "MEMO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_base_dir().join("memo"));
        Ok(Self {
            api_url,
            page_limit,
            memo_dir,
        })
    }
}

/// Adds a scheme when missing and collapses doubled schemes such as
/// `http://https://host`.
fn normalize_public_url(raw: &str) -> String {
    let mut rest = raw.trim().trim_end_matches('/');
    let mut scheme = None;
    loop {
        if let Some(stripped) = rest.strip_prefix("https://") {
            scheme = Some("https");
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("http://") {
            scheme = Some("http");
            rest = stripped;
        } else {
            break;
        }
    }
    format!("{}://{rest}", scheme.unwrap_or("http"))
}

pub fn validate_http_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    let parsed = Url::parse(trimmed).map_err(|err| ConfigError::InvalidUrl {
        name,
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ConfigError::InvalidUrl {
            name,
            reason: format!("unsupported scheme {scheme}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn service_defaults_point_public_url_at_loopback() {
        let settings = ServiceSettings::from_lookup(lookup(&[]));
        assert_eq!(settings.bind_address, "0.0.0.0:3000");
        assert_eq!(settings.public_url, "http://127.0.0.1:3000");
        assert!(settings.require_api_key().is_err());
    }

    #[test]
    fn blank_values_are_unset_and_domain_gets_a_scheme() {
        let settings = ServiceSettings::from_lookup(lookup(&[
            ("GALLERY_PORT", "8080"),
            ("PUBLIC_URL", "   "),
            ("DOMAIN", "gallery.example.com/"),
            ("MODELSCOPE_API_KEY", "secret"),
        ]));
        assert_eq!(settings.bind_address, "0.0.0.0:8080");
        assert_eq!(settings.public_url, "http://gallery.example.com");
        assert_eq!(settings.require_api_key().unwrap(), "secret");
    }

    #[test]
    fn doubled_schemes_collapse() {
        assert_eq!(normalize_public_url("http://https://cdn.example"), "https://cdn.example");
        assert_eq!(normalize_public_url("https://http://cdn.example/"), "http://cdn.example");
    }

    #[test]
    fn client_settings_validate_api_url() {
        let settings = ClientSettings::from_lookup(lookup(&[("GALLERY_PAGE_LIMIT", "0")])).unwrap();
        assert_eq!(settings.api_url.as_str(), "http://127.0.0.1:3000/");
        assert_eq!(settings.page_limit, DEFAULT_PAGE_LIMIT);

        let err = ClientSettings::from_lookup(lookup(&[("GALLERY_API_URL", "ftp://host")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }
}
