//! HTTP registry client speaking the Consul v1 API.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{KeyPair, QueryMeta, QueryOptions, RegistryClient, RegistryError, ServiceRecord};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Grace added on top of the long-poll horizon before a request times
/// out; the registry is allowed to hold the connection the full wait.
const REQUEST_GRACE: Duration = Duration::from_secs(5);

/// Registry client over HTTP with blocking-query support.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CatalogService {
    #[serde(rename = "Node")]
    node: String,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
    #[serde(rename = "ServiceName")]
    service_name: String,
    #[serde(rename = "ServiceTags")]
    service_tags: Option<Vec<String>>,
    #[serde(rename = "ServicePort")]
    service_port: u16,
}

#[derive(Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl HttpRegistry {
    /// Build a client for the registry at `addr` (`host:port`, or a full
    /// `http(s)://` URL).
    pub fn new(addr: &str) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder().build()?;
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        Ok(Self { base, client })
    }

    async fn get(
        &self,
        path: &str,
        query: Vec<(String, String)>,
        options: &QueryOptions,
    ) -> Result<(reqwest::Response, QueryMeta), RegistryError> {
        let mut query = query;
        if let Some(dc) = &options.datacenter {
            query.push(("dc".to_string(), dc.clone()));
        }
        if options.wait_index > 0 {
            query.push(("index".to_string(), options.wait_index.to_string()));
            query.push(("wait".to_string(), format!("{}s", options.wait_time.as_secs())));
        }

        let mut request = self
            .client
            .get(format!("{}{}", self.base, path))
            .timeout(options.wait_time + REQUEST_GRACE)
            .query(&query);
        if let Some(token) = &options.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let meta = QueryMeta {
            last_index: parse_index(&response),
        };
        debug!(path, status = response.status().as_u16(), index = meta.last_index, "registry response");
        Ok((response, meta))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn services(
        &self,
        name: &str,
        tag: Option<&str>,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceRecord>, QueryMeta), RegistryError> {
        let path = format!("/v1/catalog/service/{name}");
        let mut query = Vec::new();
        if let Some(tag) = tag {
            query.push(("tag".to_string(), tag.to_string()));
        }

        let (response, meta) = self.get(&path, query, options).await?;
        if !response.status().is_success() {
            return Err(RegistryError::UnexpectedStatus {
                status: response.status().as_u16(),
                path,
            });
        }

        let entries: Vec<CatalogService> = response.json().await?;
        let records = entries
            .into_iter()
            .map(|e| ServiceRecord {
                node: e.node,
                address: e.address,
                id: e.service_id,
                name: e.service_name,
                tags: e.service_tags.unwrap_or_default(),
                port: e.service_port,
            })
            .collect();
        Ok((records, meta))
    }

    async fn key(&self, path: &str, options: &QueryOptions) -> Result<(Option<String>, QueryMeta), RegistryError> {
        let url_path = format!("/v1/kv/{path}");
        let (response, meta) = self.get(&url_path, Vec::new(), options).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok((None, meta));
        }
        if !response.status().is_success() {
            return Err(RegistryError::UnexpectedStatus {
                status: response.status().as_u16(),
                path: url_path,
            });
        }

        let entries: Vec<KvEntry> = response.json().await?;
        let value = match entries.into_iter().next() {
            Some(entry) => Some(decode_value(entry.value)?),
            None => None,
        };
        Ok((value, meta))
    }

    async fn key_prefix(
        &self,
        prefix: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<KeyPair>, QueryMeta), RegistryError> {
        let url_path = format!("/v1/kv/{prefix}");
        let query = vec![("recurse".to_string(), "true".to_string())];

        let (response, meta) = self.get(&url_path, query, options).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok((Vec::new(), meta));
        }
        if !response.status().is_success() {
            return Err(RegistryError::UnexpectedStatus {
                status: response.status().as_u16(),
                path: url_path,
            });
        }

        let entries: Vec<KvEntry> = response.json().await?;
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries {
            let value = decode_value(entry.value)?;
            pairs.push(KeyPair { key: entry.key, value });
        }
        Ok((pairs, meta))
    }
}

fn parse_index(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Registry values arrive base64-encoded and are exposed as UTF-8 text.
fn decode_value(value: Option<String>) -> Result<String, RegistryError> {
    let Some(encoded) = value else {
        return Ok(String::new());
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| RegistryError::Decode(format!("invalid base64 in kv value: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
