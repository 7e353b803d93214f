// src/services/fetcher.rs

//! HTTP fetching through the per-group rate limiters.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::{CheckerDefinition, HttpConfig};
use crate::services::RateLimiters;
use crate::utils::http::create_async_client;

/// Everything needed to fetch one checker's page.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a Url,
    pub headers: &'a BTreeMap<String, String>,
    pub max_redirects: usize,
    pub rate_limit_group: &'a str,
}

impl<'a> From<&'a CheckerDefinition> for FetchRequest<'a> {
    fn from(checker: &'a CheckerDefinition) -> Self {
        Self {
            url: &checker.url,
            headers: &checker.headers,
            max_redirects: checker.max_redirects,
            rate_limit_group: &checker.rate_limit_group,
        }
    }
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// URL after redirects
    pub url: String,
    pub body: Vec<u8>,
    /// `charset` parameter of the Content-Type header
    pub charset: Option<String>,
}

/// Source of raw documents.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &FetchRequest<'_>) -> std::result::Result<RawResponse, FetchError>;
}

/// Fetches over HTTP, one reqwest client per redirect limit.
pub struct HttpFetcher {
    config: HttpConfig,
    limiters: Arc<RateLimiters>,
    clients: Mutex<HashMap<usize, Client>>,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig, limiters: Arc<RateLimiters>) -> Self {
        Self {
            config,
            limiters,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Client whose redirect policy stops after `max_redirects` hops.
    ///
    /// A stopped redirect is returned as its 3xx response, so the status is
    /// reported instead of a generic redirect error.
    fn client(&self, max_redirects: usize) -> Result<Client> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&max_redirects) {
            return Ok(client.clone());
        }

        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });
        let client = create_async_client(&self.config, policy)?;
        clients.insert(max_redirects, client.clone());
        Ok(client)
    }

    async fn send(
        client: &Client,
        request: &FetchRequest<'_>,
        max_body_bytes: usize,
    ) -> std::result::Result<RawResponse, FetchError> {
        let url = request.url.as_str();
        let mut builder = client.get(request.url.clone());
        for (name, value) in request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: max_body_bytes,
        };
        if response
            .content_length()
            .is_some_and(|len| len > max_body_bytes as u64)
        {
            return Err(too_large());
        }

        let final_url = response.url().to_string();
        let charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(content_type_charset);

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            if body.len() + chunk.len() > max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(RawResponse {
            status: status.as_u16(),
            url: final_url,
            body,
            charset,
        })
    }
}

/// The `charset` parameter of a Content-Type value, unquoted.
fn content_type_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest<'_>) -> std::result::Result<RawResponse, FetchError> {
        let client = self
            .client(request.max_redirects)
            .map_err(|e| FetchError::Transport {
                url: request.url.to_string(),
                message: e.to_string(),
            })?;
        let limiter = self.limiters.get(request.rate_limit_group);

        log::debug!("Fetching {} (group '{}')", request.url, request.rate_limit_group);
        let max_body_bytes = self.config.max_body_bytes;
        limiter
            .schedule(|| Self::send(&client, request, max_body_bytes))
            .await
    }
}
