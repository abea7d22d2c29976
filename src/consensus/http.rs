//! HTTP boundary used by replica fetch functions.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Non-2xx statuses become a [`FetchError::Status`].
    pub fn ensure_success(self) -> Result<Self> {
        if (200..300).contains(&self.status) {
            return Ok(self);
        }
        let snippet: String = String::from_utf8_lossy(&self.body).chars().take(200).collect();
        Err(FetchError::Status {
            url: self.url,
            status: self.status,
            body: snippet,
        }
        .into())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .with_context(|| format!("malformed JSON body from {}", self.url))
    }

    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).with_context(|| format!("non UTF-8 body from {}", self.url))
    }
}

#[derive(Debug)]
pub enum FetchError {
    Status {
        url: String,
        status: u16,
        body: String,
    },
    TooLarge {
        url: String,
        limit: usize,
    },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Status { url, status, body } if body.is_empty() => {
                write!(f, "GET {url} returned HTTP {status}")
            }
            FetchError::Status { url, status, body } => {
                write!(f, "GET {url} returned HTTP {status}: {body}")
            }
            FetchError::TooLarge { url, limit } => {
                write!(f, "response from {url} exceeded {limit} bytes")
            }
        }
    }
}

impl std::error::Error for FetchError {}

/// Performs one HTTP request. Implementations return the response whatever
/// its status; callers decide with [`HttpResponse::ensure_success`].
pub trait HttpFetcher: Send + Sync {
    fn fetch<'a>(&'a self, request: &'a HttpRequest) -> BoxFuture<'a, Result<HttpResponse>>;
}

/// `reqwest` implementation with a per-request timeout and a body size cap.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, max_response_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            max_response_bytes,
        })
    }

    async fn perform(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("invalid HTTP method {}", request.method))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .send()
            .await
            .with_context(|| format!("request to {} failed", request.url))?;
        let status = response.status().as_u16();

        let too_large = || FetchError::TooLarge {
            url: request.url.clone(),
            limit: self.max_response_bytes,
        };
        if response
            .content_length()
            .is_some_and(|length| length > self.max_response_bytes as u64)
        {
            return Err(too_large().into());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("failed to read body from {}", request.url))?
        {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(too_large().into());
            }
            body.extend_from_slice(&chunk);
        }

        tracing::trace!(url = %request.url, status, bytes = body.len(), "HTTP fetch completed");
        Ok(HttpResponse {
            url: request.url.clone(),
            status,
            body,
        })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn fetch<'a>(&'a self, request: &'a HttpRequest) -> BoxFuture<'a, Result<HttpResponse>> {
        Box::pin(self.perform(request))
    }
}
