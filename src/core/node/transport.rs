// src/core/node/transport.rs

//! The REST seam between a node handle and the network.

use crate::config::NodeConfig;
use crate::core::errors::{LavalinkError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

pub use reqwest::Method;

/// One REST round-trip to a node. Paths are relative to the node's base address.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attaches a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

/// The raw answer to a [`RestRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RestResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Converts a non-2xx answer into the matching error.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = serde_json::from_slice::<RemoteErrorBody>(&self.body)
            .map(|body| body.message.unwrap_or(body.error))
            .unwrap_or_else(|_| String::from_utf8_lossy(&self.body).into_owned());
        if self.status == 404 {
            Err(LavalinkError::NotFound(message))
        } else {
            Err(LavalinkError::RemoteError {
                status: self.status,
                message,
            })
        }
    }
}

/// The JSON error body returned by nodes.
#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// Executes REST round-trips against one node.
///
/// Implementations report connectivity loss as [`LavalinkError::Connection`]; the node handle
/// owns timeouts, cancellation and availability.
#[async_trait]
pub trait NodeTransport: Send + Sync + 'static {
    async fn execute(&self, request: RestRequest) -> Result<RestResponse>;
}

/// The production transport, backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    password: String,
}

impl HttpTransport {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_concurrent_requests)
            .build()?;
        Ok(Self {
            client,
            base: config.rest_base()?,
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn execute(&self, request: RestRequest) -> Result<RestResponse> {
        let url = self.base.join(request.path.trim_start_matches('/'))?;
        let mut builder = self
            .client
            .request(request.method, url)
            .header(AUTHORIZATION, &self.password);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let res = builder.send().await?;
        let status = res.status().as_u16();
        let body = res.bytes().await?;
        Ok(RestResponse { status, body })
    }
}
