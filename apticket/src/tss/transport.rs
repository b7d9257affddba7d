// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! HTTP exchange with the signing server.

use reqwest::{
    blocking::Client,
    header::{CACHE_CONTROL, CONTENT_TYPE, USER_AGENT},
};
use thiserror::Error;
use tracing::debug;

use crate::tss::request::{self, TssRequest};

pub const TSS_ENDPOINT: &str = "https://gs.apple.com/TSS/controller";
pub const TSS_USER_AGENT: &str = "InetURL/1.0";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to serialize request")]
    Request(#[from] request::Error),
    #[error("Failed to exchange request with TSS server")]
    Http(#[from] reqwest::Error),
    #[error("TSS server returned HTTP {0}")]
    HttpStatus(u16),
}

type Result<T> = std::result::Result<T, Error>;

/// Blocking client for the signing endpoint. Retry policy belongs to the
/// caller; a failed exchange surfaces immediately.
pub struct TssClient {
    client: Client,
    endpoint: String,
}

impl TssClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(TSS_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: endpoint.into(),
        })
    }

    /// POST the serialized request and return the raw response body for the
    /// response parser.
    pub fn send(&self, request: &TssRequest) -> Result<String> {
        let body = request.to_xml()?;
        debug!("Sending {} byte TSS request to {}", body.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("action", "2")])
            .header(CACHE_CONTROL, "no-cache")
            .header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")
            .header(USER_AGENT, TSS_USER_AGENT)
            .body(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }

        Ok(response.text()?)
    }
}
