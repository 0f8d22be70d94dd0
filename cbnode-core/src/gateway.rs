//! Authenticated access to the cluster's administrative REST API.

use crate::{AdminCredentials, CbError, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which identity a form POST authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Built-in identity, only valid before custom credentials are set.
    FactoryDefault,
    Configured,
}

#[derive(Debug, Clone)]
pub struct ClusterGateway {
    http: reqwest::Client,
    credentials: AdminCredentials,
    factory_default: AdminCredentials,
}

impl ClusterGateway {
    pub fn new(credentials: AdminCredentials, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            credentials,
            factory_default: AdminCredentials::factory_default(),
        })
    }

    pub fn credentials(&self) -> &AdminCredentials {
        &self.credentials
    }

    /// GET `url` with the configured identity and decode the body as `T`.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(CbError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body)
            .map_err(|error| CbError::Decode(format!("GET {}: {}", url, error)))
    }

    /// POST url-encoded `fields`. Any status outside 2xx is an error carrying
    /// the status and body verbatim.
    pub async fn submit_form(
        &self,
        auth: AuthMode,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<()> {
        let identity = match auth {
            AuthMode::FactoryDefault => &self.factory_default,
            AuthMode::Configured => &self.credentials,
        };

        let response = self
            .http
            .post(url)
            .basic_auth(&identity.username, Some(&identity.password))
            .form(fields)
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|error| format!("Unable to read body: {}", error));

        if !status.is_success() {
            return Err(CbError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Unauthenticated GET, returning only the status code.
    pub async fn probe(&self, url: &str) -> Result<StatusCode> {
        let response = self.http.get(url).send().await?;
        Ok(response.status())
    }
}
