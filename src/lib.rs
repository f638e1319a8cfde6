#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod chat;
pub mod error;
#[cfg(feature = "rest")]
pub mod rest;
#[cfg(feature = "rest")]
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

#[cfg(feature = "rest")]
use reqwest::{Request, header::HeaderMap};
#[cfg(feature = "rest")]
use serde::de::DeserializeOwned;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable selecting the [`Environment`] (`local` or `hosted`).
pub const ENVIRONMENT_VAR: &str = "CHAT_ENVIRONMENT";

const LOCAL_WS_ENDPOINT: &str = "ws://localhost:8000/ws/chat";
const LOCAL_HTTP_HOST: &str = "http://localhost:8000";
const HOSTED_WS_ENDPOINT: &str = "wss://ibhackathon-production.up.railway.app/ws/chat";
const HOSTED_HTTP_HOST: &str = "https://ibhackathon-production.up.railway.app";

/// Deployment the client talks to.
#[non_exhaustive]
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Environment {
    /// Backend running on the developer machine
    Local,
    #[default]
    Hosted,
}

impl Environment {
    /// Read [`ENVIRONMENT_VAR`], falling back to [`Environment::Hosted`] when it is unset or
    /// unrecognized.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                #[cfg(feature = "tracing")]
                tracing::warn!(%value, "Unrecognized {ENVIRONMENT_VAR}, using hosted");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Chat WebSocket endpoint, without the conversation query.
    #[must_use]
    pub const fn ws_endpoint(self) -> &'static str {
        match self {
            Self::Local => LOCAL_WS_ENDPOINT,
            Self::Hosted => HOSTED_WS_ENDPOINT,
        }
    }

    /// Base URL of the REST API.
    #[must_use]
    pub const fn http_host(self) -> &'static str {
        match self {
            Self::Local => LOCAL_HTTP_HOST,
            Self::Hosted => HOSTED_HTTP_HOST,
        }
    }
}

#[cfg(feature = "rest")]
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request, headers),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    mut request: Request,
    headers: Option<HeaderMap>,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    if let Some(h) = headers {
        *request.headers_mut() = h;
    }

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "API request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    let json_value = response.json::<serde_json::Value>().await?;
    serde_helpers::deserialize_with_warnings(json_value)
}
