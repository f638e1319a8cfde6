use reqwest::{
    Client as ReqwestClient, Method,
    header::{HeaderMap, HeaderValue},
};
use url::Url;

use super::types::{
    ConversationsResponse, HealthResponse, ProcessCompanyRequest, ProcessCompanyResponse,
};
use crate::{Environment, Result};

/// Client for the chat backend's REST API.
///
/// # Example
///
/// ```no_run
/// use chat_stream_client::rest::Client;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::default();
///
/// for conversation in client.conversations().await?.conversations {
///     println!("{} {}", conversation.id, conversation.name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
}

impl Default for Client {
    fn default() -> Self {
        Client::for_environment(Environment::Hosted)
            .expect("Client with default endpoint should succeed")
    }
}

impl Client {
    /// Creates a new client with a custom host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host URL is invalid or the HTTP client fails to build.
    pub fn new(host: &str) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("chat_stream_client"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            host: Url::parse(host)?,
            client,
        })
    }

    /// Creates a client for the REST host of `environment`.
    pub fn for_environment(environment: Environment) -> Result<Client> {
        Self::new(environment.http_host())
    }

    /// Returns the host URL for the client.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.host.join(path)?)
    }

    /// Run the analysis pipeline for a company and create its conversation.
    ///
    /// A `success: false` body is returned as-is; only non-2xx statuses are errors.
    pub async fn process_company(
        &self,
        request: &ProcessCompanyRequest,
    ) -> Result<ProcessCompanyResponse> {
        let request = self
            .client
            .request(Method::POST, self.endpoint("company/process-company")?)
            .json(request)
            .build()?;

        crate::request(&self.client, request, None).await
    }

    /// List stored conversations.
    pub async fn conversations(&self) -> Result<ConversationsResponse> {
        let request = self
            .client
            .request(Method::GET, self.endpoint("conversations")?)
            .build()?;

        crate::request(&self.client, request, None).await
    }

    /// Check that the backend is up.
    pub async fn health(&self) -> Result<HealthResponse> {
        let request = self
            .client
            .request(Method::GET, self.endpoint("health")?)
            .build()?;

        crate::request(&self.client, request, None).await
    }
}
