use bon::Builder;
use serde::{Deserialize, Serialize};

/// Request to run the analysis pipeline for a company.
///
/// # Example
///
/// ```
/// use chat_stream_client::rest::types::ProcessCompanyRequest;
///
/// let request = ProcessCompanyRequest::builder().company_name("Acme").build();
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Builder)]
#[builder(on(String, into))]
pub struct ProcessCompanyRequest {
    pub company_name: String,
}

/// Outcome of processing a company.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Builder)]
#[builder(on(String, into))]
pub struct ProcessCompanyResponse {
    pub success: bool,
    pub message: Option<String>,
    pub company_name: Option<String>,
    pub company_id: Option<String>,
    /// Conversation created for the company; pass it to `ConnectionManager::connect`
    pub conversation_id: Option<String>,
    pub processed_at: Option<String>,
    pub error: Option<String>,
}

/// A stored conversation.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Builder)]
#[builder(on(String, into))]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Builder)]
#[builder(on(String, into))]
pub struct ConversationsResponse {
    pub success: bool,
    #[serde(default)]
    #[builder(default)]
    pub conversations: Vec<Conversation>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Builder)]
#[builder(on(String, into))]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    /// Whether the backend's storage credentials are configured (`ok` or `missing`)
    pub supabase_env: Option<String>,
}

impl HealthResponse {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
