//! HTTP client for the chat backend's REST endpoints.
//!
//! **Feature flag:** `rest` (required to use this module)
//!
//! The chat socket is scoped to a conversation id; this module is how callers obtain one,
//! either by processing a company (which creates its conversation) or by listing existing
//! conversations.
//!
//! ## Available Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/company/process-company` | POST | Run the analysis pipeline for a company |
//! | `/conversations` | GET | List conversations |
//! | `/health` | GET | Backend liveness |
//!
//! # Example
//!
//! ```no_run
//! use chat_stream_client::Environment;
//! use chat_stream_client::rest::{Client, types::ProcessCompanyRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::for_environment(Environment::Local)?;
//!
//! let request = ProcessCompanyRequest::builder().company_name("Acme").build();
//! let response = client.process_company(&request).await?;
//!
//! if let Some(conversation_id) = response.conversation_id {
//!     println!("Chat about Acme in {conversation_id}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod types;

pub use client::Client;
