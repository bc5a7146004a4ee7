//! services/api/src/adapters/backend.rs
//!
//! HTTP adapter for the document-processing and generation backend. It implements
//! the `StudyBackendService` port; every request carries the caller's bearer token.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use study_session_core::domain::{Difficulty, FileDescriptor, Flashcard, FlashcardOptions};
use study_session_core::ports::{AuthUser, PortError, PortResult, StudyBackendService};
use tracing::{debug, error};
use uuid::Uuid;

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    session_id: Uuid,
    files: &'a [FileDescriptor],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRequest<'a> {
    session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct McqRequest<'a> {
    session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    num_questions: u32,
    num_options: u32,
    difficulty: Difficulty,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicsRequest {
    session_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    session_id: Uuid,
    conversation_id: Uuid,
    message: &'a str,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Deserialize)]
struct McqResponse {
    mcqs: Vec<Flashcard>,
}

#[derive(Deserialize)]
struct TopicsResponse {
    topics: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Builds the port error for a failed backend call, keeping the backend's own
/// message when its body carries one.
pub fn backend_error(status: u16, body: &str) -> PortError {
    if status == StatusCode::UNAUTHORIZED.as_u16() {
        return PortError::Unauthorized;
    }
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    PortError::Backend { status, message }
}

//=========================================================================================
// The Adapter
//=========================================================================================

#[derive(Clone)]
pub struct HttpStudyBackend {
    client: Client,
    base_url: String,
}

impl HttpStudyBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post<B, T>(&self, auth: &AuthUser, path: &str, body: &B) -> PortResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&auth.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                PortError::Unexpected(format!("Backend request to {} failed: {}", path, e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            error!("Backend {} returned {}: {}", path, status, text);
            return Err(backend_error(status, &text));
        }

        resp.json()
            .await
            .map_err(|e| {
                PortError::Unexpected(format!("Malformed backend response from {}: {}", path, e))
            })
    }
}

#[async_trait]
impl StudyBackendService for HttpStudyBackend {
    async fn process_documents(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        files: &[FileDescriptor],
    ) -> PortResult<()> {
        let _: serde_json::Value = self
            .post(auth, "documents/process", &ProcessRequest { session_id, files })
            .await?;
        Ok(())
    }

    async fn generate_summary(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        query: Option<&str>,
    ) -> PortResult<String> {
        let resp: SummaryResponse = self
            .post(auth, "documents/summary", &SummaryRequest { session_id, query })
            .await?;
        Ok(resp.summary)
    }

    async fn generate_mcqs(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        query: Option<&str>,
        options: &FlashcardOptions,
    ) -> PortResult<Vec<Flashcard>> {
        let request = McqRequest {
            session_id,
            query,
            num_questions: options.num_questions,
            num_options: options.num_options,
            difficulty: options.difficulty,
        };
        let resp: McqResponse = self.post(auth, "documents/mcqs", &request).await?;
        Ok(resp.mcqs)
    }

    async fn get_topics(&self, auth: &AuthUser, session_id: Uuid) -> PortResult<Vec<String>> {
        let resp: TopicsResponse = self
            .post(auth, "documents/topics", &TopicsRequest { session_id })
            .await?;
        Ok(resp.topics)
    }

    async fn chat(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        conversation_id: Uuid,
        message: &str,
    ) -> PortResult<String> {
        let request = ChatRequest {
            session_id,
            conversation_id,
            message,
        };
        let resp: ChatResponse = self.post(auth, "chat", &request).await?;
        Ok(resp.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_message_is_kept() {
        let err = backend_error(422, r#"{"message":"Unsupported file type"}"#);
        assert!(matches!(
            err,
            PortError::Backend { status: 422, message: Some(ref m) } if m == "Unsupported file type"
        ));
    }

    #[test]
    fn unreadable_body_has_no_message() {
        assert!(matches!(
            backend_error(500, "<html>oops</html>"),
            PortError::Backend { status: 500, message: None }
        ));
        assert!(matches!(backend_error(401, ""), PortError::Unauthorized));
    }

    #[test]
    fn mcq_request_uses_camel_case() {
        let options = FlashcardOptions::default();
        let body = serde_json::to_value(McqRequest {
            session_id: Uuid::nil(),
            query: None,
            num_questions: options.num_questions,
            num_options: options.num_options,
            difficulty: options.difficulty,
        })
        .unwrap();
        assert_eq!(body["numQuestions"], 5);
        assert_eq!(body["difficulty"], "medium");
        assert!(body.get("query").is_none());
    }
}
