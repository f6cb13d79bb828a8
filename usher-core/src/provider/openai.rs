//! OpenAI HTTP implementation of the provider trait.
//!
//! Talks to both API families: `/v1/threads` (thread/run protocol, behind
//! the `assistants=v2` beta gate) and `/v1/responses` (response chaining).
//! Wire shapes stay private to this module; the trait surface exposes only
//! the neutral types from the parent module.

use super::{
    MessageInput, Provider, ProviderError, ResponseInput, ResponseRequest, ResponseUnit, Run,
    RunStatus, ThreadMessage,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Generous per-request timeout; response-chaining calls block for the
/// whole generation.
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Client for the OpenAI Assistants (v2) and Responses APIs.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        // The thread endpoints sit behind this beta gate; the responses
        // endpoint ignores it.
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::new(operation, format!("request failed: {e}")))?;
        Self::decode(operation, response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::new(operation, format!("request failed: {e}")))?;
        Self::decode(operation, response).await
    }

    /// POST for endpoints whose response body we do not need.
    async fn post_discard(
        &self,
        operation: &'static str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::new(operation, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::with_status(
                operation,
                format!("API error: {text}"),
                status.as_u16(),
            ));
        }
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::with_status(
                operation,
                format!("API error: {text}"),
                status.as_u16(),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::new(operation, format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl Provider for OpenAiClient {
    async fn create_thread(&self) -> Result<String, ProviderError> {
        let thread: ThreadObject = self
            .post_json("create_thread", "/v1/threads", &json!({}))
            .await?;
        Ok(thread.id)
    }

    async fn list_runs(&self, thread_id: &str) -> Result<Vec<Run>, ProviderError> {
        let list: ListEnvelope<RunObject> = self
            .get_json("list_runs", &format!("/v1/threads/{thread_id}/runs"))
            .await?;
        Ok(list.data.into_iter().map(RunObject::into_run).collect())
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ProviderError> {
        let run: RunObject = self
            .get_json(
                "retrieve_run",
                &format!("/v1/threads/{thread_id}/runs/{run_id}"),
            )
            .await?;
        Ok(run.into_run())
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ProviderError> {
        self.post_discard(
            "cancel_run",
            &format!("/v1/threads/{thread_id}/runs/{run_id}/cancel"),
            &json!({}),
        )
        .await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        input: &MessageInput,
    ) -> Result<(), ProviderError> {
        self.post_discard(
            "create_message",
            &format!("/v1/threads/{thread_id}/messages"),
            &message_body(input),
        )
        .await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<Run, ProviderError> {
        let run: RunObject = self
            .post_json(
                "create_run",
                &format!("/v1/threads/{thread_id}/runs"),
                &json!({ "assistant_id": assistant_id }),
            )
            .await?;
        Ok(run.into_run())
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>, ProviderError> {
        let list: ListEnvelope<MessageObject> = self
            .get_json(
                "list_messages",
                &format!("/v1/threads/{thread_id}/messages?limit={limit}"),
            )
            .await?;
        Ok(list.data.into_iter().map(MessageObject::into_message).collect())
    }

    async fn create_response(
        &self,
        request: &ResponseRequest,
    ) -> Result<ResponseUnit, ProviderError> {
        let response: ResponseObject = self
            .post_json("create_response", "/v1/responses", &response_body(request))
            .await?;
        Ok(response.into_unit())
    }

    async fn retrieve_response(&self, response_id: &str) -> Result<ResponseUnit, ProviderError> {
        let response: ResponseObject = self
            .get_json("retrieve_response", &format!("/v1/responses/{response_id}"))
            .await?;
        Ok(response.into_unit())
    }

    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ProviderError> {
        let url = format!("{}/v1/files", self.base_url);
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::new("upload_file", format!("request failed: {e}")))?;

        let file: FileObject = Self::decode("upload_file", response).await?;
        Ok(file.id)
    }
}

// ============================================================================
// Request Bodies
// ============================================================================

fn message_body(input: &MessageInput) -> serde_json::Value {
    match input {
        MessageInput::Text(text) => json!({
            "role": "user",
            "content": [{ "type": "text", "text": text }],
        }),
        MessageInput::Image { prompt, file_id } => json!({
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_file", "image_file": { "file_id": file_id } },
            ],
        }),
        MessageInput::Document { prompt, file_id } => json!({
            "role": "user",
            "content": [{ "type": "text", "text": prompt }],
            "attachments": [{
                "file_id": file_id,
                "tools": [{ "type": "code_interpreter" }],
            }],
        }),
    }
}

fn response_body(request: &ResponseRequest) -> serde_json::Value {
    let user_content = match &request.input {
        ResponseInput::Text(text) => json!(text),
        ResponseInput::Image { prompt, data_url } => json!([
            { "type": "input_text", "text": prompt },
            { "type": "input_image", "image_url": data_url },
        ]),
        ResponseInput::File { prompt, file_id } => json!([
            { "type": "input_text", "text": prompt },
            { "type": "input_file", "file_id": file_id },
        ]),
    };

    let mut body = json!({
        "model": request.model,
        "input": [
            { "role": "system", "content": request.instructions },
            { "role": "user", "content": user_content },
        ],
    });

    if let Some(previous) = &request.previous_response_id {
        body["previous_response_id"] = json!(previous);
    }

    body
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl ErrorInfo {
    fn describe(self) -> String {
        match self.code {
            Some(code) => format!("{}: {}", code, self.message),
            None => self.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    last_error: Option<ErrorInfo>,
}

impl RunObject {
    fn into_run(self) -> Run {
        Run {
            id: self.id,
            status: self.status,
            error_detail: self.last_error.map(ErrorInfo::describe),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    id: String,
    role: String,
    #[serde(default)]
    content: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessagePart {
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

impl MessageObject {
    fn into_message(self) -> ThreadMessage {
        let text_parts = self
            .content
            .into_iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.value),
                MessagePart::Other => None,
            })
            .collect();

        ThreadMessage {
            id: self.id,
            role: self.role,
            text_parts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseObject {
    id: String,
    status: String,
    #[serde(default)]
    error: Option<ErrorInfo>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    input: Vec<InputItem>,
    #[serde(default)]
    previous_response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputPart {
    OutputText { text: String },
    #[serde(other)]
    Other,
}

/// Input items are loosely shaped: message dicts carry `role`/`content`,
/// tool items carry neither.
#[derive(Debug, Deserialize)]
struct InputItem {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<InputContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputContent {
    Text(String),
    Parts(Vec<InputPart>),
}

#[derive(Debug, Deserialize)]
struct InputPart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponseObject {
    fn into_unit(self) -> ResponseUnit {
        let mut output_texts = Vec::new();
        for item in self.output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    if let OutputPart::OutputText { text } = part {
                        output_texts.push(text);
                    }
                }
            }
        }

        ResponseUnit {
            id: self.id,
            status: self.status,
            error_detail: self.error.map(ErrorInfo::describe),
            input_texts: input_texts(self.input),
            output_texts,
            previous_response_id: self.previous_response_id,
        }
    }
}

/// One string per recorded user input item. Part lists keep only their
/// `input_text` segments, joined with spaces.
fn input_texts(items: Vec<InputItem>) -> Vec<String> {
    let mut texts = Vec::new();
    for item in items {
        if item.role.as_deref() != Some("user") {
            continue;
        }
        match item.content {
            Some(InputContent::Text(text)) => texts.push(text),
            Some(InputContent::Parts(parts)) => {
                let segments: Vec<String> = parts
                    .into_iter()
                    .filter(|p| p.kind == "input_text")
                    .map(|p| p.text)
                    .collect();
                if !segments.is_empty() {
                    texts.push(segments.join(" "));
                }
            }
            None => {}
        }
    }
    texts
}
