//! Client for the workspace chat API of the model backend

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::stream::{body_lines, error_field, fragments};
use super::{ConversationSession, Message};
use crate::config::LlmConfig;
use crate::persona::PersonaCatalog;
use crate::speech::SpeechService;
use crate::{Error, Result};

/// Body of a workspace chat request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(rename = "workspaceId")]
    workspace_id: &'a str,
    mode: &'static str,
    stream: bool,
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
}

/// A workspace known to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceList {
    #[serde(default)]
    workspaces: Vec<Workspace>,
}

type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Reply to a chat message
pub enum ChatReply {
    /// The whole reply, already recorded in history
    Complete(String),
    /// Fragments still arriving from the backend
    Stream(ChatStream),
}

impl ChatReply {
    /// Wait for the full reply text
    ///
    /// # Errors
    ///
    /// Any error raised while the reply streams in
    pub async fn collect(self) -> Result<String> {
        match self {
            Self::Complete(text) => Ok(text),
            Self::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(fragment) = stream.next().await {
                    text.push_str(&fragment?);
                }
                Ok(text)
            }
        }
    }
}

/// Incremental reply fragments
///
/// Holds the conversation lock until it ends. Once exhausted the
/// concatenated reply is appended to history exactly once. An error or an
/// early drop discards the partial reply.
pub struct ChatStream {
    fragments: FragmentStream,
    session: Option<OwnedMutexGuard<ConversationSession>>,
    text: String,
    speech: Option<Arc<SpeechService>>,
}

impl ChatStream {
    fn new(
        fragments: FragmentStream,
        session: OwnedMutexGuard<ConversationSession>,
        speech: Option<Arc<SpeechService>>,
    ) -> Self {
        Self {
            fragments,
            session: Some(session),
            text: String::new(),
            speech,
        }
    }

    fn complete(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if self.text.is_empty() {
            tracing::debug!("stream ended without reply text");
            return;
        }

        let text = std::mem::take(&mut self.text);
        session.append_assistant(text.clone());
        drop(session);
        tracing::debug!(chars = text.len(), "streamed reply complete");

        if let Some(speech) = &self.speech {
            speech.speak_async(text, None, None);
        }
    }
}

impl Stream for ChatStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.session.is_none() {
            return Poll::Ready(None);
        }

        match this.fragments.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                this.text.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, partial_chars = this.text.len(), "reply stream failed");
                this.session = None;
                this.text.clear();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
        }
    }
}

/// Sends user messages to the model backend and records the conversation
pub struct ChatGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    workspace: String,
    default_stream: bool,
    idle_timeout: Duration,
    session: Arc<Mutex<ConversationSession>>,
    catalog: Option<Arc<PersonaCatalog>>,
    speech: Option<Arc<SpeechService>>,
}

impl ChatGateway {
    /// Create a gateway from configuration
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .as_ref()
                .map(|k| SecretString::from(k.expose_secret().to_string())),
            workspace: config.workspace.clone(),
            default_stream: config.stream,
            idle_timeout: config.stream_timeout,
            session: Arc::new(Mutex::new(ConversationSession::new())),
            catalog: None,
            speech: None,
        }
    }

    /// Send the active persona's system prompt with every request
    #[must_use]
    pub fn with_personas(mut self, catalog: Arc<PersonaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Speak replies from `send_and_speak` through `speech`
    #[must_use]
    pub fn with_speech(mut self, speech: Arc<SpeechService>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Whether replies stream unless the caller says otherwise
    #[must_use]
    pub const fn streams_by_default(&self) -> bool {
        self.default_stream
    }

    /// Workspace slug requests are sent to
    #[must_use]
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Send `message` and return the reply
    ///
    /// The user message is recorded before the request goes out, whatever
    /// its outcome. The assistant reply is recorded only once it is complete.
    ///
    /// # Errors
    ///
    /// `EmptyInput` for blank messages, `RemoteUnavailable` when the backend
    /// can't be reached, `RemoteProtocol` for error statuses or malformed
    /// payloads, `RemoteTimeout` when the backend goes quiet
    pub async fn send(&self, message: &str, streaming: bool) -> Result<ChatReply> {
        self.exchange(message, streaming, None).await
    }

    /// Send `message` and speak the completed reply in the background
    ///
    /// Speech problems never affect the returned reply.
    ///
    /// # Errors
    ///
    /// As [`ChatGateway::send`]
    pub async fn send_and_speak(&self, message: &str, streaming: bool) -> Result<ChatReply> {
        self.exchange(message, streaming, self.speech.clone()).await
    }

    async fn exchange(
        &self,
        message: &str,
        streaming: bool,
        speech: Option<Arc<SpeechService>>,
    ) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut session = self.session.clone().lock_owned().await;
        session.append_user(message);

        let url = self.chat_url();
        let body = ChatRequest {
            message,
            workspace_id: &self.workspace,
            mode: "chat",
            stream: streaming,
            system_prompt: self.system_prompt(),
        };
        tracing::debug!(url = %url, streaming, chars = message.len(), "sending chat message");

        let response = self.dispatch(self.authorized(self.client.post(&url)).json(&body), &url).await?;
        let status = response.status();
        if !status.is_success() {
            let body = self.read_body(response, &url).await.unwrap_or_default();
            return Err(log_status(&url, status, &body));
        }

        if streaming {
            let lines = body_lines(response.bytes_stream(), self.idle_timeout);
            return Ok(ChatReply::Stream(ChatStream::new(
                Box::pin(fragments(lines)),
                session,
                speech,
            )));
        }

        let body = self.read_body(response, &url).await?;
        let text = parse_complete(status.as_u16(), &body).inspect_err(|e| {
            tracing::error!(url = %url, error = %e, "unusable chat response");
        })?;

        if !text.is_empty() {
            session.append_assistant(text.clone());
        }
        drop(session);
        tracing::debug!(chars = text.len(), "reply complete");

        if let Some(speech) = speech {
            speech.speak_async(text.clone(), None, None);
        }
        Ok(ChatReply::Complete(text))
    }

    /// Copy of the conversation so far
    pub async fn history(&self) -> Vec<Message> {
        self.session.lock().await.snapshot()
    }

    /// Forget the conversation
    pub async fn clear_history(&self) {
        self.session.lock().await.clear();
        tracing::info!("conversation history cleared");
    }

    /// Workspaces visible to the configured key
    ///
    /// # Errors
    ///
    /// Same transport and protocol errors as [`ChatGateway::send`]
    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let url = self.workspaces_url();
        let response = self.dispatch(self.authorized(self.client.get(&url)), &url).await?;
        let status = response.status();
        let body = self.read_body(response, &url).await?;
        if !status.is_success() {
            return Err(log_status(&url, status, &body));
        }

        let list: WorkspaceList = serde_json::from_str(&body)
            .map_err(|e| Error::protocol(Some(status.as_u16()), &format!("bad workspace list: {e}")))?;
        Ok(list.workspaces)
    }

    /// Whether the backend accepts the configured key
    ///
    /// # Errors
    ///
    /// Transport errors, or a status other than success, 401 or 403
    pub async fn check_auth(&self) -> Result<bool> {
        let url = self.workspaces_url();
        let response = self.dispatch(self.authorized(self.client.get(&url)), &url).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(true);
        }
        if matches!(status.as_u16(), 401 | 403) {
            tracing::warn!(url = %url, status = %status, "backend rejected API key");
            return Ok(false);
        }
        let body = self.read_body(response, &url).await.unwrap_or_default();
        Err(log_status(&url, status, &body))
    }

    fn chat_url(&self) -> String {
        format!("{}/workspace/{}/chat", self.base_url, self.workspace)
    }

    fn workspaces_url(&self) -> String {
        format!("{}/workspaces", self.base_url)
    }

    fn system_prompt(&self) -> Option<String> {
        let prompt = self.catalog.as_ref()?.active().system_prompt;
        (!prompt.trim().is_empty()).then_some(prompt)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    async fn dispatch(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
        match tokio::time::timeout(self.idle_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => {
                tracing::error!(url, error = %e, "model backend timed out");
                Err(Error::RemoteTimeout(self.idle_timeout.as_secs()))
            }
            Ok(Err(e)) => {
                tracing::error!(url, error = %e, "model backend unreachable");
                Err(Error::RemoteUnavailable(e.to_string()))
            }
            Err(_) => {
                tracing::error!(url, timeout_secs = self.idle_timeout.as_secs(), "model backend timed out");
                Err(Error::RemoteTimeout(self.idle_timeout.as_secs()))
            }
        }
    }

    async fn read_body(&self, response: reqwest::Response, url: &str) -> Result<String> {
        match tokio::time::timeout(self.idle_timeout, response.text()).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => {
                tracing::error!(url, error = %e, "failed reading response body");
                Err(Error::RemoteUnavailable(e.to_string()))
            }
            Err(_) => Err(Error::RemoteTimeout(self.idle_timeout.as_secs())),
        }
    }
}

fn log_status(url: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let err = Error::protocol(Some(status.as_u16()), body);
    if let Error::RemoteProtocol { detail, .. } = &err {
        tracing::error!(url, status = %status, body = %detail, "model backend returned error status");
    }
    err
}

/// Extract the reply from a non-streaming response body
fn parse_complete(status: u16, body: &str) -> Result<String> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) else {
        return Err(Error::protocol(Some(status), body));
    };
    if let Some(error) = error_field(&object) {
        return Err(Error::protocol(Some(status), &error));
    }
    object
        .get("textResponse")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| Error::protocol(Some(status), "response has no textResponse"))
}
