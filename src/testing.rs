//! Test doubles shared by unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::channels::{SendRequest, SendResponse, Transport};
use crate::error::{ChannelError, EmbeddingError, LlmError};
use crate::llm::{CompletionRequest, CompletionResponse, EmbeddingProvider, LlmProvider};
use crate::pipeline::types::Message;

type Responder = Box<dyn Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync>;

/// LLM whose answer is computed from the request and the 1-based call number.
pub struct MockLlm {
    responder: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlm {
    pub fn new(
        responder: impl Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Fails every call with a `RequestFailed` carrying `reason`.
    pub fn failing(reason: &str) -> Self {
        let reason = reason.to_string();
        Self::new(move |_, _| Err(request_failed(&reason)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn request_failed(reason: &str) -> LlmError {
    LlmError::RequestFailed {
        provider: "mock".into(),
        reason: reason.into(),
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        let content = (self.responder)(&request, n)?;
        Ok(CompletionResponse { content })
    }
}

/// Transport that records every send. Destinations in `failing` error out.
pub struct RecordingTransport {
    identity: String,
    failing: HashSet<String>,
    sent: Mutex<Vec<SendRequest>>,
    counter: AtomicUsize,
}

impl RecordingTransport {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            failing: HashSet::new(),
            sent: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn failing_for(mut self, destination: &str) -> Self {
        self.failing.insert(destination.to_string());
        self
    }

    /// Successful sends, in order.
    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<SendRequest> {
        self.sent()
            .into_iter()
            .filter(|r| r.to == destination)
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ChannelError> {
        if self.failing.contains(&request.to) {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: format!("{} is unreachable", request.to),
            });
        }
        self.sent.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SendResponse {
            message_id: Some(format!("sent-{n}")),
            status: "sent".into(),
        })
    }

    async fn self_identity(&self) -> Result<String, ChannelError> {
        Ok(self.identity.clone())
    }
}

/// Embedder that records every batch. Each vector is `[text length, 1.0]`.
#[derive(Default)]
pub struct RecordingEmbedder {
    failing: bool,
    batches: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingEmbedder {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// `(model, texts)` for every call, in order.
    pub fn batches(&self) -> Vec<(String, Vec<String>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    async fn embed(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f64>>, EmbeddingError> {
        self.batches
            .lock()
            .unwrap()
            .push((model.to_string(), texts.clone()));
        if self.failing {
            return Err(EmbeddingError::RequestFailed {
                provider: "recording".into(),
                reason: "quota exceeded".into(),
            });
        }
        Ok(texts
            .iter()
            .map(|t| vec![t.chars().count() as f64, 1.0])
            .collect())
    }
}

/// A text message in a group chat.
pub fn group_message(id: &str, group: &str, sender: &str, text: &str, at: DateTime<Utc>) -> Message {
    Message {
        message_id: id.into(),
        chat_jid: group.into(),
        sender_jid: sender.into(),
        text: Some(text.into()),
        timestamp: at,
        group_jid: Some(group.into()),
        reply_to_id: None,
    }
}
