//! A scripted LLM client for tests and offline runs.
//!
//! Rules match on a prompt substring and answer every matching call; any
//! other call takes the next queued reply. When neither applies the call
//! fails with [`LlmError::Exhausted`].

use async_trait::async_trait;
use kenning_core::error::LlmError;
use kenning_core::llm::{LlmClient, LlmRequest, LlmResponse};
use std::collections::VecDeque;
use std::sync::Mutex;

type Reply = Result<String, LlmError>;

pub struct ScriptedClient {
    rules: Mutex<Vec<(String, Reply)>>,
    queue: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client that answers calls in order with the given texts.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for r in responses {
            client.push(r);
        }
        client
    }

    /// Queue a reply for the next unmatched call.
    pub fn push(&self, content: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Ok(content.into()));
        }
    }

    /// Queue a failure for the next unmatched call.
    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Err(error));
        }
    }

    /// Answer every call whose prompt contains `needle`.
    pub fn respond_when(self, needle: impl Into<String>, content: impl Into<String>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push((needle.into(), Ok(content.into())));
        }
        self
    }

    /// Fail every call whose prompt contains `needle`.
    pub fn fail_when(self, needle: impl Into<String>, error: LlmError) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push((needle.into(), Err(error)));
        }
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Every request received, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self, prompt: &str) -> Option<Reply> {
        if let Ok(rules) = self.rules.lock()
            && let Some((_, reply)) = rules.iter().find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return Some(reply.clone());
        }
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn call(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let call = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| LlmError::NotConfigured("scripted client poisoned".into()))?;
            requests.push(request.clone());
            requests.len()
        };

        match self.next_reply(&request.prompt) {
            Some(Ok(content)) => Ok(LlmResponse {
                tokens_used: (content.len() / 4) as u32,
                content,
                model: format!("scripted-{}", request.tier.as_str()),
            }),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::Exhausted { call }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_core::llm::ModelTier;

    #[tokio::test]
    async fn replies_in_order_then_exhausts() {
        let client = ScriptedClient::with_responses(["one", "two"]);
        let first = client.call(LlmRequest::new(ModelTier::Small, "a")).await.unwrap();
        let second = client.call(LlmRequest::new(ModelTier::Small, "b")).await.unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");

        let err = client.call(LlmRequest::new(ModelTier::Small, "c")).await.unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { call: 3 }));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn rules_take_precedence_and_repeat() {
        let client = ScriptedClient::with_responses(["queued"]).respond_when("contradiction", "{\"ok\": true}");
        for _ in 0..2 {
            let r = client
                .call(LlmRequest::new(ModelTier::Medium, "check contradiction please"))
                .await
                .unwrap();
            assert_eq!(r.content, "{\"ok\": true}");
        }
        let r = client.call(LlmRequest::new(ModelTier::Medium, "other")).await.unwrap();
        assert_eq!(r.content, "queued");
        assert_eq!(r.model, "scripted-medium");
    }

    #[tokio::test]
    async fn scripted_errors() {
        let client = ScriptedClient::new().fail_when("boom", LlmError::Timeout("slow".into()));
        client.push_error(LlmError::RateLimited { retry_after_secs: 1 });

        let err = client.call(LlmRequest::new(ModelTier::Large, "boom")).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
        let err = client.call(LlmRequest::new(ModelTier::Large, "x")).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert_eq!(client.requests()[0].prompt, "boom");
    }
}
