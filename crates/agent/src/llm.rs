use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempra_core::{ChatMessage, GatewayError};

/// Which configured model a request should run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelHint {
    /// Short classification calls.
    Fast,
    /// Extraction, planning and tool selection.
    Capable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: ModelHint,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, model: ModelHint::Capable, max_tokens: 400, temperature: 0.2 }
    }

    /// Deterministic, few-token request for label outputs.
    pub fn classification(messages: Vec<ChatMessage>) -> Self {
        Self { messages, model: ModelHint::Fast, max_tokens: 8, temperature: 0.0 }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError>;
}

/// Runs one completion under `timeout`. Blank output counts as a failure.
pub async fn complete_within(
    gateway: &dyn CompletionGateway,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<String, GatewayError> {
    match tokio::time::timeout(timeout, gateway.complete(request)).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(GatewayError::EmptyResponse),
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout { after_secs: timeout.as_secs() }),
    }
}

/// Gateway that replays queued replies in order and records every request.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    replies: Arc<Mutex<VecDeque<Result<String, GatewayError>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedGateway {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gateway = Self::default();
        for reply in replies {
            gateway.push_reply(reply);
        }
        gateway
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.push(Ok(reply.into()));
    }

    pub fn push_error(&self, error: GatewayError) {
        self.push(Err(error));
    }

    fn push(&self, reply: Result<String, GatewayError>) {
        match self.replies.lock() {
            Ok(mut replies) => replies.push_back(reply),
            Err(poisoned) => poisoned.into_inner().push_back(reply),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests().len()
    }

    pub fn remaining(&self) -> usize {
        match self.replies.lock() {
            Ok(replies) => replies.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }

        let next = match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or(Err(GatewayError::EmptyResponse))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tempra_core::{ChatMessage, GatewayError};

    use super::{
        complete_within, CompletionGateway, CompletionRequest, ModelHint, ScriptedGateway,
    };

    struct SlowGateway;

    #[async_trait]
    impl CompletionGateway for SlowGateway {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, GatewayError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("late".to_owned())
        }
    }

    #[tokio::test]
    async fn scripted_gateway_replays_in_order_and_records_requests() {
        let gateway = ScriptedGateway::new(["first", "second"]);
        let request = CompletionRequest::classification(vec![ChatMessage::user("hi")]);

        assert_eq!(gateway.complete(request.clone()).await, Ok("first".to_owned()));
        assert_eq!(gateway.complete(request.clone()).await, Ok("second".to_owned()));
        assert_eq!(gateway.complete(request).await, Err(GatewayError::EmptyResponse));
        assert_eq!(gateway.call_count(), 3);
        assert_eq!(gateway.requests()[0].model, ModelHint::Fast);
    }

    #[tokio::test]
    async fn blank_output_is_an_empty_response() {
        let gateway = ScriptedGateway::new(["   \n"]);
        let result = complete_within(
            &gateway,
            CompletionRequest::new(vec![ChatMessage::user("hi")]),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result, Err(GatewayError::EmptyResponse));
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let result = complete_within(
            &SlowGateway,
            CompletionRequest::new(vec![ChatMessage::user("hi")]),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }
}
