//! Connectivity checks against the chat-completions API, independent of any
//! documents.

use crate::error::LlmError;
use crate::llm::ChatRequest;
use crate::models::Usage;
use crate::traits::ChatModel;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const CONNECTION_TEST_PROMPT: &str =
    "Hello, just testing API connection. Please reply with 'API is working!'";
pub const CONNECTION_TEST_MAX_TOKENS: u32 = 50;
pub const QUESTION_MAX_TOKENS: u32 = 200;
pub const QUICK_CHECK_MAX_TOKENS: u32 = 10;

#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub model: String,
    pub reply: String,
    pub usage: Option<Usage>,
    pub elapsed: Duration,
}

async fn run<M: ChatModel + ?Sized>(
    model: &M,
    request: ChatRequest,
) -> Result<ConnectionReport, LlmError> {
    let started = Instant::now();
    let completion = model.complete(&request).await?;
    Ok(ConnectionReport {
        model: completion
            .model
            .unwrap_or_else(|| model.model_name().to_string()),
        reply: completion.content,
        usage: completion.usage,
        elapsed: started.elapsed(),
    })
}

/// Sends a short fixed prompt and returns the reply with token usage.
pub async fn test_connection<M: ChatModel + ?Sized>(
    model: &M,
) -> Result<ConnectionReport, LlmError> {
    let report = run(
        model,
        ChatRequest::user(CONNECTION_TEST_PROMPT).with_max_tokens(CONNECTION_TEST_MAX_TOKENS),
    )
    .await?;
    info!(
        model = %report.model,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "connection test passed"
    );
    Ok(report)
}

pub async fn ask_question<M: ChatModel + ?Sized>(
    model: &M,
    question: &str,
    max_tokens: u32,
) -> Result<ConnectionReport, LlmError> {
    run(model, ChatRequest::user(question).with_max_tokens(max_tokens)).await
}

/// Minimal request; only reports whether the API answered.
pub async fn quick_check<M: ChatModel + ?Sized>(model: &M) -> Result<(), LlmError> {
    match run(model, ChatRequest::user("Hi").with_max_tokens(QUICK_CHECK_MAX_TOKENS)).await {
        Ok(_) => Ok(()),
        Err(error) => {
            warn!(%error, "quick check failed");
            Err(error)
        }
    }
}

pub fn format_usage(usage: &Usage) -> String {
    let field = |value: Option<u64>| {
        value.map_or_else(|| "N/A".to_string(), |count| count.to_string())
    };
    format!(
        "prompt tokens: {}\ncompletion tokens: {}\ntotal tokens: {}",
        field(usage.prompt_tokens),
        field(usage.completion_tokens),
        field(usage.total_tokens)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatCompletion;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoModel {
        fail: bool,
        last_max_tokens: Mutex<Option<u32>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
            *self.last_max_tokens.lock().unwrap() = request.max_tokens;
            if self.fail {
                return Err(LlmError::Timeout(15));
            }
            Ok(ChatCompletion {
                content: format!("echo: {}", request.messages[0].content),
                model: None,
                usage: None,
            })
        }
    }

    fn echo(fail: bool) -> EchoModel {
        EchoModel {
            fail,
            last_max_tokens: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn connection_test_uses_fixed_prompt_and_budget() {
        let model = echo(false);
        let report = test_connection(&model).await.unwrap();

        assert_eq!(report.model, "echo");
        assert_eq!(report.reply, format!("echo: {CONNECTION_TEST_PROMPT}"));
        assert_eq!(*model.last_max_tokens.lock().unwrap(), Some(CONNECTION_TEST_MAX_TOKENS));
    }

    #[tokio::test]
    async fn question_is_forwarded() {
        let model = echo(false);
        let report = ask_question(&model, "What is AI?", QUESTION_MAX_TOKENS).await.unwrap();
        assert_eq!(report.reply, "echo: What is AI?");
        assert_eq!(*model.last_max_tokens.lock().unwrap(), Some(QUESTION_MAX_TOKENS));
    }

    #[tokio::test]
    async fn quick_check_surfaces_the_failure_kind() {
        assert!(quick_check(&echo(false)).await.is_ok());
        assert!(matches!(quick_check(&echo(true)).await, Err(LlmError::Timeout(15))));
    }

    #[test]
    fn usage_prints_missing_counts_as_na() {
        let usage = Usage {
            prompt_tokens: Some(9),
            completion_tokens: None,
            total_tokens: Some(9),
        };
        assert_eq!(
            format_usage(&usage),
            "prompt tokens: 9\ncompletion tokens: N/A\ntotal tokens: 9"
        );
    }
}
