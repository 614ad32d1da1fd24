//! Completion signal for injected code.
//!
//! The output frame posts a `{ results: { code, errors } }` message to the
//! page once it has evaluated the editor contents. A listener installed in the
//! page forwards every message to a binding; this module bridges that binding's
//! event stream into a single-use future that resolves with the reported
//! errors of the first message whose `code` matches the injected source.
//! Messages for any other code are stale and ignored.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::request::PipelineError;
use crate::target::{CompletionMessage, LiveEditorError};

/// Awaitable completion of one injected program.
///
/// Consumed by [`CompletionSignal::wait`], so it can only be observed once.
pub struct CompletionSignal {
    rx: oneshot::Receiver<Vec<LiveEditorError>>,
    bridge: JoinHandle<()>,
}

impl CompletionSignal {
    /// Start watching `events` for the completion of `code`.
    pub fn watch(mut events: BoxStream<'static, String>, code: String) -> Self {
        let (tx, rx) = oneshot::channel();

        let bridge = tokio::spawn(async move {
            while let Some(payload) = events.next().await {
                match parse_completion(&payload, &code) {
                    Completion::Matched(errors) => {
                        let _ = tx.send(errors);
                        return;
                    }
                    Completion::Stale => debug!("Ignoring completion for different code"),
                    Completion::NotCompletion => {
                        debug!(len = payload.len(), "Ignoring unrelated page message");
                    }
                }
            }
            debug!("Completion event stream ended");
        });

        Self { rx, bridge }
    }

    /// Wait for the matching completion, bounded by `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<Vec<LiveEditorError>, PipelineError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(errors)) => Ok(errors),
            Ok(Err(_)) => Err(PipelineError::CompletionClosed),
            Err(_) => Err(PipelineError::Timeout(timeout)),
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

#[derive(Debug, PartialEq)]
enum Completion {
    Matched(Vec<LiveEditorError>),
    Stale,
    NotCompletion,
}

fn parse_completion(payload: &str, code: &str) -> Completion {
    let Ok(message) = serde_json::from_str::<CompletionMessage>(payload) else {
        return Completion::NotCompletion;
    };
    match message.results.code {
        Some(reported) if reported == code => Completion::Matched(message.results.errors),
        Some(_) => Completion::Stale,
        None => Completion::NotCompletion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use serde_json::json;

    fn message(code: &str, errors: serde_json::Value) -> String {
        json!({ "results": { "code": code, "errors": errors } }).to_string()
    }

    #[test]
    fn parse_matches_exact_code() {
        let payload = message("rect(0, 0, 10, 10);", json!([]));
        assert_eq!(
            parse_completion(&payload, "rect(0, 0, 10, 10);"),
            Completion::Matched(Vec::new())
        );
        assert_eq!(parse_completion(&payload, "rect(0, 0, 10, 11);"), Completion::Stale);
        assert_eq!(parse_completion("not json", "x"), Completion::NotCompletion);
        assert_eq!(
            parse_completion(r#"{"results": {}}"#, "x"),
            Completion::NotCompletion
        );
    }

    #[test]
    fn unexpected_error_metadata_still_matches() {
        let payload = message(
            "foo(",
            json!([{
                "type": 3,
                "row": "0",
                "column": 4.5,
                "priority": "high",
                "source": { "kind": "parser" },
                "text": "Unexpected end of input"
            }]),
        );

        assert_eq!(
            parse_completion(&payload, "foo("),
            Completion::Matched(vec![LiveEditorError {
                text: Some("Unexpected end of input".into()),
                infinite_loop_node_type: None,
            }])
        );
    }

    #[tokio::test]
    async fn stale_completion_does_not_unblock() {
        let (tx, rx) = mpsc::unbounded();
        let signal = CompletionSignal::watch(rx.boxed(), "ellipse(1, 1, 1, 1);".into());

        tx.unbounded_send(message("old code", json!([{ "text": "stale" }])))
            .unwrap();
        tx.unbounded_send("{\"somethingElse\": true}".into()).unwrap();

        let result = signal.wait(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PipelineError::Timeout(_))));
    }

    #[tokio::test]
    async fn resolves_with_matching_errors_after_stale_event() {
        let (tx, rx) = mpsc::unbounded();
        let signal = CompletionSignal::watch(rx.boxed(), "foo(".into());

        tx.unbounded_send(message("bar", json!([]))).unwrap();
        tx.unbounded_send(message("foo(", json!([{ "text": "Unexpected end of input" }])))
            .unwrap();

        let errors = signal.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text.as_deref(), Some("Unexpected end of input"));
    }

    #[tokio::test]
    async fn closed_stream_is_reported() {
        let (tx, rx) = mpsc::unbounded::<String>();
        let signal = CompletionSignal::watch(rx.boxed(), "x".into());
        drop(tx);

        let result = signal.wait(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(PipelineError::CompletionClosed)));
    }
}
