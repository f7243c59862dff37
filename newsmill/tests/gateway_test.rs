mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use newsmill::llm::prompts::{FilterVerdict, ScoreVerdict, Synthesis};
use newsmill::llm::{GatewayError, LlmGateway};
use support::SequenceProvider;

#[tokio::test]
async fn test_malformed_output_is_retried_until_it_parses() {
    let provider = Arc::new(SequenceProvider::new(vec![
        Ok("Sure, here is my answer: yes"),
        Ok("{\"useful\": \"yes\""),
        Ok("```json\n{\"useful\": \"yes\", \"reason\": \"moving story\"}\n```"),
    ]));
    let calls = provider.calls.clone();
    let gateway = LlmGateway::new(provider, CancellationToken::new());

    let verdict: FilterVerdict = gateway.invoke("prompt").await.expect("third reply parses");

    assert!(verdict.is_useful());
    assert_eq!(verdict.reason_text(), "moving story");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_required_fields_count_as_malformed() {
    let provider = Arc::new(SequenceProvider::new(vec![
        Ok(r#"{"title": "only a title"}"#),
        Ok(r#"{"title": "T", "summary": "S", "themes": "duty"}"#),
    ]));
    let calls = provider.calls.clone();
    let gateway = LlmGateway::new(provider, CancellationToken::new());

    let synthesis: Synthesis = gateway.invoke("prompt").await.unwrap();

    assert_eq!(synthesis.title, "T");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_provider_errors_are_not_retried() {
    let provider = Arc::new(SequenceProvider::new(vec![
        Err("LLM API error 401 Unauthorized: bad key"),
        Ok(r#"{"useful": "yes"}"#),
    ]));
    let calls = provider.calls.clone();
    let gateway = LlmGateway::new(provider, CancellationToken::new());

    let result = gateway.invoke::<FilterVerdict>("prompt").await;

    match result {
        Err(GatewayError::Provider(e)) => assert!(e.to_string().contains("401")),
        other => panic!("expected provider error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_ends_an_endless_retry() {
    let cancel = CancellationToken::new();
    let hook_cancel = cancel.clone();

    let mut provider = SequenceProvider::new(vec![Ok("never json")]);
    provider.on_call = Some(Box::new(move |n| {
        if n == 25 {
            hook_cancel.cancel();
        }
    }));
    let provider = Arc::new(provider);
    let calls = provider.calls.clone();
    let gateway = LlmGateway::new(provider, cancel);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        gateway.invoke::<FilterVerdict>("prompt"),
    )
    .await
    .expect("gateway must observe cancellation");

    assert!(matches!(result, Err(GatewayError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 25);
}

#[tokio::test]
async fn test_cancelled_gateway_makes_no_call() {
    let provider = Arc::new(SequenceProvider::new(vec![Ok("text")]));
    let calls = provider.calls.clone();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let gateway = LlmGateway::new(provider, cancel);

    assert!(matches!(
        gateway.invoke_text("prompt").await,
        Err(GatewayError::Cancelled)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_parse_retry_cap_reports_malformed() {
    let provider = Arc::new(SequenceProvider::new(vec![Ok("no json here")]));
    let calls = provider.calls.clone();
    let gateway =
        LlmGateway::new(provider, CancellationToken::new()).with_max_parse_retries(Some(2));

    let result = gateway.invoke::<FilterVerdict>("prompt").await;

    assert!(matches!(result, Err(GatewayError::Malformed { attempts: 3 })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_free_text_is_trimmed_and_not_parsed() {
    let provider = Arc::new(SequenceProvider::new(vec![Ok("  A paragraph without JSON.\n\n")]));
    let gateway = LlmGateway::new(provider, CancellationToken::new());

    let text = gateway.invoke_text("prompt").await.unwrap();
    assert_eq!(text, "A paragraph without JSON.");
}

#[tokio::test]
async fn test_list_valued_reason_parses_on_first_reply() {
    let provider = Arc::new(SequenceProvider::new(vec![Ok(
        r#"{"is_ok": "no", "reason": ["vague claim", "flat language"]}"#,
    )]));
    let calls = provider.calls.clone();
    let gateway = LlmGateway::new(provider, CancellationToken::new());

    let verdict = tokio::time::timeout(
        Duration::from_secs(2),
        gateway.invoke::<ScoreVerdict>("prompt"),
    )
    .await
    .expect("verdict returned without retrying")
    .unwrap();

    assert!(!verdict.is_ok());
    assert_eq!(verdict.reason_text(), "vague claim; flat language");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
