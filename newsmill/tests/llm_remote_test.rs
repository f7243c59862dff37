use newsmill::llm::remote::RemoteLlmProvider;
use newsmill::llm::{LlmProvider, LlmRequest};

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    // Mock successful OpenAI response
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "This is a test response"
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest {
        prompt: "Test prompt".to_string(),
        max_tokens: Some(100),
        temperature: Some(0.7),
        timeout_seconds: Some(10),
    };

    let result = provider.generate(request).await;

    assert!(result.is_ok());
    let response = result.unwrap();
    assert_eq!(response.content, "This is a test response");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.completion_tokens, 5);
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_sends_bearer_key_and_defaults() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer secret-key")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "model": "essay-model",
            "max_tokens": 800,
            "messages": [{"role": "user", "content": "Write"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "choices": [{
                    "message": {"role": "assistant", "content": "{\"is_ok\": \"yes\"}"}
                }]
            }"#,
        )
        .create_async()
        .await;

    std::env::set_var("NEWSMILL_TEST_LLM_KEY", "secret-key");
    let provider = RemoteLlmProvider::from_config(&common::RemoteLlmConfig {
        api_url: Some(server.url()),
        api_key_env: Some("NEWSMILL_TEST_LLM_KEY".into()),
        model: Some("essay-model".into()),
        timeout_seconds: Some(10),
        max_tokens: Some(800),
        temperature: None,
    })
    .expect("provider from config");

    let response = provider.generate(LlmRequest::new("Write")).await.unwrap();

    assert_eq!(response.content, "{\"is_ok\": \"yes\"}");
    // No usage block and no model in the envelope: defaults apply.
    assert_eq!(response.usage.total_tokens, 0);
    assert_eq!(response.model, "essay-model");

    mock.assert_async().await;
}

#[test]
fn test_remote_provider_requires_key_env() {
    let config = common::RemoteLlmConfig {
        api_url: None,
        api_key_env: Some("NEWSMILL_TEST_UNSET_KEY".into()),
        model: None,
        timeout_seconds: None,
        max_tokens: None,
        temperature: None,
    };
    std::env::remove_var("NEWSMILL_TEST_UNSET_KEY");
    assert!(RemoteLlmProvider::from_config(&config).is_err());
}

#[tokio::test]
async fn test_remote_provider_error_handling() {
    let mut server = mockito::Server::new_async().await;

    // Mock API error
    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: None,
    };

    let result = provider.generate(request).await;

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_timeout() {
    let mut server = mockito::Server::new_async().await;

    // Mock slow response
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: Some(1), // 1 second timeout
    };

    let result = provider.generate(request).await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("timed out"));
}
