//! End-to-end runs of the refinement loop against an OpenAI-compatible server

use futures_util::StreamExt;
use transcraft_agent::{
    into_emissions, AgentKind, Emission, LoopConfig, PromptTemplates, RefinementLoop,
    TranslationPayload, TranslationRequest,
};
use transcraft_provider::{OpenAIProvider, ProviderConfig};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TRANSLATE: &str = "Reply with the translation only";
const CRITIQUE: &str = "constructive suggestions";
const JUDGE: &str = "Answer with";

fn reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "chatcmpl-test",
        "model": "test-model",
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    }))
}

async fn answer(server: &MockServer, marker: &str, content: &str, times: Option<u64>, priority: u8) {
    let mock = Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(marker))
        .respond_with(reply(content))
        .with_priority(priority);
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

fn provider_for(server: &MockServer) -> OpenAIProvider {
    OpenAIProvider::new(ProviderConfig::local(format!("{}/v1", server.uri())).with_model("test-model"))
        .unwrap()
}

fn hello() -> TranslationRequest {
    TranslationRequest::new("English", "French", "Hello, world.").with_max_iterations(3)
}

#[tokio::test]
async fn test_accepted_on_first_pass() {
    let server = MockServer::start().await;
    answer(&server, TRANSLATE, "Bonjour, le monde.", None, 5).await;
    answer(&server, CRITIQUE, "", None, 5).await;
    answer(&server, JUDGE, "Yes", None, 5).await;

    let provider = provider_for(&server);
    let refine = RefinementLoop::new(&provider);
    let emissions: Vec<Emission> = into_emissions(refine.run(hello())).collect().await;

    assert_eq!(
        emissions,
        vec![
            Emission::action("Bonjour, le monde."),
            Emission::critique(""),
            Emission::judge("Yes"),
            Emission::final_translation("Bonjour, le monde."),
        ]
    );
}

#[tokio::test]
async fn test_accepted_on_last_pass() {
    let server = MockServer::start().await;
    answer(&server, TRANSLATE, "Bonjour monde.", Some(1), 1).await;
    answer(&server, TRANSLATE, "Bonjour le monde.", Some(1), 2).await;
    answer(&server, TRANSLATE, "Bonjour, le monde.", None, 3).await;
    answer(&server, CRITIQUE, "Add the article and the comma.", None, 5).await;
    answer(&server, JUDGE, "No", Some(2), 1).await;
    answer(&server, JUDGE, "Yes", None, 2).await;

    let provider = provider_for(&server);
    let refine = RefinementLoop::new(&provider);
    let outcome = refine.translate(hello()).await.unwrap();

    assert_eq!(outcome.iterations, 3);
    assert!(outcome.accepted);
    assert_eq!(outcome.translation, "Bonjour, le monde.");
    let actions = outcome
        .emissions
        .iter()
        .filter(|e| matches!(e.agent, AgentKind::Action | AgentKind::FinalTranslation))
        .count();
    assert_eq!(actions, 4);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 9);
    let last_translate = String::from_utf8_lossy(&requests[6].body).to_string();
    assert_eq!(last_translate.matches("<ATTEMPT").count(), 2);
    assert!(last_translate.contains("Bonjour monde."));
    assert!(last_translate.contains("Bonjour le monde."));
}

#[tokio::test]
async fn test_upstream_failure_becomes_error_emission() {
    let server = MockServer::start().await;
    answer(&server, TRANSLATE, "Bonjour, le monde.", None, 5).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(CRITIQUE))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let refine = RefinementLoop::new(&provider);
    let emissions: Vec<Emission> = into_emissions(refine.run(hello())).collect().await;

    assert_eq!(emissions.len(), 2);
    assert_eq!(emissions[0], Emission::action("Bonjour, le monde."));
    assert_eq!(emissions[1].agent, AgentKind::Error);
    assert!(emissions[1].content.contains("critique"));
    assert!(emissions
        .iter()
        .all(|e| !matches!(e.agent, AgentKind::Judge | AgentKind::FinalTranslation)));
}

#[tokio::test]
async fn test_payload_with_prompt_override() {
    let server = MockServer::start().await;
    answer(&server, "Vertaal naar", "Hallo, wereld.", None, 5).await;
    answer(&server, CRITIQUE, "Fine.", None, 5).await;
    answer(&server, JUDGE, " YES ", None, 5).await;

    let payload = TranslationPayload::from_json(
        r#"{
            "context": {
                "source_language": "English",
                "target_language": "Dutch",
                "source_text": "Hello, world.",
                "translation_prompt": "Vertaal naar {target_language}: {source_text}"
            },
            "max_iterations": 2
        }"#,
    )
    .unwrap();
    let (request, overrides) = payload.into_request(LoopConfig::default()).unwrap();
    let templates = PromptTemplates::default().with_overrides(overrides);
    templates.validate().unwrap();

    let provider = provider_for(&server);
    let refine = RefinementLoop::new(&provider).with_templates(templates);
    let lines: Vec<String> = into_emissions(refine.run(request))
        .map(|e| e.to_ndjson().unwrap())
        .collect()
        .await;

    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], r#"{"agent":"action","content":"Hallo, wereld."}"#);
    assert_eq!(lines[3], r#"{"agent":"final translation","content":"Hallo, wereld."}"#);
}
