//! Orchestrator integration tests: ordering, failure isolation, retry,
//! and the format contract applied to results.

mod common;

use common::{marker, scenario_orchestrator, words, MockBehavior, MockProvider};
use std::sync::Arc;

use agenthub::{AgentStatus, OrchestrateError, ProviderError, TaskRequest, RAW_SECTION};

#[tokio::test]
async fn execute_preserves_request_order_and_length() {
    let provider = Arc::new(
        MockProvider::new()
            .on(&marker("reasoning"), MockBehavior::Reply(words(120)))
            .on(&marker("writer"), MockBehavior::Reply(words(80))),
    );
    let orchestrator = scenario_orchestrator(provider);

    let request = TaskRequest::new(
        "Summarize the plan",
        vec!["writer".to_string(), "reasoning".to_string()],
    );
    let results = orchestrator.execute(&request).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].agent_id, "writer");
    assert_eq!(results[1].agent_id, "reasoning");
    assert!(results.iter().all(|r| r.status == AgentStatus::Success));
}

#[tokio::test]
async fn canonical_scenario_partial_success_unknown() {
    // Analysis floor is 100 words, creative floor is 50: 40 words from
    // "reasoning" is partial, 80 words from "writer" is success, and
    // "ghost" is not in the catalog.
    let provider = Arc::new(
        MockProvider::new()
            .on(&marker("reasoning"), MockBehavior::Reply(words(40)))
            .on(&marker("writer"), MockBehavior::Reply(words(80))),
    );
    let orchestrator = scenario_orchestrator(provider);

    let request = TaskRequest::new(
        "Evaluate the proposal",
        vec![
            "reasoning".to_string(),
            "writer".to_string(),
            "ghost".to_string(),
        ],
    );
    let results = orchestrator.execute(&request).await.unwrap();

    assert_eq!(results.len(), 3);

    assert_eq!(results[0].agent_id, "reasoning");
    assert_eq!(results[0].status, AgentStatus::Partial);
    // Under-minimum content is kept, not discarded
    assert_eq!(results[0].content, words(40));

    assert_eq!(results[1].agent_id, "writer");
    assert_eq!(results[1].status, AgentStatus::Success);

    assert_eq!(results[2].agent_id, "ghost");
    assert_eq!(results[2].status, AgentStatus::Failed);
    assert!(results[2]
        .error
        .as_deref()
        .unwrap()
        .contains("unknown agent"));
}

#[tokio::test]
async fn one_agent_failure_does_not_affect_others() {
    let provider = Arc::new(
        MockProvider::new()
            .on(&marker("reasoning"), MockBehavior::Fail(ProviderError::Auth))
            .on(&marker("writer"), MockBehavior::Reply(words(80))),
    );
    let orchestrator = scenario_orchestrator(provider);

    let request = TaskRequest::new(
        "Write it up",
        vec!["reasoning".to_string(), "writer".to_string()],
    );
    let results = orchestrator.execute(&request).await.unwrap();

    assert_eq!(results[0].status, AgentStatus::Failed);
    assert!(results[0].error.is_some());

    // The healthy agent keeps its slot and its content
    assert_eq!(results[1].agent_id, "writer");
    assert_eq!(results[1].status, AgentStatus::Success);
    assert_eq!(results[1].content, words(80));
}

#[tokio::test]
async fn empty_agent_list_is_a_batch_failure() {
    let provider = Arc::new(MockProvider::new());
    let orchestrator = scenario_orchestrator(provider);

    let request = TaskRequest::new("Anything", vec![]);
    let result = orchestrator.execute(&request).await;

    assert!(matches!(result, Err(OrchestrateError::EmptyAgentList)));
}

#[tokio::test]
async fn transient_errors_are_retried_once() {
    let provider = Arc::new(MockProvider::new().on(
        &marker("writer"),
        MockBehavior::FailOnceThenReply(ProviderError::RateLimited, words(60)),
    ));
    let orchestrator = scenario_orchestrator(provider.clone());

    let request = TaskRequest::new("Draft the note", vec!["writer".to_string()]);
    let results = orchestrator.execute(&request).await.unwrap();

    assert_eq!(results[0].status, AgentStatus::Success);
    assert_eq!(provider.calls(&marker("writer")), 2);
}

#[tokio::test]
async fn non_transient_errors_are_not_retried() {
    let provider = Arc::new(
        MockProvider::new().on(&marker("writer"), MockBehavior::Fail(ProviderError::Auth)),
    );
    let orchestrator = scenario_orchestrator(provider.clone());

    let request = TaskRequest::new("Draft the note", vec!["writer".to_string()]);
    let results = orchestrator.execute(&request).await.unwrap();

    assert_eq!(results[0].status, AgentStatus::Failed);
    assert_eq!(provider.calls(&marker("writer")), 1);
}

#[tokio::test]
async fn structured_output_is_split_into_sections() {
    let body = format!(
        "## Summary\n{}\n\n## Findings\n{}",
        words(30),
        words(90)
    );
    let provider = Arc::new(
        MockProvider::new().on(&marker("reasoning"), MockBehavior::Reply(body)),
    );
    let orchestrator = scenario_orchestrator(provider);

    let request = TaskRequest::new("Analyze this", vec!["reasoning".to_string()]);
    let results = orchestrator.execute(&request).await.unwrap();

    let sections = &results[0].sections;
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].id, "summary");
    assert_eq!(sections[1].id, "findings");
    assert_eq!(results[0].status, AgentStatus::Success);
}

#[tokio::test]
async fn unstructured_output_falls_back_to_raw_section() {
    let provider = Arc::new(
        MockProvider::new().on(&marker("writer"), MockBehavior::Reply(words(70))),
    );
    let orchestrator = scenario_orchestrator(provider);

    let request = TaskRequest::new("Freeform", vec!["writer".to_string()]);
    let results = orchestrator.execute(&request).await.unwrap();

    assert_eq!(results[0].sections.len(), 1);
    assert_eq!(results[0].sections[0].id, RAW_SECTION);
    assert_eq!(results[0].sections[0].text, words(70));
}

#[tokio::test]
async fn duplicate_ids_run_once_per_occurrence() {
    let provider = Arc::new(
        MockProvider::new().on(&marker("writer"), MockBehavior::Reply(words(60))),
    );
    let orchestrator = scenario_orchestrator(provider.clone());

    let request = TaskRequest::new(
        "Twice",
        vec!["writer".to_string(), "writer".to_string()],
    );
    let results = orchestrator.execute(&request).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].agent_id, "writer");
    assert_eq!(results[1].agent_id, "writer");
    assert_eq!(provider.calls(&marker("writer")), 2);
}
