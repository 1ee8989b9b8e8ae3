//! Audit trace invariants: exactly one trace per query, with the required
//! first and last events, and determinism of the pipeline's pure stages.

mod common;

use common::{harness, request};
use nobellm::audit::AuditEvent;

#[tokio::test]
async fn every_query_persists_exactly_one_trace() {
    let h = harness().await;
    let queries = [
        "Who won the Nobel Prize in Literature in 1965?",
        "What did Toni Morrison say about race?",
        "What do laureates say about justice and freedom?",
        "",
        "pelican bicycle weather",
    ];
    for q in queries {
        let _ = h.orchestrator.handle_query(request(q)).await;
    }
    assert_eq!(h.sink.traces().await.len(), queries.len());
}

#[tokio::test]
async fn traces_start_with_query_received_and_end_terminally() {
    let h = harness().await;
    let _ = h
        .orchestrator
        .handle_query(request("What do laureates say about justice?"))
        .await;
    let _ = h.orchestrator.handle_query(request("")).await;

    for trace in h.sink.traces().await {
        assert_eq!(
            trace.first_event().unwrap().event.name(),
            "query_received"
        );
        let last = trace.last_event().unwrap().event.name();
        assert!(
            last == "answer_assembled" || last == "error",
            "unexpected terminal event {}",
            last
        );
    }
}

#[tokio::test]
async fn event_offsets_are_monotonic() {
    let h = harness().await;
    let _ = h
        .orchestrator
        .handle_query(request("What do laureates say about justice and freedom?"))
        .await;
    let trace = h.sink.traces().await.pop().unwrap();
    for pair in trace.events.windows(2) {
        assert!(pair[0].offset_ms <= pair[1].offset_ms);
    }
}

#[tokio::test]
async fn trace_ids_match_the_response() {
    let h = harness().await;
    let outcome = h
        .orchestrator
        .handle_query(request("Who won the Nobel Prize in Literature in 1965?"))
        .await;
    let response = outcome.result.unwrap();
    assert_eq!(response.trace_id, outcome.trace_id);
    let trace = h.sink.traces().await.pop().unwrap();
    assert_eq!(trace.trace_id, outcome.trace_id);
}

/// Running the same query twice with identical configuration produces
/// identical intent, expanded terms, template, and prompt length. (The LLM
/// output is canned here, but the law holds for the pure stages.)
#[tokio::test]
async fn repeated_queries_are_deterministic_through_the_prompt() {
    let h = harness().await;
    let query = "What do laureates say about justice and freedom?";
    let _ = h.orchestrator.handle_query(request(query)).await;
    let _ = h.orchestrator.handle_query(request(query)).await;

    let traces = h.sink.traces().await;
    assert_eq!(traces.len(), 2);

    let digest = |trace: &nobellm::audit::AuditTrace| {
        let mut intent = None;
        let mut terms: Vec<(String, String)> = Vec::new();
        let mut template = None;
        let mut prompt_length = None;
        for timed in &trace.events {
            match &timed.event {
                AuditEvent::IntentClassified { intent: i, .. } => intent = Some(i.clone()),
                AuditEvent::ExpansionDone { terms: t } => {
                    terms = t
                        .iter()
                        .map(|r| (r.term.clone(), r.source.clone()))
                        .collect();
                    terms.sort();
                }
                AuditEvent::PromptBuilt {
                    template_id,
                    prompt_length: len,
                    ..
                } => {
                    template = Some(template_id.clone());
                    prompt_length = Some(*len);
                }
                _ => {}
            }
        }
        (intent, terms, template, prompt_length)
    };

    assert_eq!(digest(&traces[0]), digest(&traces[1]));
}

#[tokio::test]
async fn thematic_trace_orders_expansion_before_embedding_done() {
    let h = harness().await;
    let _ = h
        .orchestrator
        .handle_query(request("What do laureates say about justice?"))
        .await;
    let trace = h.sink.traces().await.pop().unwrap();

    let position = |name: &str| {
        trace
            .events
            .iter()
            .position(|e| e.event.name() == name)
            .unwrap_or(usize::MAX)
    };
    assert!(position("intent_classified") < position("expansion_done"));
    assert!(position("expansion_done") < position("embedding_done"));
    assert!(position("embedding_done") < position("retrieval_done"));
    assert!(position("retrieval_done") < position("prompt_built"));
    assert!(position("prompt_built") < position("llm_called"));
    assert!(position("llm_called") < position("answer_assembled"));
}

#[tokio::test]
async fn llm_call_is_audited_with_usage_and_cost() {
    let h = harness().await;
    let _ = h
        .orchestrator
        .handle_query(request("What did Toni Morrison say about race?"))
        .await;
    let trace = h.sink.traces().await.pop().unwrap();

    let mut found = false;
    for timed in &trace.events {
        if let AuditEvent::LlmCalled {
            model_id,
            token_usage,
            ..
        } = &timed.event
        {
            assert_eq!(model_id, "fake-llm");
            assert!(token_usage.total_tokens > 0);
            found = true;
        }
    }
    assert!(found);
}
