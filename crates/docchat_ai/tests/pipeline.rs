mod common;

use std::fs;
use std::sync::Arc;

use docchat_ai::chat::{CancelToken, ChatOutcome, ChatPipeline};
use docchat_ai::llm::{ChatModel, GenerationParams};
use docchat_ai::retrieve::NO_RELEVANT_DOCUMENTS;
use docchat_core::config::{PipelineConfig, Provider};
use docchat_core::domain::{ConversationTurn, Role};
use docchat_core::error::AppError;
use docchat_core::exchange_log::Feedback;
use docchat_core::memory::DEFAULT_SESSION;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use common::{config_in, paragraph, pipeline, ScriptedModel};

fn seed(root: &std::path::Path) -> std::path::PathBuf {
    let docs = root.join("docs");
    fs::create_dir_all(&docs).expect("docs dir");
    fs::write(
        docs.join("policies.txt"),
        [paragraph("refund", 2), paragraph("shipping", 3)].join("\n\n"),
    )
    .expect("write");
    fs::write(
        docs.join("hours.md"),
        "# Hours\n\nOpening hours are 9 to 5, hours may vary.",
    )
    .expect("write");
    docs
}

#[test]
fn chat_on_empty_collection_uses_marker_and_zero_confidence() {
    let dir = tempdir().expect("tempdir");
    let model = Arc::new(ScriptedModel::default());
    let p = pipeline(config_in(dir.path()), Arc::clone(&model));

    let resp = p.chat(DEFAULT_SESSION, "test").expect("chat");
    assert_eq!(resp.outcome, ChatOutcome::Answer);
    assert_eq!(resp.answer, "answer 1");
    assert_eq!(resp.docs_consulted, 0);
    assert_eq!(resp.confidence, 0.0);
    assert!(!resp.is_confident);
    assert!(!resp.evidence_found);
    assert!(resp.sources.is_empty());
    assert!(!p.history(1).expect("history")[0].evidence_found);

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0].role, Role::System);
    assert!(calls[0][0].content.contains(NO_RELEVANT_DOCUMENTS));
    assert_eq!(calls[0].last(), Some(&ConversationTurn::user("test")));
}

#[test]
fn chat_grounds_prompt_in_retrieved_context() {
    let dir = tempdir().expect("tempdir");
    let model = Arc::new(ScriptedModel::default());
    let cfg = PipelineConfig {
        confidence_threshold: 0.5,
        ..config_in(dir.path())
    };
    let p = pipeline(cfg, Arc::clone(&model));
    let summary = p.ingest_directory(&seed(dir.path())).expect("ingest");
    assert_eq!(summary.files_loaded, 2);
    assert_eq!(summary.chunks_added, 3);

    let resp = p.chat("s1", "What are the opening hours?").expect("chat");
    assert!(resp.evidence_found);
    assert_eq!(resp.question, "What are the opening hours?");
    assert_eq!(resp.docs_consulted, 3);
    assert!(resp.sources.iter().any(|s| s.source == "hours.md" && s.chunk == "1/1"));
    assert!(resp.sources.iter().all(|s| s.relevance >= 0.5));

    let system = &model.calls()[0][0].content;
    assert!(system.contains("[Source 1: hours.md, fragment 1/1]"));
    assert!(system.contains("Opening hours are 9 to 5"));
}

#[test]
fn generation_failure_degrades_and_still_records_once() {
    let dir = tempdir().expect("tempdir");
    let cfg = config_in(dir.path());
    let fallback = cfg.fallback_answer.clone();
    let p = pipeline(cfg, Arc::new(ScriptedModel::failing()));

    let resp = p
        .chat(DEFAULT_SESSION, "Do you ship abroad?")
        .expect("chat never fails on generation");
    assert_eq!(resp.answer, fallback);
    assert!(resp.is_degraded());
    match &resp.outcome {
        ChatOutcome::Degraded { error } => assert_eq!(error.code, "GENERATION_FAILED"),
        other => panic!("expected degraded outcome, got {other:?}"),
    }

    assert_eq!(p.metrics().total_queries, 1);
    assert_eq!(p.memory_messages(DEFAULT_SESSION), 2);
    let history = p.history(10).expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].degraded);
    assert_eq!(history[0].assistant_response, fallback);
}

struct CancellingModel {
    token: CancelToken,
}

impl ChatModel for CancellingModel {
    fn generate(
        &self,
        _messages: &[ConversationTurn],
        _params: &GenerationParams,
    ) -> Result<String, AppError> {
        self.token.cancel();
        Ok("too late".to_string())
    }
}

#[test]
fn cancelled_chat_leaves_no_trace() {
    let dir = tempdir().expect("tempdir");
    let token = CancelToken::new();
    let p = ChatPipeline::open(
        config_in(dir.path()),
        Arc::new(common::KeywordEmbedder),
        Arc::new(CancellingModel { token: token.clone() }),
        docchat_ai::extract::ExtractorRegistry::with_defaults(),
    )
    .expect("open");

    let err = p
        .chat_with_cancel(DEFAULT_SESSION, "hello", &token)
        .expect_err("cancelled");
    assert_eq!(err.code, "CHAT_CANCELLED");
    assert_eq!(p.memory_messages(DEFAULT_SESSION), 0);
    assert_eq!(p.metrics().total_queries, 0);
    assert!(p.history(10).expect("history").is_empty());
}

#[test]
fn retrieval_errors_propagate_without_side_effects() {
    let dir = tempdir().expect("tempdir");
    let p = pipeline(config_in(dir.path()), Arc::new(ScriptedModel::default()));
    p.ingest_directory(&seed(dir.path())).expect("ingest");

    let err = p
        .chat(DEFAULT_SESSION, "explode please")
        .expect_err("embedding fails");
    assert_eq!(err.code, "EMBEDDINGS_FAILED");
    assert_eq!(p.metrics().total_queries, 0);
    assert_eq!(p.memory_messages(DEFAULT_SESSION), 0);
}

#[test]
fn blank_message_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let p = pipeline(config_in(dir.path()), Arc::new(ScriptedModel::default()));
    assert_eq!(p.chat("s", "  \n").expect_err("blank").code, "CHAT_EMPTY_MESSAGE");
}

#[test]
fn memory_window_bounds_history_per_session() {
    let dir = tempdir().expect("tempdir");
    let model = Arc::new(ScriptedModel::default());
    let cfg = PipelineConfig {
        memory_window: 2,
        ..config_in(dir.path())
    };
    let p = pipeline(cfg, Arc::clone(&model));

    for i in 1..=3 {
        p.chat("alice", &format!("question {i}")).expect("chat");
    }
    p.chat("bob", "hi").expect("chat");

    let calls = model.calls();
    // system + two remembered exchanges + new message
    assert_eq!(calls[2].len(), 6);
    assert_eq!(calls[2][1], ConversationTurn::user("question 1"));
    assert_eq!(calls[3].len(), 2, "bob starts without alice's history");

    assert_eq!(p.memory_messages("alice"), 4);
    assert_eq!(p.memory_messages("bob"), 2);

    p.chat("alice", "question 4").expect("chat");
    let last = model.calls().pop().expect("call");
    assert_eq!(last[1], ConversationTurn::user("question 2"));

    p.clear_memory("alice");
    assert_eq!(p.memory_messages("alice"), 0);
    assert_eq!(p.memory_messages("bob"), 2);
}

#[test]
fn metrics_and_log_persist_across_restarts() {
    let dir = tempdir().expect("tempdir");
    {
        let p = pipeline(config_in(dir.path()), Arc::new(ScriptedModel::default()));
        p.ingest_directory(&seed(dir.path())).expect("ingest");
        p.chat(DEFAULT_SESSION, "refund?").expect("chat");
        p.chat(DEFAULT_SESSION, "shipping?").expect("chat");
    }
    let p = pipeline(config_in(dir.path()), Arc::new(ScriptedModel::default()));
    assert_eq!(p.metrics().total_queries, 2);
    assert_eq!(p.metrics().avg_docs_consulted, 3.0);
    assert_eq!(p.collection_stats().document_count, 3);
    assert_eq!(p.history(1).expect("history")[0].user_message, "shipping?");
    // Memory is process-lifetime only.
    assert_eq!(p.memory_messages(DEFAULT_SESSION), 0);
}

#[test]
fn status_reports_counts_and_masks_secrets() {
    let dir = tempdir().expect("tempdir");
    let cfg = PipelineConfig {
        openai_api_key: "sk-secret".to_string(),
        ..config_in(dir.path())
    };
    let p = pipeline(cfg, Arc::new(ScriptedModel::default()));
    p.ingest_directory(&seed(dir.path())).expect("ingest");
    p.chat("s1", "hours").expect("chat");

    let st = p.status("s1");
    assert_eq!(st.documents_loaded, 3);
    assert_eq!(st.memory_messages, 2);
    assert_eq!(st.metrics.total_queries, 1);
    assert_eq!(st.collection_stats.collection_name, "documents");
    assert_eq!(st.config["openai_api_key"], "***");
    assert!(st.supported_formats.contains(&".md".to_string()));

    p.clear_all("s1").expect("clear all");
    let st = p.status("s1");
    assert_eq!(st.documents_loaded, 0);
    assert_eq!(st.memory_messages, 0);
}

#[test]
fn retune_applies_to_later_requests_only() {
    let dir = tempdir().expect("tempdir");
    let cfg = config_in(dir.path());
    let p = pipeline(cfg.clone(), Arc::new(ScriptedModel::default()));
    p.ingest_directory(&seed(dir.path())).expect("ingest");

    let before = p.config();
    p.retune(PipelineConfig { top_k: 1, ..cfg.clone() }).expect("retune");
    assert_eq!(before.top_k, 4);
    assert_eq!(p.chat("s", "refund").expect("chat").docs_consulted, 1);

    let err = p
        .retune(PipelineConfig {
            collection_name: "other".to_string(),
            ..cfg
        })
        .expect_err("fixed field");
    assert_eq!(err.code, "CONFIG_RESTART_REQUIRED");
    assert_eq!(p.config().top_k, 1);
}

#[test]
fn retune_rejects_settings_baked_into_backends() {
    let dir = tempdir().expect("tempdir");
    let cfg = config_in(dir.path());
    let p = pipeline(cfg.clone(), Arc::new(ScriptedModel::default()));

    let changes = [
        (
            "ollama_base_url",
            PipelineConfig {
                ollama_base_url: "http://evil.example.com".to_string(),
                ..cfg.clone()
            },
        ),
        (
            "openai_api_key",
            PipelineConfig {
                openai_api_key: "sk-rotated".to_string(),
                ..cfg.clone()
            },
        ),
        (
            "openai_base_url",
            PipelineConfig {
                openai_base_url: "https://proxy.example.com/v1".to_string(),
                ..cfg.clone()
            },
        ),
        (
            "embedding_timeout_secs",
            PipelineConfig {
                embedding_timeout_secs: 1,
                ..cfg.clone()
            },
        ),
    ];
    for (field, changed) in changes {
        let err = p.retune(changed).expect_err(field);
        assert_eq!(err.code, "CONFIG_RESTART_REQUIRED");
        assert_eq!(err.details.as_deref(), Some(format!("field={field}").as_str()));
    }
    assert_eq!(*p.config(), cfg);
}

#[test]
fn unreachable_ollama_fails_at_startup() {
    let dir = tempdir().expect("tempdir");
    let cfg = PipelineConfig {
        provider: Provider::Ollama,
        // Nothing listens on port 1.
        ollama_base_url: "http://127.0.0.1:1".to_string(),
        ..config_in(dir.path())
    };
    let err = ChatPipeline::from_config(cfg).expect_err("health check");
    assert_eq!(err.code, "GENERATION_BACKEND_UNREACHABLE");
    assert!(err.retryable);
}

#[test]
fn feedback_is_attached_and_logged() {
    let dir = tempdir().expect("tempdir");
    let p = pipeline(config_in(dir.path()), Arc::new(ScriptedModel::default()));
    let mut resp = p.chat("s1", "Is there a warranty?").expect("chat");
    assert_eq!(resp.feedback, None);

    let record = p
        .record_feedback("s1", &mut resp, Feedback::Negative)
        .expect("feedback");
    assert_eq!(resp.feedback, Some(Feedback::Negative));
    assert_eq!(record.user_message, "Is there a warranty?");
    assert_eq!(record.assistant_response, "answer 1");

    let logged = p.feedback_history(5).expect("feedback history");
    assert_eq!(logged, vec![record]);
    assert_eq!(p.history(5).expect("history").len(), 1);
}
