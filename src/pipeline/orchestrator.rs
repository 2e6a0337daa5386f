//! BatchOrchestrator — Pairing → Classification → Reconciliation over a store.
//!
//! Classification fans out over a bounded pool of scoped threads pulling units
//! from a shared cursor. Results land in a mutex-guarded map; the enriched
//! output is built in one reconciliation pass after every worker has joined.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::cancel::CancellationToken;
use super::classifier::{ClassifierGateway, RestClassifierClient};
use super::pairing::PairingEngine;
use super::prompt::{PromptBuilder, SocraticPromptBuilder};
use super::reconcile::ResultReconciler;
use super::summary::BatchSummary;
use super::types::{AnalysisMode, PairingUnit, ResultMap};
use super::PipelineError;
use crate::config::AnnotatorConfig;
use crate::models::EnrichedRecord;
use crate::store::{open_sink, open_source, RecordStore};

/// Worker pool and time budget for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub workers: usize,
    pub deadline: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline: None,
        }
    }
}

/// Enriched records (one per store record, in store order) plus statistics.
#[derive(Debug)]
pub struct BatchOutcome<'a> {
    pub records: Vec<EnrichedRecord<'a>>,
    pub summary: BatchSummary,
}

pub struct BatchOrchestrator {
    gateway: ClassifierGateway,
    prompts: Box<dyn PromptBuilder>,
    pairing: PairingEngine,
    config: OrchestratorConfig,
}

impl BatchOrchestrator {
    pub fn new(gateway: ClassifierGateway, prompts: Box<dyn PromptBuilder>, config: OrchestratorConfig) -> Self {
        Self {
            gateway,
            prompts,
            pairing: PairingEngine::new(),
            config,
        }
    }

    /// Run one batch over `store`. Classification failures never abort the
    /// batch; they surface as error columns on the affected records.
    pub fn run<'a>(
        &self,
        store: &'a RecordStore,
        mode: AnalysisMode,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome<'a>, PipelineError> {
        let start = Instant::now();
        let mut summary = BatchSummary::new(mode, Utc::now());
        let reconciler = ResultReconciler::new(mode);

        tracing::info!(
            run_id = %summary.run_id,
            mode = %mode,
            records = store.len(),
            participants = store.participants().len(),
            workers = self.config.workers,
            model = %self.gateway.model().name,
            max_attempts = self.gateway.policy().max_attempts,
            "Starting batch"
        );

        let pairing = self.pairing.pair(store, mode);
        summary.participants_total = store.participants().len();
        summary.participants_paired = pairing.participants_paired;
        summary.participants_skipped = pairing.participants_skipped;
        summary.participants_malformed = pairing.malformed.len();
        summary.units_total = pairing.units.len();

        let results = if pairing.units.is_empty() {
            tracing::warn!(mode = %mode, "No eligible units, halting without classification");
            summary.halted_empty = true;
            ResultMap::new()
        } else {
            let token = match self.config.deadline {
                Some(after) => cancel.child_with_deadline(after),
                None => cancel.clone(),
            };
            let results = self.classify_all(&pairing.units, &token)?;
            summary.cancelled = token.is_cancelled();
            results
        };

        summary.units_classified = results.len();
        summary.units_failed = results.values().filter(|r| r.is_error()).count();
        summary.units_succeeded = summary.units_classified - summary.units_failed;
        summary.units_not_attempted = summary.units_total.saturating_sub(summary.units_classified);
        if summary.cancelled {
            tracing::warn!(
                classified = summary.units_classified,
                not_attempted = summary.units_not_attempted,
                "Batch cancelled, keeping finished results"
            );
        }

        summary.orphaned_keys = reconciler.orphaned_keys(store.records(), &results).len();
        let records = reconciler.merge(store.records(), &results);

        summary.record_output(&records);
        summary.duration_ms = start.elapsed().as_millis() as u64;

        Ok(BatchOutcome { records, summary })
    }

    fn classify_all(
        &self,
        units: &[PairingUnit<'_>],
        cancel: &CancellationToken,
    ) -> Result<ResultMap, PipelineError> {
        let cursor = AtomicUsize::new(0);
        let results = Mutex::new(ResultMap::with_capacity(units.len()));
        let workers = self.config.workers.clamp(1, units.len().max(1));

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let (cursor, results) = (&cursor, &results);
                scope.spawn(move || loop {
                    if cancel.is_cancelled() {
                        tracing::debug!(worker, "Worker stopping on cancellation");
                        break;
                    }
                    let Some(unit) = units.get(cursor.fetch_add(1, Ordering::SeqCst)) else {
                        break;
                    };

                    let result = self.gateway.classify(unit, self.prompts.as_ref(), cancel);

                    match results.lock() {
                        Ok(mut map) => {
                            map.insert(unit.key(), result);
                        }
                        Err(_) => break,
                    }
                });
            }
        });

        results.into_inner().map_err(|_| PipelineError::ResultsPoisoned)
    }
}

/// Source → store → batch → sink, as configured. Returns the summary.
///
/// Cancelling `cancel` stops scheduling new units; whatever finished is
/// still merged and written.
pub fn run_from_config(
    config: &AnnotatorConfig,
    cancel: &CancellationToken,
) -> Result<BatchSummary, PipelineError> {
    let source = open_source(&config.input_path);
    let source = source.as_ref();
    let (store, mode) = if config.legacy_format {
        if config.mode != AnalysisMode::AgentOnly {
            tracing::warn!(
                mode = %config.mode,
                "Legacy input only carries tutor turns, running agent_only"
            );
        }
        (RecordStore::load_legacy_agent_rows(source)?, AnalysisMode::AgentOnly)
    } else {
        (RecordStore::load(source)?, config.mode)
    };

    let client = RestClassifierClient::new(
        &config.api_url,
        config.access_token.clone(),
        config.request_timeout_secs,
    )?;
    let gateway = ClassifierGateway::new(Box::new(client), config.model.clone(), config.retry.clone());
    let orchestrator = BatchOrchestrator::new(
        gateway,
        Box::new(SocraticPromptBuilder::new()),
        OrchestratorConfig {
            workers: config.workers,
            deadline: config.deadline,
        },
    );

    let outcome = orchestrator.run(&store, mode, cancel)?;

    let sink = open_sink(&config.output_path, store.columns().clone());
    tracing::info!(
        sink = %sink.describe(),
        rows = outcome.records.len(),
        partial = outcome.summary.cancelled,
        "Writing enriched records"
    );
    sink.write(&outcome.records)?;
    outcome.summary.log();

    Ok(outcome.summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{AnalysisColumns, InteractionRecord, InteractionType};
    use crate::pipeline::classifier::{
        ClassificationError, ClassifierReply, ClassifierService, ModelConfig, RecordingSleeper, RetryPolicy,
        ScriptedClassifier,
    };
    use crate::store::RowsSource;

    const PAIR_REPLY: &str = r#"{"assigned_labels": [{"label": "Reasons_Evidence", "reasoning": "Explains why."}]}"#;

    fn rec(pid: &str, id: &str, t: InteractionType) -> InteractionRecord {
        InteractionRecord {
            participant_id: pid.into(),
            interaction_id: id.into(),
            interaction_type: t,
            text: format!("{pid} {id}"),
            timestamp: None,
            extra: serde_json::Map::new(),
        }
    }

    /// u1 qualifies for pairing; u2 has a single learner turn and does not.
    fn two_participant_store() -> RecordStore {
        use InteractionType::{AgentTurn as A, LearnerTurn as L};
        RecordStore::from_records(vec![
            rec("u1", "s1", L),
            rec("u1", "a1", A),
            rec("u2", "a1", A),
            rec("u1", "s2", L),
            rec("u2", "s2", L),
            rec("u1", "a2", A),
            rec("u1", "s3", L),
            rec("u1", "a3", A),
        ])
    }

    fn orchestrator(service: Arc<ScriptedClassifier>, workers: usize) -> BatchOrchestrator {
        let gateway = ClassifierGateway::new(Box::new(service), ModelConfig::default(), RetryPolicy::default())
            .with_sleeper(Box::new(RecordingSleeper::new()));
        BatchOrchestrator::new(
            gateway,
            Box::new(SocraticPromptBuilder::new()),
            OrchestratorConfig {
                workers,
                deadline: None,
            },
        )
    }

    fn timed_orchestrator(service: Arc<ScriptedClassifier>, deadline: Duration) -> BatchOrchestrator {
        let gateway = ClassifierGateway::new(Box::new(service), ModelConfig::default(), RetryPolicy::default());
        BatchOrchestrator::new(
            gateway,
            Box::new(SocraticPromptBuilder::new()),
            OrchestratorConfig {
                workers: 1,
                deadline: Some(deadline),
            },
        )
    }

    fn enriched_ids(outcome: &BatchOutcome<'_>) -> Vec<String> {
        outcome
            .records
            .iter()
            .filter(|e| !e.analysis.is_default())
            .map(|e| e.record.key().to_string())
            .collect()
    }

    #[test]
    fn only_qualifying_learner_rows_are_enriched() {
        let store = two_participant_store();
        let service = Arc::new(ScriptedClassifier::new(PAIR_REPLY));

        let outcome = orchestrator(service.clone(), 2)
            .run(&store, AnalysisMode::StudentPairs, &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.records.len(), store.len());
        assert_eq!(enriched_ids(&outcome), vec!["u1/s2", "u1/s3"]);
        assert_eq!(service.calls(), 2);

        let s = &outcome.summary;
        assert_eq!(s.participants_paired, 1);
        assert_eq!(s.participants_skipped, 1);
        assert_eq!(s.units_total, 2);
        assert_eq!(s.units_succeeded, 2);
        assert_eq!(s.units_not_attempted, 0);
        assert_eq!(s.records_enriched, 2);
        assert_eq!(s.learners_with_labels, 2);
        assert!(!s.halted_empty);
        assert!(!s.cancelled);
    }

    #[test]
    fn output_preserves_store_order() {
        let store = two_participant_store();
        let outcome = orchestrator(Arc::new(ScriptedClassifier::new(PAIR_REPLY)), 4)
            .run(&store, AnalysisMode::StudentPairs, &CancellationToken::new())
            .unwrap();

        let ids: Vec<_> = outcome.records.iter().map(|e| e.record.key()).collect();
        let expected: Vec<_> = store.records().iter().map(|r| r.key()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn worker_count_does_not_change_output() {
        let store = two_participant_store();
        let single = orchestrator(Arc::new(ScriptedClassifier::new(PAIR_REPLY)), 1)
            .run(&store, AnalysisMode::StudentPairs, &CancellationToken::new())
            .unwrap();
        let many = orchestrator(Arc::new(ScriptedClassifier::new(PAIR_REPLY)), 8)
            .run(&store, AnalysisMode::StudentPairs, &CancellationToken::new())
            .unwrap();

        assert_eq!(single.records, many.records);
    }

    #[test]
    fn no_eligible_units_halts_without_calls() {
        use InteractionType::{AgentTurn as A, LearnerTurn as L};
        let store = RecordStore::from_records(vec![rec("u1", "a1", A), rec("u1", "s2", L)]);
        let service = Arc::new(ScriptedClassifier::new(PAIR_REPLY));

        let outcome = orchestrator(service.clone(), 4)
            .run(&store, AnalysisMode::StudentPairs, &CancellationToken::new())
            .unwrap();

        assert_eq!(service.calls(), 0);
        assert!(outcome.summary.halted_empty);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|e| e.analysis.is_default()));
    }

    #[test]
    fn empty_store_halts_gracefully() {
        let store = RecordStore::default();
        let outcome = orchestrator(Arc::new(ScriptedClassifier::new(PAIR_REPLY)), 4)
            .run(&store, AnalysisMode::AgentOnly, &CancellationToken::new())
            .unwrap();

        assert!(outcome.records.is_empty());
        assert!(outcome.summary.halted_empty);
    }

    #[test]
    fn cancellation_before_start_classifies_nothing() {
        let store = two_participant_store();
        let service = Arc::new(ScriptedClassifier::new(PAIR_REPLY));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = orchestrator(service.clone(), 2)
            .run(&store, AnalysisMode::StudentPairs, &token)
            .unwrap();

        assert_eq!(service.calls(), 0);
        assert!(outcome.summary.cancelled);
        assert_eq!(outcome.summary.units_not_attempted, 2);
        assert_eq!(outcome.records.len(), store.len());
        assert!(outcome.records.iter().all(|e| e.analysis.is_default()));
    }

    #[test]
    fn zero_deadline_cancels_the_run() {
        let store = two_participant_store();
        let service = Arc::new(ScriptedClassifier::new(PAIR_REPLY));

        let outcome = timed_orchestrator(service.clone(), Duration::ZERO)
            .run(&store, AnalysisMode::StudentPairs, &CancellationToken::new())
            .unwrap();

        assert!(outcome.summary.cancelled);
        assert_eq!(service.calls(), 0);
        assert_eq!(outcome.records.len(), store.len());
    }

    #[test]
    fn expired_deadline_leaves_the_caller_token_usable() {
        let store = two_participant_store();
        let service = Arc::new(ScriptedClassifier::new(PAIR_REPLY));
        let caller = CancellationToken::new();

        let first = timed_orchestrator(service.clone(), Duration::ZERO)
            .run(&store, AnalysisMode::StudentPairs, &caller)
            .unwrap();
        assert!(first.summary.cancelled);
        assert!(!caller.is_cancelled());

        let second = orchestrator(service.clone(), 1)
            .run(&store, AnalysisMode::StudentPairs, &caller)
            .unwrap();

        assert!(!second.summary.cancelled);
        assert_eq!(second.summary.units_succeeded, 2);
        assert_eq!(enriched_ids(&second), vec!["u1/s2", "u1/s3"]);
        assert_eq!(service.calls(), 2);
        assert!(!caller.is_cancelled());
    }

    /// Answers every query and cancels `token` while serving call `at`.
    struct CancelOnCall {
        token: CancellationToken,
        at: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ClassifierService for CancelOnCall {
        fn query(&self, _model: &ModelConfig, _prompt: &str) -> Result<ClassifierReply, ClassificationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.at {
                self.token.cancel();
            }
            Ok(ClassifierReply {
                response: PAIR_REPLY.to_string(),
            })
        }
    }

    #[test]
    fn cancellation_mid_batch_keeps_finished_units() {
        use InteractionType::{AgentTurn as A, LearnerTurn as L};
        let mut records = Vec::new();
        for n in 1..=6 {
            records.push(rec("u1", &format!("s{n}"), L));
            records.push(rec("u1", &format!("a{n}"), A));
        }
        let store = RecordStore::from_records(records);

        let token = CancellationToken::new();
        let service = Arc::new(CancelOnCall {
            token: token.clone(),
            at: 2,
            calls: AtomicUsize::new(0),
        });
        let gateway = ClassifierGateway::new(Box::new(service.clone()), ModelConfig::default(), RetryPolicy::default())
            .with_sleeper(Box::new(RecordingSleeper::new()));
        let orchestrator = BatchOrchestrator::new(
            gateway,
            Box::new(SocraticPromptBuilder::new()),
            OrchestratorConfig {
                workers: 1,
                deadline: None,
            },
        );

        let outcome = orchestrator.run(&store, AnalysisMode::StudentPairs, &token).unwrap();

        // The unit in flight when the token tripped keeps its result.
        assert_eq!(enriched_ids(&outcome), vec!["u1/s2", "u1/s3"]);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        for id in ["s4", "s5", "s6"] {
            let row = outcome
                .records
                .iter()
                .find(|e| e.record.interaction_id == id)
                .unwrap();
            assert!(row.analysis.is_default(), "{id} should keep default columns");
        }

        let s = &outcome.summary;
        assert!(s.cancelled);
        assert_eq!(s.units_total, 5);
        assert_eq!(s.units_succeeded, 2);
        assert_eq!(s.units_not_attempted, 3);
        assert_eq!(outcome.records.len(), store.len());
    }

    #[test]
    fn blank_interaction_id_skips_only_that_participant() {
        let source = RowsSource::new(
            [
                serde_json::json!({"participant_id": "good", "interaction_id": "s1", "interaction_type": "learner_turn", "text": "a"}),
                serde_json::json!({"participant_id": "good", "interaction_id": "a1", "interaction_type": "agent_turn", "text": "b"}),
                serde_json::json!({"participant_id": "bad", "interaction_id": "", "interaction_type": "learner_turn", "text": "c"}),
                serde_json::json!({"participant_id": "good", "interaction_id": "s2", "interaction_type": "learner_turn", "text": "d"}),
                serde_json::json!({"participant_id": "bad", "interaction_id": "a1", "interaction_type": "agent_turn", "text": "e"}),
                serde_json::json!({"participant_id": "bad", "interaction_id": "s2", "interaction_type": "learner_turn", "text": "f"}),
            ]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect(),
        );
        let store = RecordStore::load(&source).unwrap();

        let outcome = orchestrator(Arc::new(ScriptedClassifier::new(PAIR_REPLY)), 2)
            .run(&store, AnalysisMode::StudentPairs, &CancellationToken::new())
            .unwrap();

        assert_eq!(enriched_ids(&outcome), vec!["good/s2"]);
        assert_eq!(outcome.summary.participants_malformed, 1);
        assert_eq!(outcome.summary.participants_paired, 1);
        assert_eq!(outcome.records.len(), 6);
    }

    #[test]
    fn failing_classifier_marks_every_agent_turn_as_error() {
        let store = two_participant_store();
        let service = Arc::new(ScriptedClassifier::failing(ClassificationError::Timeout(60)));

        let outcome = orchestrator(service.clone(), 3)
            .run(&store, AnalysisMode::AgentOnly, &CancellationToken::new())
            .unwrap();

        let agent_rows: Vec<_> = outcome
            .records
            .iter()
            .filter(|e| e.record.is_agent_turn())
            .collect();
        assert_eq!(agent_rows.len(), 4);
        for row in agent_rows {
            let AnalysisColumns::Agent(c) = &row.analysis else {
                panic!("expected agent columns");
            };
            assert_eq!(c.label, "Error");
            assert!(c.rationale.starts_with("Processing error: "));
        }
        assert_eq!(outcome.summary.units_failed, 4);
        assert_eq!(service.calls(), 12);
        assert!(outcome
            .records
            .iter()
            .filter(|e| e.record.is_learner_turn())
            .all(|e| e.analysis.is_default()));
    }

    // ═══════════════════════════════════════════
    // End to end through files and HTTP
    // ═══════════════════════════════════════════

    fn serve(router: axum::Router) -> String {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, router).await.unwrap();
            });
        });
        format!("http://{}/query", rx.recv().unwrap())
    }

    #[test]
    fn run_from_config_reads_classifies_and_writes() {
        let router = axum::Router::new().route(
            "/query",
            axum::routing::post(|| async { axum::Json(serde_json::json!({ "response": PAIR_REPLY })) }),
        );
        let url = serve(router);

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("log.json");
        let output = dir.path().join("out").join("enriched.jsonl");
        std::fs::write(
            &input,
            serde_json::json!([
                {"Asurite": "u1", "Interaction ID": "s1", "Interaction Type": "Student Query", "Text": "hi"},
                {"Asurite": "u1", "Interaction ID": "a1", "Interaction Type": "Bot Response", "Text": "Why?"},
                {"Asurite": "u1", "Interaction ID": "s2", "Interaction Type": "Student Query", "Text": "Because."},
                {"Asurite": "u1", "Interaction ID": "a2", "Interaction Type": "Bot Response", "Text": "Bye"}
            ])
            .to_string(),
        )
        .unwrap();

        let config = AnnotatorConfig {
            input_path: input,
            output_path: output.clone(),
            api_url: url,
            workers: 2,
            request_timeout_secs: 10,
            ..AnnotatorConfig::default()
        };

        let summary = run_from_config(&config, &CancellationToken::new()).unwrap();

        assert_eq!(summary.records, 4);
        assert_eq!(summary.units_succeeded, 1);
        let written = std::fs::read_to_string(&output).unwrap();
        let rows: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2]["labels"], "Reasons_Evidence");
        assert_eq!(rows[2]["label_count"], 1);
        assert_eq!(rows[0]["labels"], "");

        // Core values go back under the headers they were read from.
        assert_eq!(rows[0]["Asurite"], "u1");
        assert_eq!(rows[0]["Interaction ID"], "s1");
        assert_eq!(rows[0]["Interaction Type"], "Student Query");
        assert_eq!(rows[1]["Interaction Type"], "Bot Response");
        assert_eq!(rows[0]["Text"], "hi");
        for canonical in ["participant_id", "interaction_id", "interaction_type", "text", "timestamp"] {
            assert!(rows[0].get(canonical).is_none(), "unexpected column {canonical}");
        }
    }

    #[test]
    fn cancelled_run_from_config_still_writes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("log.csv");
        let output = dir.path().join("enriched.csv");
        std::fs::write(
            &input,
            "participant_id,interaction_id,interaction_type,text\n\
             u1,s1,learner_turn,hi\n\
             u1,a1,agent_turn,Why?\n\
             u1,s2,learner_turn,Because.\n",
        )
        .unwrap();

        let config = AnnotatorConfig {
            input_path: input,
            output_path: output.clone(),
            // Never contacted: the token is already cancelled.
            api_url: "http://127.0.0.1:9/query".into(),
            ..AnnotatorConfig::default()
        };
        let token = CancellationToken::new();
        token.cancel();

        let summary = run_from_config(&config, &token).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.units_not_attempted, 1);
        let written = std::fs::read_to_string(&output).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next().unwrap(),
            "participant_id,interaction_id,interaction_type,text,labels,reasoning,label_count"
        );
        assert_eq!(lines.next().unwrap(), "u1,s1,learner_turn,hi,,,0");
        assert_eq!(written.lines().count(), 4);
    }

    #[test]
    fn run_from_config_fails_on_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnnotatorConfig {
            input_path: dir.path().join("absent.json"),
            output_path: dir.path().join("out.json"),
            ..AnnotatorConfig::default()
        };

        assert!(matches!(
            run_from_config(&config, &CancellationToken::new()),
            Err(PipelineError::Load(_))
        ));
    }
}
