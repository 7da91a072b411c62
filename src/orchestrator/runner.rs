use super::{Orchestrator, StageObserver};
use crate::defects;
use crate::engine::ExecutionRequest;
use crate::errors::OrchestratorError;
use crate::generator::GenerationContext;
use crate::metrics::extract_from_report;
use crate::policy::{self, Decision};
use crate::util::strip_code_fences;
use refinery_common::{Session, Stage, StageEvent};
use tokio_util::sync::CancellationToken;

impl Orchestrator {
    /// Drive `session` through the stage machine until the policy ends the run,
    /// a collaborator fails fatally, or `cancel` fires.
    ///
    /// `max_iterations` caps the session's total generation attempts. A
    /// finished session is returned unchanged.
    pub async fn run(
        &self,
        mut session: Session,
        max_iterations: u32,
        observer: Option<&StageObserver>,
        cancel: &CancellationToken,
    ) -> Result<Session, OrchestratorError> {
        if max_iterations == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "maxIterations must be at least 1".into(),
            ));
        }
        if session.finished {
            tracing::info!(session_id = %session.id, "Session already finished, nothing to run");
            return Ok(session);
        }
        session.cancelled = false;

        let mut stage = policy::initial_stage(&session, max_iterations);
        session.pending_stage = None;
        loop {
            if cancel.is_cancelled() {
                session.cancelled = true;
                session.pending_stage = Some(stage);
                session.touch();
                self.collaborators.store.put(&session).await?;
                tracing::info!(
                    session_id = %session.id,
                    iteration = session.iteration,
                    next = %stage,
                    "Run cancelled"
                );
                return Ok(session);
            }

            tracing::debug!(session_id = %session.id, iteration = session.iteration, stage = %stage, "Entering stage");
            self.run_stage(stage, &mut session, max_iterations).await?;
            self.collaborators.store.put(&session).await?;
            if let Some(tx) = observer {
                // A departed observer does not stop the run.
                let _ = tx.send(StageEvent::after(stage, &session));
            }

            match policy::next_stage(stage, &session, max_iterations) {
                Some(next) => stage = next,
                None => break,
            }
        }

        tracing::info!(
            session_id = %session.id,
            iteration = session.iteration,
            satisfactory = session.satisfactory,
            "Run finished"
        );
        Ok(session)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        session: &mut Session,
        max_iterations: u32,
    ) -> Result<(), OrchestratorError> {
        match stage {
            Stage::Enrichment => {
                let enrichment = self.collaborators.enrichment.resolve(&session.requirement).await;
                session.enrichment = Some(enrichment);
                session.touch();
            }
            Stage::Generate => self.generate(session).await?,
            Stage::Validate => self.validate(session).await?,
            Stage::Execute => self.execute(session).await,
            Stage::Evaluate => {
                let verdict = match &session.metrics {
                    Some(m) if !session.has_defects() => self.collaborators.criterion.is_satisfactory(m),
                    _ => false,
                };
                session.mark_satisfactory(verdict);
                tracing::info!(session_id = %session.id, iteration = session.iteration, satisfactory = verdict, "Evaluated");
            }
            Stage::Policy => {
                let decision = policy::decide(session, max_iterations);
                tracing::debug!(session_id = %session.id, iteration = session.iteration, ?decision, "Policy verdict");
                if decision == Decision::Continue && session.iteration >= max_iterations {
                    tracing::warn!(
                        session_id = %session.id,
                        max_iterations,
                        "Iteration budget exhausted"
                    );
                }
            }
            Stage::Report => self.report(session).await?,
        }
        Ok(())
    }

    async fn call_generator(
        &self,
        stage: Stage,
        ctx: &GenerationContext,
    ) -> Result<String, OrchestratorError> {
        let deadline = self.settings.generator_timeout;
        match tokio::time::timeout(deadline, self.collaborators.generator.generate(ctx)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(OrchestratorError::collaborator(stage, format!("{:#}", e))),
            Err(_) => Err(OrchestratorError::Timeout {
                stage,
                secs: deadline.as_secs(),
            }),
        }
    }

    async fn generate(&self, session: &mut Session) -> Result<(), OrchestratorError> {
        let ctx = GenerationContext::for_session(session);
        let raw = self.call_generator(Stage::Generate, &ctx).await?;
        session.record_artifact(strip_code_fences(&raw));
        tracing::info!(
            session_id = %session.id,
            iteration = session.iteration,
            mode = ctx.mode.as_str(),
            "Generated artifact"
        );
        Ok(())
    }

    async fn validate(&self, session: &mut Session) -> Result<(), OrchestratorError> {
        let artifact = session.current_artifact.clone().unwrap_or_default();
        let found = self
            .collaborators
            .validator
            .validate(&artifact)
            .await
            .map_err(|e| OrchestratorError::collaborator(Stage::Validate, format!("{:#}", e)))?;
        let log = defects::normalize(found);
        if !log.is_empty() {
            tracing::info!(session_id = %session.id, iteration = session.iteration, defects = log.len(), "Validation rejected artifact");
        }
        session.record_defects(log);
        Ok(())
    }

    /// Engine failures never escape: they become one defect and clear metrics.
    async fn execute(&self, session: &mut Session) {
        let params = &session.domain_parameters;
        let request = ExecutionRequest {
            session_id: session.id.clone(),
            iteration: session.iteration,
            artifact: session.current_artifact.clone().unwrap_or_default(),
            timerange: params
                .get_str("timerange")
                .unwrap_or_else(|| self.settings.timerange.clone()),
            pairs: params.get_list("pairs"),
            timeframe: params.get_str("timeframe"),
        };

        match self.collaborators.engine.execute(&request).await {
            Ok(report) => {
                let (metrics, excerpt) = match report.structured {
                    Some(m) => (m.normalized(), None),
                    None => {
                        let extraction = extract_from_report(&report.stdout);
                        (extraction.metrics, extraction.raw_excerpt)
                    }
                };
                session.record_defects(Vec::new());
                session.record_metrics(metrics, excerpt);
                tracing::info!(
                    session_id = %session.id,
                    iteration = session.iteration,
                    trades = metrics.total_trades,
                    profit_pct = metrics.profit_total_pct,
                    "Backtest succeeded"
                );
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, iteration = session.iteration, error = %e, "Backtest failed");
                session.record_defects(defects::from_engine_error(&e));
                session.clear_metrics();
            }
        }
    }

    async fn report(&self, session: &mut Session) -> Result<(), OrchestratorError> {
        let ctx = GenerationContext::summarize(session);
        let text = self.call_generator(Stage::Report, &ctx).await?;
        session.report = Some(text.trim().to_string());
        session.finished = true;
        session.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::{Collaborators, Orchestrator};
    use super::*;
    use crate::engine::ExecutionReport;
    use crate::errors::EngineError;
    use crate::generator::{ContentGenerator, GenerationMode};
    use crate::store::SessionStore;
    use async_trait::async_trait;
    use refinery_common::{MetricsRecord, SubmitRequest};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    #[tokio::test]
    async fn test_always_invalid_generator_exhausts_budget() {
        let engine = FnEngine::printing(PASSING_REPORT);
        let h = harness(FnGenerator::fixed(INVALID), engine.clone());
        let session = h.orchestrator.submit(request(3), None).await.unwrap();

        assert_eq!(session.iteration, 3);
        assert!(!session.satisfactory);
        assert!(!session.defects.is_empty());
        assert!(session.finished);
        assert_eq!(session.report.as_deref(), Some("final report"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0, "invalid artifacts are never executed");
    }

    #[tokio::test]
    async fn test_aggregate_row_report_succeeds_on_first_iteration() {
        let h = harness(FnGenerator::fixed(VALID), FnEngine::printing(PASSING_REPORT));
        let session = h.orchestrator.submit(request(3), None).await.unwrap();

        assert_eq!(session.iteration, 1);
        assert!(session.satisfactory);
        assert!(session.defects.is_empty());
        let m = session.metrics.unwrap();
        assert_eq!(m.total_trades, 50);
        assert!((m.profit_total_abs - 25.0).abs() < 1e-9);
        assert!((m.profit_total_pct - 5.0).abs() < 1e-9);
        assert_eq!(session.current_artifact.as_deref(), Some("class AI_Strategy:\n    pass"));
    }

    #[tokio::test]
    async fn test_two_engine_timeouts_then_success() {
        let engine = FnEngine::new(|n, _| {
            if n < 2 {
                Err(EngineError::Timeout { secs: 600 })
            } else {
                Ok(stdout(PASSING_REPORT))
            }
        });
        let h = harness(FnGenerator::fixed(VALID), engine.clone());
        let session = h.orchestrator.submit(request(5), None).await.unwrap();

        assert_eq!(session.iteration, 3);
        assert!(session.satisfactory);
        assert!(session.defects.is_empty());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_defect_and_clears_metrics() {
        let engine = FnEngine::new(|n, _| {
            if n == 0 {
                Ok(stdout(LOSING_REPORT))
            } else {
                Err(EngineError::NonZeroExit {
                    code: 1,
                    stderr: "ImportError: talib".into(),
                })
            }
        });
        let h = harness(FnGenerator::fixed(VALID), engine);
        let session = h.orchestrator.submit(request(2), None).await.unwrap();

        assert_eq!(session.iteration, 2);
        assert!(!session.satisfactory);
        assert!(session.metrics.is_none());
        assert_eq!(session.defects.len(), 1);
        assert!(session.defects[0].contains("ImportError: talib"));
    }

    #[tokio::test]
    async fn test_enrichment_runs_once_across_refinements() {
        let generator = FnGenerator::new(|ctx| match ctx.mode {
            GenerationMode::Summarize => Ok("report".into()),
            GenerationMode::Refine => {
                assert!(ctx.enrichment.is_some(), "refinement keeps cached enrichment");
                Ok(VALID.into())
            }
            _ => Ok(VALID.into()),
        });
        let h = harness(generator.clone(), FnEngine::printing(LOSING_REPORT));
        let session = h.orchestrator.submit(request(4), None).await.unwrap();

        assert_eq!(session.iteration, 4);
        assert!(!session.satisfactory);
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 1);
        let enrichment = session.enrichment.unwrap();
        assert!(enrichment.knowledge.contains("oversold"));
        assert!(enrichment.factors.contains("RSI"));
        assert_eq!(
            generator.modes(),
            vec![
                GenerationMode::Generate,
                GenerationMode::Refine,
                GenerationMode::Refine,
                GenerationMode::Refine,
                GenerationMode::Summarize,
            ]
        );
    }

    #[tokio::test]
    async fn test_iteration_never_exceeds_budget() {
        for max in 1..=4 {
            let h = harness(FnGenerator::fixed(VALID), FnEngine::printing(LOSING_REPORT));
            let session = h.orchestrator.submit(request(max), None).await.unwrap();
            assert!(session.iteration <= max);
            assert!(session.finished);
        }
    }

    #[tokio::test]
    async fn test_satisfactory_implies_clean_profitable_metrics() {
        let engine = FnEngine::new(|n, _| match n {
            0 => Ok(stdout("TOTAL | 0 | 0.00 | 0.0 | 0.0")),
            1 => Ok(stdout(LOSING_REPORT)),
            _ => Ok(stdout(PASSING_REPORT)),
        });
        let h = harness(FnGenerator::fixed(VALID), engine);
        let session = h.orchestrator.submit(request(5), None).await.unwrap();

        assert!(session.satisfactory);
        assert_eq!(session.iteration, 3);
        assert!(session.defects.is_empty());
        let m = session.metrics.unwrap();
        assert!(m.total_trades > 0 && m.profit_total_pct > 0.0);
    }

    #[tokio::test]
    async fn test_resume_before_generation_matches_fresh_session() {
        let fresh = harness(FnGenerator::fixed(VALID), FnEngine::printing(PASSING_REPORT));
        let a = fresh.orchestrator.submit(request(3), None).await.unwrap();

        let resumed = harness(FnGenerator::fixed(VALID), FnEngine::printing(PASSING_REPORT));
        resumed
            .store
            .create(&Session::new("abc", "RSI mean-reversion"))
            .await
            .unwrap();
        let b = resumed
            .orchestrator
            .submit(
                SubmitRequest {
                    session_id: Some("abc".into()),
                    is_new_session: false,
                    ..request(3)
                },
                None,
            )
            .await
            .unwrap();

        let (pa, pb) = (a.project(), b.project());
        assert_eq!(pb.session_id, "abc");
        assert_eq!(pa.iteration, pb.iteration);
        assert_eq!(pa.satisfactory, pb.satisfactory);
        assert_eq!(pa.artifact, pb.artifact);
        assert_eq!(pa.metrics, pb.metrics);
        assert_eq!(pa.defects, pb.defects);
        assert_eq!(pa.report, pb.report);
        assert_eq!(resumed.search.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_with_artifact_refines_and_skips_enrichment() {
        let generator = FnGenerator::fixed(VALID);
        let h = harness(generator.clone(), FnEngine::printing(PASSING_REPORT));
        let mut stored = Session::new("resume-1", "RSI mean-reversion");
        stored.record_artifact("class AI_Strategy:\n    INVALID".into());
        stored.record_defects(vec!["SyntaxError: invalid syntax (line 2)".into()]);
        h.store.create(&stored).await.unwrap();

        let session = h
            .orchestrator
            .submit(
                SubmitRequest {
                    session_id: Some("resume-1".into()),
                    is_new_session: false,
                    ..request(3)
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
        assert_eq!(generator.modes()[0], GenerationMode::Refine);
        assert_eq!(session.iteration, 2);
        assert!(session.satisfactory);
    }

    #[tokio::test]
    async fn test_resume_unknown_id_starts_fresh() {
        let h = harness(FnGenerator::fixed(VALID), FnEngine::printing(PASSING_REPORT));
        let session = h
            .orchestrator
            .submit(
                SubmitRequest {
                    session_id: Some("never-seen".into()),
                    is_new_session: false,
                    ..request(2)
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(session.id, "never-seen");
        assert_eq!(session.iteration, 1);
    }

    #[tokio::test]
    async fn test_finished_session_is_returned_unchanged() {
        let generator = FnGenerator::fixed(VALID);
        let h = harness(generator.clone(), FnEngine::printing(PASSING_REPORT));
        let first = h.orchestrator.submit(request(3), None).await.unwrap();
        let calls = generator.modes().len();

        let again = h
            .orchestrator
            .submit(
                SubmitRequest {
                    session_id: Some(first.id.clone()),
                    is_new_session: false,
                    ..request(3)
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(again.project(), first.project());
        assert_eq!(generator.modes().len(), calls);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_stage() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let generator = FnGenerator::new(move |ctx| {
            if ctx.mode == GenerationMode::Generate {
                trigger.cancel();
            }
            Ok(VALID.into())
        });
        let engine = FnEngine::printing(PASSING_REPORT);
        let h = harness(generator, engine.clone());
        let fresh = Session::new("c-1", "RSI mean-reversion");
        h.store.create(&fresh).await.unwrap();

        let session = h
            .orchestrator
            .run(fresh, 3, None, &token)
            .await
            .unwrap();

        assert!(session.cancelled);
        assert!(!session.finished);
        assert!(session.report.is_none());
        assert_eq!(session.iteration, 1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        let stored = h.store.get("c-1").await.unwrap().unwrap();
        assert!(stored.cancelled);
        assert_eq!(stored.iteration, 1);
    }

    #[tokio::test]
    async fn test_generator_error_is_fatal_with_stage() {
        let generator = FnGenerator::new(|_| anyhow::bail!("model overloaded"));
        let h = harness(generator, FnEngine::printing(PASSING_REPORT));
        let err = h.orchestrator.submit(request(3), None).await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Generate));
        let structured = err.to_structured();
        assert!(structured.message.contains("model overloaded"));
    }

    struct StalledGenerator;

    #[async_trait]
    impl ContentGenerator for StalledGenerator {
        async fn generate(&self, _ctx: &GenerationContext) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(VALID.into())
        }
    }

    #[tokio::test]
    async fn test_generator_timeout_is_fatal_with_stage() {
        let h = harness_with_timeout(
            FnGenerator::fixed(VALID),
            FnEngine::printing(PASSING_REPORT),
            Duration::from_millis(100),
        );
        let orchestrator = Orchestrator::new(
            Collaborators {
                generator: Arc::new(StalledGenerator),
                ..h.orchestrator.collaborators.clone()
            },
            h.orchestrator.settings.clone(),
        );
        let err = orchestrator.submit(request(3), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { stage: Stage::Generate, .. }));
    }

    #[tokio::test]
    async fn test_observer_sees_every_stage_in_order() {
        let h = harness(FnGenerator::fixed(VALID), FnEngine::printing(PASSING_REPORT));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = h.orchestrator.submit(request(3), Some(&tx)).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Enrichment,
                Stage::Generate,
                Stage::Validate,
                Stage::Execute,
                Stage::Evaluate,
                Stage::Policy,
                Stage::Report,
            ]
        );
        assert!(events.iter().all(|e| e.session_id == session.id));
        assert_eq!(events[0].iteration, 0);
        assert_eq!(events[1].iteration, 1);
        assert_eq!(events.last().unwrap().satisfactory, Some(true));
    }

    #[tokio::test]
    async fn test_domain_parameters_reach_engine() {
        let engine = FnEngine::printing(PASSING_REPORT);
        let h = harness(FnGenerator::fixed(VALID), engine.clone());
        let mut req = request(1);
        req.domain_parameters.insert("timerange", "20240101-20240301");
        req.domain_parameters.insert("pairs", serde_json::json!(["BTC/USDT", "ETH/USDT"]));
        req.domain_parameters.insert("timeframe", "15m");
        h.orchestrator.submit(req, None).await.unwrap();

        let seen = engine.requests.lock().unwrap()[0].clone();
        assert_eq!(seen.timerange, "20240101-20240301");
        assert_eq!(seen.pairs, vec!["BTC/USDT", "ETH/USDT"]);
        assert_eq!(seen.timeframe.as_deref(), Some("15m"));
        assert_eq!(seen.iteration, 1);
    }

    #[tokio::test]
    async fn test_default_timerange_is_used() {
        let engine = FnEngine::printing(PASSING_REPORT);
        let h = harness(FnGenerator::fixed(VALID), engine.clone());
        h.orchestrator.submit(request(1), None).await.unwrap();
        assert_eq!(engine.requests.lock().unwrap()[0].timerange, "20230101-20230201");
    }

    #[tokio::test]
    async fn test_structured_metrics_take_precedence() {
        let engine = FnEngine::new(|_, _| {
            Ok(ExecutionReport {
                stdout: LOSING_REPORT.into(),
                structured: Some(MetricsRecord {
                    total_trades: 7,
                    profit_total_pct: 1.5,
                    ..Default::default()
                }),
            })
        });
        let h = harness(FnGenerator::fixed(VALID), engine);
        let session = h.orchestrator.submit(request(2), None).await.unwrap();
        assert_eq!(session.metrics.unwrap().total_trades, 7);
        assert!(session.satisfactory);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let h = harness(FnGenerator::fixed(VALID), FnEngine::printing(PASSING_REPORT));
        let err = h.orchestrator.submit(request(0), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

        let err = h
            .orchestrator
            .submit(SubmitRequest::new("   "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

        let err = h
            .orchestrator
            .submit(
                SubmitRequest {
                    session_id: Some("../escape".into()),
                    ..request(1)
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(_)));
    }

    /// Holds each generation until the gate is opened.
    struct GatedGenerator {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ContentGenerator for GatedGenerator {
        async fn generate(&self, ctx: &GenerationContext) -> anyhow::Result<String> {
            match ctx.mode {
                GenerationMode::Summarize => Ok("final report".into()),
                _ => {
                    self.gate.notified().await;
                    Ok(VALID.into())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_claimed_run_is_cancellable_before_it_starts() {
        let generator = FnGenerator::fixed(VALID);
        let h = harness(generator.clone(), FnEngine::printing(PASSING_REPORT));
        let mut req = request(3);
        let guard = h.orchestrator.claim(&mut req).unwrap();
        let id = req.session_id.clone().unwrap();
        assert_eq!(guard.id(), id);
        assert!(req.is_new_session);

        let mut again = req.clone();
        assert!(matches!(
            h.orchestrator.claim(&mut again).unwrap_err(),
            OrchestratorError::AlreadyRunning { .. }
        ));

        assert!(h.orchestrator.cancel(&id));
        let session = h.orchestrator.submit_claimed(req, guard, None).await.unwrap();
        assert!(session.cancelled);
        assert_eq!(session.pending_stage, Some(Stage::Enrichment));
        assert!(generator.modes().is_empty());
        assert!(!h.orchestrator.registry().is_running(&id));
    }

    #[tokio::test]
    async fn test_session_is_readable_mid_run() {
        let gate = Arc::new(Notify::new());
        let h = harness(FnGenerator::fixed(VALID), FnEngine::printing(PASSING_REPORT));
        let store = h.store.clone();
        let orchestrator = Orchestrator::new(
            Collaborators {
                generator: Arc::new(GatedGenerator { gate: gate.clone() }),
                ..h.orchestrator.collaborators.clone()
            },
            h.orchestrator.settings.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = SubmitRequest {
            session_id: Some("poll-1".into()),
            ..request(3)
        };
        let run = orchestrator.submit(req, Some(&tx));
        let poll = async {
            let mut snapshots = Vec::new();
            while let Some(event) = rx.recv().await {
                let snapshot = store.get("poll-1").await.unwrap().unwrap();
                snapshots.push((event.stage, snapshot));
                if event.stage == Stage::Enrichment {
                    // Generation waits until the pre-generation state has been read.
                    gate.notify_one();
                }
                if event.stage == Stage::Report {
                    break;
                }
            }
            snapshots
        };
        let (result, snapshots) = tokio::join!(run, poll);
        let session = result.unwrap();

        let (stage, first) = &snapshots[0];
        assert_eq!(*stage, Stage::Enrichment);
        assert_eq!(first.iteration, 0);
        assert!(first.enrichment.is_some());
        assert!(first.current_artifact.is_none());
        assert!(!first.finished);

        let (_, last) = snapshots.last().unwrap();
        assert_eq!(last.iteration, 1);
        assert!(last.finished);
        assert!(session.satisfactory);
    }

    #[tokio::test]
    async fn test_resume_after_cancel_evaluates_executed_artifact() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let engine = FnEngine::new(move |_, _| {
            trigger.cancel();
            Ok(stdout(PASSING_REPORT))
        });
        let generator = FnGenerator::fixed(VALID);
        let h = harness(generator.clone(), engine.clone());
        let fresh = Session::new("c-2", "RSI mean-reversion");
        h.store.create(&fresh).await.unwrap();

        let cancelled = h.orchestrator.run(fresh, 1, None, &token).await.unwrap();
        assert!(cancelled.cancelled);
        assert!(cancelled.metrics.is_some());
        assert!(!cancelled.satisfactory);
        let stored = h.store.get("c-2").await.unwrap().unwrap();
        assert_eq!(stored.pending_stage, Some(Stage::Evaluate));

        // Budget already spent: the executed artifact is still evaluated.
        let resumed = h
            .orchestrator
            .run(stored, 1, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(resumed.satisfactory);
        assert!(resumed.finished);
        assert!(!resumed.cancelled);
        assert_eq!(resumed.iteration, 1);
        assert!(resumed.pending_stage.is_none());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(generator.modes(), vec![GenerationMode::Generate, GenerationMode::Summarize]);
    }

    #[tokio::test]
    async fn test_resume_after_cancel_with_budget_left_keeps_passing_artifact() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let engine = FnEngine::new(move |_, _| {
            trigger.cancel();
            Ok(stdout(PASSING_REPORT))
        });
        let h = harness(FnGenerator::fixed(VALID), engine.clone());
        let fresh = Session::new("c-3", "RSI mean-reversion");
        h.store.create(&fresh).await.unwrap();

        h.orchestrator.run(fresh, 3, None, &token).await.unwrap();
        let stored = h.store.get("c-3").await.unwrap().unwrap();
        let resumed = h
            .orchestrator
            .run(stored, 3, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(resumed.satisfactory);
        assert_eq!(resumed.iteration, 1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }
}
