//! Pipeline run coordinator
//!
//! Runs the three stages in order, each starting only after the previous one
//! succeeded:
//! 1. Extract: download the raw batch into `source/logs.json`
//! 2. Transform: normalize it into `source/transformed.parquet`
//! 3. Load: bulk insert the normalized rows into the document store
//!
//! A failed stage is re-executed from scratch under the [`RetryPolicy`];
//! once its attempts are exhausted the run ends `Failed` and no later stage
//! starts.

use crate::config::{PipelineConfig, RetryPolicy};
use crate::fetch::Fetcher;
use crate::load::Loader;
use crate::source::SourceFile;
use crate::store::StoreConnector;
use crate::transform::Transformer;
use crate::variables::ConnectionResolver;
use chrono::{DateTime, Utc};
use evt_common::{ArtifactLocation, EtlError, Result, Stage};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Extracting,
    Transforming,
    Loading,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &str {
        match self {
            RunState::Pending => "pending",
            RunState::Extracting => "extracting",
            RunState::Transforming => "transforming",
            RunState::Loading => "loading",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        }
    }

    /// The state a run is in while `stage` executes
    pub fn running(stage: Stage) -> Self {
        match stage {
            Stage::Extract => RunState::Extracting,
            Stage::Transform => RunState::Transforming,
            Stage::Load => RunState::Loading,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

/// Outcome of one stage, across all of its attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub attempts: u32,
    pub succeeded: bool,
    pub output: Option<ArtifactLocation>,
    pub error: Option<String>,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub history: Vec<StateTransition>,
    pub stages: Vec<StageReport>,
    pub inserted: Option<u64>,
    pub error: Option<String>,
}

impl RunReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: None,
            state: RunState::Pending,
            history: vec![StateTransition {
                state: RunState::Pending,
                at: now,
            }],
            stages: Vec::new(),
            inserted: None,
            error: None,
        }
    }

    fn transition(&mut self, state: RunState) {
        self.state = state;
        self.history.push(StateTransition {
            state,
            at: Utc::now(),
        });
    }

    fn fail(&mut self, stage: Stage, attempts: u32, err: &EtlError) {
        self.stages.push(StageReport {
            stage,
            attempts,
            succeeded: false,
            output: None,
            error: Some(err.to_string()),
        });
        self.error = Some(format!("{} stage failed: {}", stage, err));
        self.finish(RunState::Failed);
    }

    fn finish(&mut self, state: RunState) {
        self.transition(state);
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// States visited, in order
    pub fn states(&self) -> Vec<RunState> {
        self.history.iter().map(|t| t.state).collect()
    }
}

/// Drives one extract, transform, load sequence per run
pub struct PipelineCoordinator<C> {
    source: SourceFile,
    fetcher: Fetcher,
    transformer: Transformer,
    loader: Loader<C>,
    retry: RetryPolicy,
}

impl<C: StoreConnector> PipelineCoordinator<C> {
    /// Coordinator resolving the connection string from the configured
    /// variables file, then the process environment
    pub fn new(config: PipelineConfig, connector: C) -> Result<Self> {
        let resolver = ConnectionResolver::from_sources(
            config.store.connection_key.clone(),
            config.variables_file.as_deref(),
        )?;
        Self::with_resolver(config, connector, resolver)
    }

    pub fn with_resolver(
        config: PipelineConfig,
        connector: C,
        resolver: ConnectionResolver,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(config.staging.clone(), &config.source)?;
        Ok(Self::from_parts(config, fetcher, connector, resolver))
    }

    pub fn from_parts(
        config: PipelineConfig,
        fetcher: Fetcher,
        connector: C,
        resolver: ConnectionResolver,
    ) -> Self {
        Self {
            source: SourceFile::parse(&config.source.source),
            fetcher,
            transformer: Transformer::new(config.staging.clone()),
            loader: Loader::new(connector, config.staging, config.store, resolver),
            retry: config.retry,
        }
    }

    /// Run every stage, starting from extract
    pub async fn run(&self) -> RunReport {
        self.resume_from(Stage::Extract).await
    }

    /// Run `start` and the stages after it. Earlier stages are assumed to
    /// have left their artifacts at the well-known staging paths.
    pub async fn resume_from(&self, start: Stage) -> RunReport {
        let mut report = RunReport::new();
        let span = info_span!("pipeline_run", run_id = %report.run_id, start = %start);

        async {
            info!(source = %self.source, "Pipeline run started");
            self.drive(start, &mut report).await;

            match report.state {
                RunState::Succeeded => {
                    info!(inserted = report.inserted.unwrap_or(0), "Pipeline run succeeded")
                },
                _ => error!(
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "Pipeline run failed"
                ),
            }
        }
        .instrument(span)
        .await;

        report
    }

    async fn drive(&self, start: Stage, report: &mut RunReport) {
        let mut handoff: Option<ArtifactLocation> = None;

        for stage in Stage::ALL.into_iter().filter(|s| *s >= start) {
            report.transition(RunState::running(stage));
            let input = handoff.take();
            let input = input.as_ref();

            let (outcome, attempts) = match stage {
                Stage::Extract => {
                    let (result, attempts) =
                        self.execute(stage, || self.fetcher.fetch(&self.source)).await;
                    (result.map(|location| (Some(location), None)), attempts)
                },
                Stage::Transform => {
                    let (result, attempts) =
                        self.execute(stage, || self.transformer.transform(input)).await;
                    (result.map(|location| (Some(location), None)), attempts)
                },
                Stage::Load => {
                    let (result, attempts) =
                        self.execute(stage, || self.loader.load(input)).await;
                    (result.map(|inserted| (None, Some(inserted))), attempts)
                },
            };

            match outcome {
                Ok((output, inserted)) => {
                    report.stages.push(StageReport {
                        stage,
                        attempts,
                        succeeded: true,
                        output: output.clone(),
                        error: None,
                    });
                    if inserted.is_some() {
                        report.inserted = inserted;
                    }
                    handoff = output;
                },
                Err(err) => {
                    report.fail(stage, attempts, &err);
                    return;
                },
            }
        }

        report.finish(RunState::Succeeded);
    }

    /// Execute a stage until it succeeds or the retry policy gives up.
    /// Returns the final outcome and the number of attempts made.
    async fn execute<T, F, Fut>(&self, stage: Stage, mut op: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;

        loop {
            info!(stage = %stage, attempt, max_attempts, "Stage started");

            match op().await {
                Ok(value) => {
                    info!(stage = %stage, attempt, "Stage succeeded");
                    return (Ok(value), attempt);
                },
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    warn!(
                        stage = %stage,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        delay_secs = self.retry.delay.as_secs(),
                        "Stage failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                },
                Err(err) => {
                    error!(stage = %stage, attempt, kind = err.kind(), error = %err, "Stage failed");
                    return (Err(err), attempt);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_states() {
        assert_eq!(RunState::running(Stage::Extract), RunState::Extracting);
        assert_eq!(RunState::running(Stage::Transform), RunState::Transforming);
        assert_eq!(RunState::running(Stage::Load), RunState::Loading);
    }

    #[test]
    fn test_report_records_failure() {
        let mut report = RunReport::new();
        report.transition(RunState::Extracting);
        report.fail(Stage::Extract, 2, &EtlError::transfer(Some(500), "boom"));

        assert_eq!(
            report.states(),
            [RunState::Pending, RunState::Extracting, RunState::Failed]
        );
        assert!(!report.succeeded());
        assert!(report.finished_at.is_some());
        assert_eq!(report.stage(Stage::Extract).map(|s| s.attempts), Some(2));
        assert!(report.error.as_deref().unwrap_or_default().starts_with("extract stage failed"));
    }

    #[test]
    fn test_report_serializes() {
        let report = RunReport::new();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "pending");
        assert!(json["run_id"].is_string());
    }
}
