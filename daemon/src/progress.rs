//! Simulated long-running operations driven by a repeating tick
//!
//! `TrainingRun` and `AnalysisRun` are timer-free state machines; each call to
//! `tick` is one step. `ProgressSimulator` drives them on a tokio interval and
//! reports through `RunEvent`s. A run completes exactly once, on the first
//! tick where accumulated progress reaches 100. A run task that dies before
//! reporting its end still yields one terminal `Failed` event.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::clock;
use crate::config::{Config, ScoringConfig, TrainingConfig};
use crate::db::{ModelStatus, NewModel};
use crate::error::{SimError, SimResult};
use crate::intake::InputFile;
use crate::scorer::{ClassificationResult, ScoreSimulator, Scorer};

pub type RunId = u64;

pub const COMPLETE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Training,
    Analysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Progress moved, run still going.
    Advanced,
    /// This tick finished the run.
    Completed,
    /// Run was already terminal; nothing changed.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Training,
    Active,
}

/// Sample count as stored on a model row.
pub fn sample_count(count: usize) -> SimResult<u32> {
    u32::try_from(count)
        .map_err(|_| SimError::InvalidInput(format!("too many input files ({count}), limit is {}", u32::MAX)))
}

fn require_inputs(model_name: &str, count: usize) -> SimResult<()> {
    if model_name.is_empty() {
        return Err(SimError::InvalidInput("model name must not be empty".into()));
    }
    if count == 0 {
        return Err(SimError::InvalidInput("at least one input file is required".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub model_name: String,
    pub sample_count: u32,
    pub progress: f64,
    pub final_accuracy: Option<f64>,
    pub status: TrainingStatus,
}

impl TrainingRun {
    pub fn start(model_name: &str, samples: &[InputFile]) -> SimResult<Self> {
        require_inputs(model_name, samples.len())?;
        let sample_count = sample_count(samples.len())?;
        Ok(Self {
            model_name: model_name.to_string(),
            sample_count,
            progress: 0.0,
            final_accuracy: None,
            status: TrainingStatus::Training,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.status == TrainingStatus::Active
    }

    pub fn tick<R: Rng>(&mut self, rng: &mut R, params: &TrainingConfig) -> TickOutcome {
        if self.is_complete() {
            return TickOutcome::Finished;
        }
        // (0, max] rather than [0, max)
        let step = params.max_increment - rng.random_range(0.0..params.max_increment);
        let next = self.progress + step;
        if next >= COMPLETE {
            self.progress = COMPLETE;
            self.final_accuracy = Some(rng.random_range(params.accuracy_min..=params.accuracy_max));
            self.status = TrainingStatus::Active;
            return TickOutcome::Completed;
        }
        self.progress = next;
        TickOutcome::Advanced
    }

    /// Row for the model store, with accuracy rounded to one decimal.
    pub fn to_model_record(&self) -> NewModel {
        let accuracy = self.final_accuracy.map(|a| (a * 10.0).round() / 10.0).unwrap_or(0.0);
        NewModel {
            name: self.model_name.clone(),
            accuracy,
            trained_on: clock::local_date(),
            samples: self.sample_count,
            status: match self.status {
                TrainingStatus::Training => ModelStatus::Training,
                TrainingStatus::Active => ModelStatus::Active,
            },
            file_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub model_name: String,
    inputs: Vec<InputFile>,
    results: Vec<ClassificationResult>,
    progress: f64,
}

impl AnalysisRun {
    pub fn start(model_name: &str, batch: Vec<InputFile>) -> SimResult<Self> {
        require_inputs(model_name, batch.len())?;
        Ok(Self {
            model_name: model_name.to_string(),
            results: Vec::with_capacity(batch.len()),
            inputs: batch,
            progress: 0.0,
        })
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn results(&self) -> &[ClassificationResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ClassificationResult> {
        self.results
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.inputs.len()
    }

    /// Scores the next input in order.
    pub fn tick(&mut self, scorer: &mut dyn Scorer) -> TickOutcome {
        if self.is_complete() {
            return TickOutcome::Finished;
        }
        let input = &self.inputs[self.results.len()];
        self.results.push(scorer.score(input));
        if self.is_complete() {
            self.progress = COMPLETE;
            TickOutcome::Completed
        } else {
            self.progress = self.results.len() as f64 / self.inputs.len() as f64 * COMPLETE;
            TickOutcome::Advanced
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Training { run: TrainingRun },
    Analysis { model_name: String, results: Vec<ClassificationResult> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Progress { run_id: RunId, kind: RunKind, percent: f64 },
    Completed { run_id: RunId, outcome: RunOutcome },
    Canceled { run_id: RunId, kind: RunKind, percent: f64 },
    Failed { run_id: RunId, kind: RunKind, reason: String },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::Progress { run_id, .. }
            | RunEvent::Completed { run_id, .. }
            | RunEvent::Canceled { run_id, .. }
            | RunEvent::Failed { run_id, .. } => *run_id,
        }
    }
}

/// Owner's side of a spawned run. Dropping it cancels the run.
pub struct RunHandle {
    id: RunId,
    kind: RunKind,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<RunState>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// Returns false if the run had already stopped.
    pub fn cancel(&mut self) -> bool {
        match self.cancel_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> RunState {
        let RunHandle { cancel_tx, task, .. } = self;
        // keep the cancel channel open until the task is done
        let state = task.await.unwrap_or(RunState::Failed);
        drop(cancel_tx);
        state
    }
}

fn failure_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    match payload.downcast_ref::<&str>() {
        Some(msg) => format!("run panicked: {msg}"),
        None => match payload.downcast_ref::<String>() {
            Some(msg) => format!("run panicked: {msg}"),
            None => "run panicked".to_string(),
        },
    }
}

/// Awaits a run task and reports `Failed` if it ended without a result.
fn supervise(
    run_id: RunId,
    kind: RunKind,
    events: mpsc::UnboundedSender<RunEvent>,
    task: JoinHandle<RunState>,
) -> JoinHandle<RunState> {
    tokio::spawn(async move {
        match task.await {
            Ok(state) => state,
            Err(e) => {
                let reason = failure_reason(e);
                error!(run_id, ?kind, "Run task died: {}", reason);
                let _ = events.send(RunEvent::Failed { run_id, kind, reason });
                RunState::Failed
            }
        }
    })
}

pub struct ProgressSimulator {
    training: TrainingConfig,
    training_period: Duration,
    analysis_period: Duration,
    scoring: ScoringConfig,
    next_id: AtomicU64,
}

impl ProgressSimulator {
    pub fn new(config: &Config) -> Self {
        Self {
            training: config.training.clone(),
            training_period: config.training.tick_interval(),
            analysis_period: config.analysis.tick_interval(),
            scoring: config.scoring,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_run_id(&self) -> RunId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn spawn_training<R>(
        &self,
        model_name: &str,
        samples: &[InputFile],
        mut rng: R,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> SimResult<RunHandle>
    where
        R: Rng + Send + 'static,
    {
        let mut run = TrainingRun::start(model_name, samples)?;
        let run_id = self.next_run_id();
        let params = self.training.clone();
        let period = self.training_period;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        info!(run_id, model = %run.model_name, samples = run.sample_count, "Training run started");

        let watcher = events.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => {
                        info!(run_id, progress = run.progress, "Training run canceled");
                        let _ = events.send(RunEvent::Canceled {
                            run_id,
                            kind: RunKind::Training,
                            percent: run.progress,
                        });
                        return RunState::Canceled;
                    }
                    _ = ticker.tick() => {
                        let outcome = run.tick(&mut rng, &params);
                        debug!(run_id, progress = run.progress, "Training tick");
                        match outcome {
                            TickOutcome::Advanced => {
                                let _ = events.send(RunEvent::Progress {
                                    run_id,
                                    kind: RunKind::Training,
                                    percent: run.progress,
                                });
                            }
                            TickOutcome::Completed => {
                                info!(run_id, accuracy = ?run.final_accuracy, "Training run completed");
                                let _ = events.send(RunEvent::Progress {
                                    run_id,
                                    kind: RunKind::Training,
                                    percent: COMPLETE,
                                });
                                let _ = events.send(RunEvent::Completed {
                                    run_id,
                                    outcome: RunOutcome::Training { run },
                                });
                                return RunState::Completed;
                            }
                            TickOutcome::Finished => return RunState::Completed,
                        }
                    }
                }
            }
        });
        let task = supervise(run_id, RunKind::Training, watcher, task);

        Ok(RunHandle { id: run_id, kind: RunKind::Training, cancel_tx: Some(cancel_tx), task })
    }

    pub fn spawn_analysis<R>(
        &self,
        model_name: &str,
        batch: Vec<InputFile>,
        rng: R,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> SimResult<RunHandle>
    where
        R: Rng + Send + 'static,
    {
        let mut run = AnalysisRun::start(model_name, batch)?;
        let mut scorer = ScoreSimulator::new(self.scoring).with_rng(rng);
        let run_id = self.next_run_id();
        let period = self.analysis_period;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        info!(run_id, model = %run.model_name, files = run.inputs.len(), "Analysis run started");

        let watcher = events.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => {
                        info!(run_id, scored = run.results().len(), "Analysis run canceled");
                        let _ = events.send(RunEvent::Canceled {
                            run_id,
                            kind: RunKind::Analysis,
                            percent: run.progress(),
                        });
                        return RunState::Canceled;
                    }
                    _ = ticker.tick() => {
                        let outcome = run.tick(&mut scorer);
                        if let Some(last) = run.results().last() {
                            debug!(run_id, file = %last.filename, prediction = %last.prediction, "Analysis tick");
                        }
                        match outcome {
                            TickOutcome::Advanced => {
                                let _ = events.send(RunEvent::Progress {
                                    run_id,
                                    kind: RunKind::Analysis,
                                    percent: run.progress(),
                                });
                            }
                            TickOutcome::Completed => {
                                info!(run_id, files = run.results().len(), "Analysis run completed");
                                let _ = events.send(RunEvent::Progress {
                                    run_id,
                                    kind: RunKind::Analysis,
                                    percent: COMPLETE,
                                });
                                let model_name = run.model_name.clone();
                                let _ = events.send(RunEvent::Completed {
                                    run_id,
                                    outcome: RunOutcome::Analysis { model_name, results: run.into_results() },
                                });
                                return RunState::Completed;
                            }
                            TickOutcome::Finished => return RunState::Completed,
                        }
                    }
                }
            }
        });
        let task = supervise(run_id, RunKind::Analysis, watcher, task);

        Ok(RunHandle { id: run_id, kind: RunKind::Analysis, cancel_tx: Some(cancel_tx), task })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn batch(names: &[&str]) -> Vec<InputFile> {
        names.iter().map(|n| InputFile::named(*n)).collect()
    }

    #[test]
    fn test_training_rejects_empty_inputs() {
        assert!(matches!(
            TrainingRun::start("", &batch(&["a.png"])),
            Err(SimError::InvalidInput(_))
        ));
        assert!(matches!(TrainingRun::start("Model", &[]), Err(SimError::InvalidInput(_))));
        // only the empty name is rejected
        assert!(TrainingRun::start("   ", &batch(&["a.png"])).is_ok());
    }

    #[test]
    fn test_sample_count_bounds() {
        assert_eq!(sample_count(3).unwrap(), 3);
        assert_eq!(sample_count(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_sample_count_overflow_is_invalid_input() {
        assert!(matches!(sample_count(u32::MAX as usize + 1), Err(SimError::InvalidInput(_))));
        assert!(matches!(sample_count(usize::MAX), Err(SimError::InvalidInput(_))));
    }

    #[test]
    fn test_training_progress_monotonic_and_clamped() {
        let params = TrainingConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let mut run = TrainingRun::start("CancerDetect v2.0", &batch(&["a.png"])).unwrap();
            let mut last = run.progress;
            let mut ticks = 0;
            loop {
                ticks += 1;
                let outcome = run.tick(&mut rng, &params);
                assert!(run.progress >= last);
                assert!(run.progress <= COMPLETE);
                if outcome == TickOutcome::Completed {
                    break;
                }
                let step = run.progress - last;
                assert!(step > 0.0 && step <= params.max_increment);
                last = run.progress;
            }
            assert_eq!(run.progress, COMPLETE);
            // 100 / 15 rounds up to at least 7 ticks
            assert!(ticks >= 7);
            let accuracy = run.final_accuracy.unwrap();
            assert!((85.0..=95.0).contains(&accuracy));
            assert_eq!(run.status, TrainingStatus::Active);
        }
    }

    #[test]
    fn test_training_tick_after_completion_is_noop() {
        let params = TrainingConfig::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut run = TrainingRun::start("m", &batch(&["a.png"])).unwrap();
        while run.tick(&mut rng, &params) != TickOutcome::Completed {}
        let snapshot = run.clone();
        assert_eq!(run.tick(&mut rng, &params), TickOutcome::Finished);
        assert_eq!(run, snapshot);
    }

    #[test]
    fn test_training_record_shape() {
        let params = TrainingConfig::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut run = TrainingRun::start("Derm", &batch(&["a.png", "b.png", "c.png"])).unwrap();
        assert_eq!(run.to_model_record().status, ModelStatus::Training);
        while run.tick(&mut rng, &params) != TickOutcome::Completed {}
        let record = run.to_model_record();
        assert_eq!(record.name, "Derm");
        assert_eq!(record.samples, 3);
        assert_eq!(record.status, ModelStatus::Active);
        let tenths = record.accuracy * 10.0;
        assert!((tenths - tenths.round()).abs() < 1e-9);
        assert!((85.0..=95.0).contains(&record.accuracy));
    }

    #[test]
    fn test_analysis_scores_in_input_order() {
        let mut scorer = ScoreSimulator::default().with_rng(StdRng::seed_from_u64(1));
        let mut run = AnalysisRun::start("m", batch(&["a.png", "b.jpg", "c.bmp"])).unwrap();
        assert_eq!(run.tick(&mut scorer), TickOutcome::Advanced);
        assert!((run.progress() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(run.tick(&mut scorer), TickOutcome::Advanced);
        assert_eq!(run.tick(&mut scorer), TickOutcome::Completed);
        assert_eq!(run.progress(), COMPLETE);
        assert_eq!(run.tick(&mut scorer), TickOutcome::Finished);
        let names: Vec<_> = run.results().iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["a.png", "b.jpg", "c.bmp"]);
    }

    #[tokio::test]
    async fn test_panicking_run_reports_failed() {
        // an empty benign range makes the first draw panic
        let mut config = Config::default();
        config.scoring.benign_min = 0.5;
        config.scoring.benign_max = 0.5;
        config.analysis.tick_interval_ms = 1;
        let sim = ProgressSimulator::new(&config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = sim
            .spawn_analysis("m", batch(&["a.png"]), StdRng::seed_from_u64(0), tx)
            .unwrap();
        let run_id = handle.id();
        assert_eq!(handle.join().await, RunState::Failed);
        match rx.recv().await {
            Some(RunEvent::Failed { run_id: id, kind, reason }) => {
                assert_eq!(id, run_id);
                assert_eq!(kind, RunKind::Analysis);
                assert!(reason.starts_with("run panicked"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_analysis_rejects_empty_batch() {
        assert!(matches!(AnalysisRun::start("m", vec![]), Err(SimError::InvalidInput(_))));
    }
}
