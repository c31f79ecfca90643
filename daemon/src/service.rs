//! Daemon state: request handling, the single-run guard and run event handling

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clock;
use crate::config::Config;
use crate::db::{Database, ModelStatus, NewModel, StoreError};
use crate::intake::{DirectoryImageSource, ImageSource, InputFile};
use crate::notifier::Notifier;
use crate::progress::{self, ProgressSimulator, RunEvent, RunHandle, RunKind, RunOutcome};
use crate::protocol::{CompletedData, FailedData, ProgressData, Request, Response, StatusData};
use crate::scorer::ClassificationResult;
use crate::socket::RequestHandler;
use crate::stats::DashboardStats;

const DEFAULT_RECENT_LIMIT: u32 = 10;

struct ActiveRun {
    handle: RunHandle,
    model_id: Option<i64>,
    session_id: Option<i64>,
}

enum RngSource {
    Seeded(StdRng),
    Entropy,
}

impl RngSource {
    fn next(&mut self) -> StdRng {
        match self {
            RngSource::Seeded(master) => StdRng::seed_from_u64(master.random()),
            RngSource::Entropy => StdRng::from_os_rng(),
        }
    }
}

pub struct Service {
    config: Config,
    simulator: ProgressSimulator,
    db: Mutex<Database>,
    notifier: Notifier,
    images: DirectoryImageSource,
    broadcast_tx: broadcast::Sender<String>,
    events_tx: mpsc::UnboundedSender<RunEvent>,
    active: Mutex<Option<ActiveRun>>,
    last_results: Mutex<Vec<ClassificationResult>>,
    rngs: Mutex<RngSource>,
}

impl Service {
    /// Builds the service and spawns the task that consumes run events.
    pub fn start(
        config: Config,
        db: Database,
        notifier: Notifier,
        broadcast_tx: broadcast::Sender<String>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let rngs = match config.general.seed {
            Some(seed) => RngSource::Seeded(StdRng::seed_from_u64(seed)),
            None => RngSource::Entropy,
        };
        let service = Arc::new(Self {
            simulator: ProgressSimulator::new(&config),
            images: DirectoryImageSource::new(&config.intake.extensions),
            config,
            db: Mutex::new(db),
            notifier,
            broadcast_tx,
            events_tx,
            active: Mutex::new(None),
            last_results: Mutex::new(Vec::new()),
            rngs: Mutex::new(rngs),
        });
        let events_task = tokio::spawn(event_loop(Arc::clone(&service), events_rx));
        (service, events_task)
    }

    fn broadcast(&self, response: &Response) {
        match serde_json::to_string(response) {
            // no subscribers is fine
            Ok(json) => {
                let _ = self.broadcast_tx.send(json);
            }
            Err(e) => error!("Failed to encode broadcast: {}", e),
        }
    }

    fn broadcast_status(&self, active: &Option<ActiveRun>) {
        let data = match active {
            Some(run) => StatusData { running: Some(run.handle.kind()), run_id: Some(run.handle.id()) },
            None => StatusData { running: None, run_id: None },
        };
        self.broadcast(&Response::Status { data });
    }

    /// Cleared only once the run's final event has been handled.
    fn busy(active: &Option<ActiveRun>) -> bool {
        active.is_some()
    }

    async fn next_rng(&self) -> StdRng {
        self.rngs.lock().await.next()
    }

    async fn start_training(&self, model_name: String, files: Vec<InputFile>) -> Response {
        let mut active = self.active.lock().await;
        if Self::busy(&active) {
            return Response::error("run already in progress");
        }
        let samples = match progress::sample_count(files.len()) {
            Ok(samples) => samples,
            Err(e) => return Response::error(e),
        };
        let rng = self.next_rng().await;
        let mut handle = match self.simulator.spawn_training(&model_name, &files, rng, self.events_tx.clone()) {
            Ok(handle) => handle,
            Err(e) => return Response::error(e),
        };

        let db = self.db.lock().await;
        let record = NewModel {
            name: model_name.clone(),
            accuracy: 0.0,
            trained_on: clock::local_date(),
            samples,
            status: ModelStatus::Training,
            file_path: None,
        };
        let model_id = match db.insert_model(&record) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to create model record: {}", e);
                handle.cancel();
                return Response::error(e);
            }
        };
        let session_id = match db.start_session(model_id) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record training session: {}", e);
                None
            }
        };
        drop(db);

        let run_id = handle.id();
        *active = Some(ActiveRun { handle, model_id: Some(model_id), session_id });
        self.broadcast_status(&active);
        Response::ok(serde_json::json!({ "run_id": run_id, "model_id": model_id }))
    }

    async fn analyze(&self, files: Vec<InputFile>) -> Response {
        let mut active = self.active.lock().await;
        if Self::busy(&active) {
            return Response::error("run already in progress");
        }
        let model_name = match self.db.lock().await.active_model() {
            Ok(Some(model)) => model.name,
            Ok(None) => self.config.general.default_model_name.clone(),
            Err(e) => {
                warn!("Failed to look up active model: {}", e);
                self.config.general.default_model_name.clone()
            }
        };
        let rng = self.next_rng().await;
        let handle = match self.simulator.spawn_analysis(&model_name, files, rng, self.events_tx.clone()) {
            Ok(handle) => handle,
            Err(e) => return Response::error(e),
        };
        self.last_results.lock().await.clear();

        let run_id = handle.id();
        *active = Some(ActiveRun { handle, model_id: None, session_id: None });
        self.broadcast_status(&active);
        Response::ok(serde_json::json!({ "run_id": run_id, "model_name": model_name }))
    }

    async fn cancel_run(&self) -> Response {
        let mut active = self.active.lock().await;
        let canceled = match active.as_mut() {
            Some(run) => run.handle.cancel(),
            None => false,
        };
        Response::ok(serde_json::json!({ "canceled": canceled }))
    }

    async fn activate_model(&self, id: i64) -> Response {
        let mut db = self.db.lock().await;
        match db.activate_model(id) {
            Ok(demoted) => {
                info!(model_id = id, ?demoted, "Model activated");
                Response::ok(serde_json::json!({ "success": true, "archived": demoted }))
            }
            Err(e @ (StoreError::NotFound(_) | StoreError::StillTraining(_))) => Response::error(e),
            Err(e) => {
                error!("Failed to activate model {}: {}", id, e);
                Response::error(e)
            }
        }
    }

    async fn on_event(&self, event: RunEvent) {
        let mut active = self.active.lock().await;
        let Some(run) = active.as_ref().filter(|run| run.handle.id() == event.run_id()) else {
            warn!(run_id = event.run_id(), "Event for unknown run");
            return;
        };
        let (model_id, session_id) = (run.model_id, run.session_id);

        match event {
            RunEvent::Progress { run_id, kind, percent } => {
                if let Some(session_id) = session_id {
                    if let Err(e) = self.db.lock().await.update_session_progress(session_id, percent) {
                        warn!("Failed to update session progress: {}", e);
                    }
                }
                self.broadcast(&Response::Progress { data: ProgressData { run_id, kind, percent } });
            }
            RunEvent::Canceled { run_id, kind, percent } => {
                self.discard_run(model_id, session_id, "canceled").await;
                *active = None;
                self.broadcast(&Response::Canceled { data: ProgressData { run_id, kind, percent } });
                self.broadcast_status(&active);
            }
            RunEvent::Failed { run_id, kind, reason } => {
                self.discard_run(model_id, session_id, &reason).await;
                *active = None;
                self.broadcast(&Response::Failed { data: FailedData { run_id, kind, reason } });
                self.broadcast_status(&active);
            }
            RunEvent::Completed { run_id, outcome } => {
                self.persist_outcome(&outcome, model_id, session_id).await;
                *active = None;
                self.broadcast(&Response::Completed { data: CompletedData { run_id, model_id, outcome } });
                self.broadcast_status(&active);
            }
        }
    }

    /// Drops the provisional model row of a run that did not complete.
    async fn discard_run(&self, model_id: Option<i64>, session_id: Option<i64>, message: &str) {
        let db = self.db.lock().await;
        if let Some(session_id) = session_id {
            if let Err(e) = db.fail_session(session_id, message) {
                warn!("Failed to mark session failed: {}", e);
            }
        }
        if let Some(model_id) = model_id {
            if let Err(e) = db.delete_model(model_id) {
                warn!("Failed to discard model {}: {}", model_id, e);
            }
        }
    }

    async fn persist_outcome(&self, outcome: &RunOutcome, model_id: Option<i64>, session_id: Option<i64>) {
        match outcome {
            RunOutcome::Training { run } => {
                let record = run.to_model_record();
                {
                    let mut db = self.db.lock().await;
                    if let Some(model_id) = model_id {
                        if let Err(e) = db.complete_training(model_id, record.accuracy) {
                            error!("Failed to store training result for model {}: {}", model_id, e);
                        }
                    }
                    if let Some(session_id) = session_id {
                        if let Err(e) = db.finish_session(session_id) {
                            warn!("Failed to close training session: {}", e);
                        }
                    }
                }
                self.notifier.send(
                    "Training complete",
                    &format!("Model \"{}\" trained successfully ({:.1}%).", record.name, record.accuracy),
                );
            }
            RunOutcome::Analysis { model_name, results } => {
                {
                    let db = self.db.lock().await;
                    for result in results {
                        if let Err(e) = db.insert_diagnosis(model_name, result) {
                            error!("Failed to store diagnosis for {}: {}", result.filename, e);
                        }
                    }
                }
                *self.last_results.lock().await = results.clone();
                self.notifier.send(
                    "Analysis complete",
                    &format!("{} image(s) analyzed successfully.", results.len()),
                );
            }
        }
    }
}

async fn event_loop(service: Arc<Service>, mut events: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        service.on_event(event).await;
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Response {
    match serde_json::to_value(value) {
        Ok(data) => Response::ok(data),
        Err(e) => Response::error(e),
    }
}

#[async_trait::async_trait]
impl RequestHandler for Service {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::ListModels => match self.db.lock().await.get_models() {
                Ok(models) => to_json(models),
                Err(e) => Response::error(e),
            },

            Request::GetActiveModel => match self.db.lock().await.active_model() {
                Ok(model) => to_json(model),
                Err(e) => Response::error(e),
            },

            Request::ActivateModel { params } => self.activate_model(params.id).await,

            Request::StartTraining { params } => self.start_training(params.model_name, params.files).await,

            Request::Analyze { params } => self.analyze(params.files).await,

            Request::ScanDirectory { params } => match self.images.list_images(&params.path) {
                Ok(files) => to_json(files),
                Err(e) => Response::error(format!("{}: {}", params.path.display(), e)),
            },

            Request::CancelRun => self.cancel_run().await,

            Request::GetResults => to_json(&*self.last_results.lock().await),

            Request::GetRecentDiagnoses { params } => {
                let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
                match self.db.lock().await.recent_diagnoses(limit) {
                    Ok(records) => to_json(records),
                    Err(e) => Response::error(e),
                }
            }

            Request::GetStats => match DashboardStats::collect(&*self.db.lock().await) {
                Ok(stats) => to_json(stats),
                Err(e) => Response::error(e),
            },

            Request::GetConfig => to_json(&self.config),
        }
    }
}

impl Service {
    /// Kind of the run currently in flight, if any.
    pub async fn running(&self) -> Option<RunKind> {
        let active = self.active.lock().await;
        active.as_ref().map(|run| run.handle.kind())
    }
}
