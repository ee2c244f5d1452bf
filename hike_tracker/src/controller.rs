use std::{sync::Arc, time::Duration};

use chrono::Utc;
use hike_tracker_lib::{geo_point::GeoPoint, hike_session::HikeSession};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinSet,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{buffer::{PendingSessions, ResubmitSummary}, Ack, SessionUploader, TrackRecorder, TrackerError};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 256;
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// What the UI shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HikeState {
    Idle,
    Tracking { mountain_id: i64, elapsed_seconds: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HikeEvent {
    StateChanged(HikeState),
    Tick { elapsed_seconds: u64 },
    /// A fix was recorded. `appended` counts the fix and its interpolated lead-in.
    PathExtended { appended: usize, total: usize, last: GeoPoint },
    /// The geolocator closed the position stream while tracking.
    PositionStreamEnded,
    PermissionDenied,
    UploadSucceeded { mountain_id: i64, points: usize, ack: Ack },
    /// `retained` tells whether the hike is waiting in the pending sessions.
    UploadFailed { mountain_id: i64, error: TrackerError, retained: bool },
}

enum Command {
    Start {
        mountain_id: i64,
        reply: oneshot::Sender<Result<(), TrackerError>>,
    },
    Stop {
        reply: oneshot::Sender<Option<HikeSession>>,
    },
    Shutdown {
        reply: oneshot::Sender<Option<HikeSession>>,
    },
}

enum Step {
    Command(Command),
    Fix(Option<GeoPoint>),
    Tick,
    Closed,
}

struct ActiveHike {
    mountain_id: i64,
    started_at_ms: i64,
    started: Instant,
}

/// Handle to the hike actor. Cheap to clone; the actor stops once every
/// handle is gone or `shutdown` is called.
#[derive(Clone)]
pub struct HikeSessionController {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<HikeState>,
    events: broadcast::Sender<HikeEvent>,
    uploader: Arc<dyn SessionUploader>,
    pending: Option<PendingSessions>,
}

impl HikeSessionController {
    /// Starts the actor. Passing `pending` keeps every finished hike on disk
    /// until its upload succeeds; without it a failed upload is lost.
    pub fn spawn(
        recorder: TrackRecorder,
        uploader: Arc<dyn SessionUploader>,
        pending: Option<PendingSessions>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(HikeState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let actor = HikeActor {
            recorder,
            uploader: uploader.clone(),
            pending: pending.clone(),
            commands: command_rx,
            state: state_tx,
            events: events_tx.clone(),
            ticker,
            active: None,
            uploads: JoinSet::new(),
        };
        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            state: state_rx,
            events: events_tx,
            uploader,
            pending,
        }
    }

    pub async fn start_hike(&self, mountain_id: i64) -> Result<(), TrackerError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Start { mountain_id, reply }).await?;
        response.await.map_err(|_| TrackerError::ActorStopped)?
    }

    /// Ends the hike and hands it to the uploader without waiting for the
    /// upload. Returns `None` if no hike was active.
    pub async fn stop_hike(&self) -> Result<Option<HikeSession>, TrackerError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        response.await.map_err(|_| TrackerError::ActorStopped)
    }

    /// Stops the actor, finishing an active hike and waiting for outstanding uploads.
    pub async fn shutdown(&self) -> Result<Option<HikeSession>, TrackerError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        response.await.map_err(|_| TrackerError::ActorStopped)
    }

    pub fn current_state(&self) -> HikeState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<HikeState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HikeEvent> {
        self.events.subscribe()
    }

    /// Uploads every retained hike, oldest first. Nothing to do without pending sessions.
    pub async fn resubmit_pending(&self) -> Result<ResubmitSummary, TrackerError> {
        match &self.pending {
            Some(pending) => pending.resubmit(self.uploader.as_ref()).await,
            None => Ok(ResubmitSummary::default()),
        }
    }

    async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.commands.send(command).await.map_err(|_| TrackerError::ActorStopped)
    }
}

struct HikeActor {
    recorder: TrackRecorder,
    uploader: Arc<dyn SessionUploader>,
    pending: Option<PendingSessions>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<HikeState>,
    events: broadcast::Sender<HikeEvent>,
    ticker: Interval,
    active: Option<ActiveHike>,
    uploads: JoinSet<()>,
}

impl HikeActor {
    async fn run(mut self) {
        loop {
            // Commands win over fixes, so a stop is applied before anything still queued
            let step = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Closed,
                },
                fix = self.recorder.next_fix() => Step::Fix(fix),
                _ = self.ticker.tick(), if self.active.is_some() => Step::Tick,
            };

            match step {
                Step::Command(Command::Start { mountain_id, reply }) => {
                    let result = self.start(mountain_id).await;
                    let _ = reply.send(result);
                }
                Step::Command(Command::Stop { reply }) => {
                    let session = self.stop().await;
                    let _ = reply.send(session);
                }
                Step::Command(Command::Shutdown { reply }) => {
                    let session = self.finish().await;
                    let _ = reply.send(session);
                    break;
                }
                Step::Fix(Some(fix)) => self.record(fix),
                Step::Fix(None) => {
                    tracing::warn!("Position stream ended while tracking");
                    self.publish(HikeEvent::PositionStreamEnded);
                }
                Step::Tick => self.tick(),
                Step::Closed => {
                    self.finish().await;
                    break;
                }
            }
        }

        tracing::debug!("Hike controller stopped");
    }

    async fn start(&mut self, mountain_id: i64) -> Result<(), TrackerError> {
        if self.active.is_some() {
            return Err(TrackerError::AlreadyTracking);
        }

        if let Err(err) = self.recorder.start().await {
            if err == TrackerError::PermissionDenied {
                self.publish(HikeEvent::PermissionDenied);
            }
            return Err(err);
        }

        self.active = Some(ActiveHike {
            mountain_id,
            started_at_ms: Utc::now().timestamp_millis(),
            started: Instant::now(),
        });
        self.ticker.reset();

        tracing::info!("Started hike on mountain {}", mountain_id);
        self.set_state(HikeState::Tracking { mountain_id, elapsed_seconds: 0 });
        Ok(())
    }

    async fn stop(&mut self) -> Option<HikeSession> {
        let active = self.active.take()?;

        let path = self.recorder.stop();
        let session = HikeSession::new(active.mountain_id, active.started_at_ms, Utc::now().timestamp_millis(), path);

        tracing::info!(
            "Stopped hike on mountain {} after {} s with {} points",
            session.mountain_id,
            active.started.elapsed().as_secs(),
            session.path.len()
        );
        self.set_state(HikeState::Idle);

        self.spawn_upload(session.clone()).await;
        Some(session)
    }

    fn record(&mut self, fix: GeoPoint) {
        let appended = self.recorder.record(fix);
        if appended == 0 {
            return;
        }

        let total = self.recorder.path().map_or(0, |path| path.len());
        self.publish(HikeEvent::PathExtended { appended, total, last: fix });
    }

    fn tick(&mut self) {
        let Some(active) = &self.active else {
            return;
        };

        let elapsed_seconds = active.started.elapsed().as_secs();
        let mountain_id = active.mountain_id;
        self.state.send_replace(HikeState::Tracking { mountain_id, elapsed_seconds });
        self.publish(HikeEvent::Tick { elapsed_seconds });
    }

    async fn spawn_upload(&mut self, session: HikeSession) {
        // Reap uploads that already finished
        while self.uploads.try_join_next().is_some() {}

        // The claim keeps `resubmit_pending` away from this session until the task is done
        let claim = match &self.pending {
            Some(pending) => match pending.store_claimed(&session).await {
                Ok(claim) => Some(claim),
                Err(err) => {
                    tracing::error!("Failed to keep hike for resubmission: {}", err);
                    None
                }
            },
            None => None,
        };

        let uploader = self.uploader.clone();
        let pending = self.pending.clone();
        let events = self.events.clone();

        self.uploads.spawn(async move {
            let mountain_id = session.mountain_id;
            let result = uploader.submit(&session).await;

            let delivered = match &result {
                Ok(_) => true,
                Err(err) => err.reached_backend(),
            };
            let mut retained = claim.is_some();
            if let (true, Some(pending), Some(claim)) = (delivered, &pending, &claim) {
                if let Err(err) = pending.remove(claim.id()).await {
                    tracing::warn!("Uploaded hike {} but could not clear it: {}", claim.id(), err);
                }
                retained = false;
            }
            drop(claim);

            let event = match result {
                Ok(ack) => {
                    tracing::info!("Uploaded hike on mountain {} ({:?})", mountain_id, ack.record_id);
                    HikeEvent::UploadSucceeded { mountain_id, points: session.path.len(), ack }
                }
                Err(error) => {
                    tracing::error!(
                        "Upload of hike on mountain {} failed: {} ({})",
                        mountain_id,
                        error,
                        if retained { "kept for resubmission" } else { "not kept" }
                    );
                    HikeEvent::UploadFailed { mountain_id, error, retained }
                }
            };
            let _ = events.send(event);
        });
    }

    /// Stops an active hike and waits for every upload to settle.
    async fn finish(&mut self) -> Option<HikeSession> {
        let session = self.stop().await;

        while let Some(result) = self.uploads.join_next().await {
            if let Err(err) = result {
                tracing::error!("Upload task failed: {}", err);
            }
        }

        session
    }

    fn set_state(&mut self, state: HikeState) {
        self.state.send_replace(state);
        self.publish(HikeEvent::StateChanged(state));
    }

    fn publish(&self, event: HikeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
