use crate::client::RecognitionClient;
use faceport_core::{
    AttemptId, AttemptResult, CameraUnavailable, CapturedFrame, Completion, ControlLoop,
    DisplayClear, FeedbackSink, ImageSource, LoopError, LoopView, Scheduler, TickOutcome,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("control loop invariant violated: {0}")]
    Invariant(#[from] LoopError),
    #[error("engine task exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine task.
enum EngineRequest {
    SetActive {
        active: bool,
        reply: oneshot::Sender<bool>,
    },
    View {
        reply: oneshot::Sender<LoopView>,
    },
}

/// Events the engine raises for itself from spawned work.
#[derive(Debug)]
enum LoopEvent {
    Captured {
        result: Result<CapturedFrame, CameraUnavailable>,
    },
    Completed {
        attempt: AttemptId,
        result: AttemptResult,
    },
    DisplayExpired {
        attempt: AttemptId,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enable or disable capturing. Returns the previous value.
    pub async fn set_active(&self, active: bool) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SetActive {
                active,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Snapshot of what the kiosk screen should show right now.
    pub async fn view(&self) -> Result<LoopView, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::View { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub display_window: Duration,
    pub start_active: bool,
}

/// Spawn the engine on the tokio runtime.
///
/// The task owns the control loop and is its only caller: scheduler ticks,
/// recognition completions, display expiries and handle requests are all
/// handled one at a time in a single `select!`. Camera reads (on the blocking
/// pool), recognition calls and display timers run as separate tasks that
/// report back through an internal channel, so a stalled camera never holds
/// up handle requests.
///
/// The task ends with `Ok` once every handle is dropped, or with
/// [`EngineError::Invariant`] if the control loop reports a violation.
pub fn spawn_engine<S, C, K>(
    settings: EngineSettings,
    scheduler: Scheduler,
    source: S,
    client: Arc<C>,
    sink: K,
) -> (EngineHandle, JoinHandle<Result<(), EngineError>>)
where
    S: ImageSource + 'static,
    C: RecognitionClient + ?Sized + 'static,
    K: FeedbackSink + 'static,
{
    let ctl = ControlLoop::new(scheduler, sink, settings.start_active)
        .with_display_window(settings.display_window);
    tracing::info!(
        policy = ctl.policy_name(),
        tick_ms = settings.tick_interval.as_millis() as u64,
        display_ms = settings.display_window.as_millis() as u64,
        active = settings.start_active,
        "engine starting"
    );

    let (tx, rx) = mpsc::channel::<EngineRequest>(16);
    let source = Arc::new(Mutex::new(source));
    let task = tokio::spawn(run(ctl, source, client, rx, settings.tick_interval));
    (EngineHandle { tx }, task)
}

async fn run<S, C, K>(
    mut ctl: ControlLoop<K>,
    source: Arc<Mutex<S>>,
    client: Arc<C>,
    mut requests: mpsc::Receiver<EngineRequest>,
    tick_interval: Duration,
) -> Result<(), EngineError>
where
    S: ImageSource + 'static,
    C: RecognitionClient + ?Sized + 'static,
    K: FeedbackSink,
{
    let (events_tx, mut events) = mpsc::unbounded_channel::<LoopEvent>();
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            scheduled = ticker.tick() => {
                // The scheduled instant, not the wake-up time, keeps the
                // interval policy from drifting by scheduling jitter.
                let now = scheduled.into_std();
                if let TickOutcome::CaptureRequested = ctl.request_capture(now)? {
                    spawn_capture(Arc::clone(&source), now, &events_tx);
                }
            }
            Some(event) = events.recv() => match event {
                LoopEvent::Captured { result } => {
                    if let TickOutcome::Started { attempt, frame } = ctl.on_captured(result)? {
                        let client = Arc::clone(&client);
                        let events = events_tx.clone();
                        tokio::spawn(async move {
                            let result = client.submit(frame).await;
                            let _ = events.send(LoopEvent::Completed { attempt, result });
                        });
                    }
                }
                LoopEvent::Completed { attempt, result } => {
                    let now = Instant::now().into_std();
                    if let Completion::Displayed { attempt, clear_at } =
                        ctl.on_completed(attempt, result, now)?
                    {
                        arm_display_timer(attempt, Instant::from_std(clear_at), &events_tx);
                    }
                }
                LoopEvent::DisplayExpired { attempt } => {
                    let now = Instant::now().into_std();
                    if let DisplayClear::NotYet(at) = ctl.on_display_expired(attempt, now) {
                        arm_display_timer(attempt, Instant::from_std(at), &events_tx);
                    }
                }
            },
            request = requests.recv() => match request {
                Some(EngineRequest::SetActive { active, reply }) => {
                    let _ = reply.send(ctl.set_active(active));
                }
                Some(EngineRequest::View { reply }) => {
                    let _ = reply.send(ctl.view(chrono::Local::now().time()));
                }
                None => {
                    tracing::info!("all engine handles dropped; engine stopping");
                    return Ok(());
                }
            },
        }
    }
}

/// Read one frame on the blocking pool and report it as `Captured`.
///
/// The control loop allows one outstanding read, so the lock is never
/// contended.
fn spawn_capture<S>(
    source: Arc<Mutex<S>>,
    now: std::time::Instant,
    events: &mpsc::UnboundedSender<LoopEvent>,
) where
    S: ImageSource + 'static,
{
    let events = events.clone();
    tokio::spawn(async move {
        let read = tokio::task::spawn_blocking(move || {
            let Ok(mut camera) = source.lock() else {
                return Err(CameraUnavailable::new(
                    "camera source poisoned by an earlier panic",
                ));
            };
            camera.capture(now)
        });
        let result = match read.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "camera read task failed");
                Err(CameraUnavailable::new(format!("camera read task failed: {e}")))
            }
        };
        let _ = events.send(LoopEvent::Captured { result });
    });
}

fn arm_display_timer(attempt: AttemptId, at: Instant, events: &mpsc::UnboundedSender<LoopEvent>) {
    let events = events.clone();
    tokio::spawn(async move {
        tokio::time::sleep_until(at).await;
        let _ = events.send(LoopEvent::DisplayExpired { attempt });
    });
}
