use std::sync::{Arc, Weak};
use std::time::Duration;

use askconf::{CaptureConfig, MixerConfig};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::{CaptureError, CaptureState, SegmentDraft};
use crate::encoder::{EncodingSession, MediaEncoder};
use crate::lifecycle::{FlipOutcome, StreamLifecycle};
use crate::preview::PreviewStore;
use crate::stream::{CaptureDevices, CaptureMode, DeviceError, Facing};

/// Capture settings resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub countdown_secs: u32,
    pub default_facing: Facing,
}

impl From<&CaptureConfig> for CaptureSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            countdown_secs: config.countdown_secs,
            default_facing: config.default_facing.into(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

/// One attempt at recording a segment, from `start_segment` until the machine
/// returns to idle.
#[derive(Debug, Clone, Copy)]
struct Session {
    mode: CaptureMode,
    facing: Facing,
    /// Budget left when the session started; the hard recording limit.
    remaining_secs: u32,
    generation: u64,
}

enum Phase {
    Idle,
    Preview(Session),
    Denied {
        session: Session,
        reason: String,
    },
    Countdown {
        session: Session,
        seconds_left: u32,
    },
    Recording {
        session: Session,
        recorder: Box<dyn EncodingSession>,
        started: Instant,
        timer: JoinHandle<()>,
    },
    Review {
        draft: SegmentDraft,
    },
}

impl Phase {
    fn snapshot(&self) -> CaptureState {
        match self {
            Phase::Idle => CaptureState::Idle,
            Phase::Preview(session) => CaptureState::Preview {
                mode: session.mode,
                facing: (session.mode == CaptureMode::Video).then_some(session.facing),
            },
            Phase::Denied { session, reason } => CaptureState::Denied {
                mode: session.mode,
                reason: reason.clone(),
            },
            Phase::Countdown {
                session,
                seconds_left,
            } => CaptureState::Countdown {
                mode: session.mode,
                seconds_left: *seconds_left,
            },
            Phase::Recording { session, .. } => CaptureState::Recording {
                mode: session.mode,
                limit_secs: session.remaining_secs,
            },
            Phase::Review { draft } => CaptureState::Review {
                mode: draft.mode,
                duration_secs: draft.duration_secs,
            },
        }
    }

    fn name(&self) -> &'static str {
        self.snapshot().name()
    }
}

struct Inner {
    phase: Phase,
    lifecycle: StreamLifecycle,
    generation: u64,
}

fn invalid(action: &'static str, phase: &Phase) -> CaptureError {
    CaptureError::InvalidTransition {
        action,
        state: phase.name(),
    }
}

/// Publishes `Asking` for the duration of an acquisition. If the acquiring
/// future is dropped before it settles, the state it replaced is published
/// again so watchers never see a phase the machine is not in.
struct AskingScope<'a> {
    state: &'a watch::Sender<CaptureState>,
    restore: Option<CaptureState>,
}

impl<'a> AskingScope<'a> {
    fn enter(state: &'a watch::Sender<CaptureState>, phase: &Phase, mode: CaptureMode) -> Self {
        let restore = Some(phase.snapshot());
        state.send_replace(CaptureState::Asking { mode });
        Self { state, restore }
    }

    fn settle(mut self) {
        self.restore = None;
    }
}

impl Drop for AskingScope<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.restore.take() {
            debug!(state = previous.name(), "Acquisition abandoned");
            self.state.send_replace(previous);
        }
    }
}

/// Whole seconds, rounded, never below one and never above the session limit.
pub(crate) fn clip_duration(elapsed: Duration, limit_secs: u32) -> u32 {
    let rounded = (elapsed.as_millis() + 500) / 1000;
    let secs = u32::try_from(rounded).unwrap_or(u32::MAX);
    secs.clamp(1, limit_secs.max(1))
}

/// Drives one segment at a time through
/// `Idle → Asking → Preview → [Countdown] → Recording → Review → Idle`.
///
/// Cheap to clone; clones share the same session. State changes are
/// published on a watch channel (`subscribe`).
#[derive(Clone)]
pub struct CaptureMachine {
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<CaptureState>>,
    encoder: Arc<dyn MediaEncoder>,
    previews: PreviewStore,
    settings: CaptureSettings,
}

/// Handle held by the recording timer so a pending timer never keeps the
/// machine (and its device lease) alive.
struct WeakMachine {
    inner: Weak<Mutex<Inner>>,
    state: Arc<watch::Sender<CaptureState>>,
    encoder: Arc<dyn MediaEncoder>,
    previews: PreviewStore,
    settings: CaptureSettings,
}

impl WeakMachine {
    fn upgrade(self) -> Option<CaptureMachine> {
        Some(CaptureMachine {
            inner: self.inner.upgrade()?,
            state: self.state,
            encoder: self.encoder,
            previews: self.previews,
            settings: self.settings,
        })
    }
}

impl CaptureMachine {
    pub fn new(
        devices: Arc<dyn CaptureDevices>,
        encoder: Arc<dyn MediaEncoder>,
        previews: PreviewStore,
        capture: &CaptureConfig,
        mixer: &MixerConfig,
    ) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::Idle,
                lifecycle: StreamLifecycle::new(devices, mixer.clone()),
                generation: 0,
            })),
            state: Arc::new(state),
            encoder,
            previews,
            settings: CaptureSettings::from(capture),
        }
    }

    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    /// Latest published state.
    pub fn current(&self) -> CaptureState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    fn publish(&self, phase: &Phase) -> CaptureState {
        let snapshot = phase.snapshot();
        self.state.send_replace(snapshot.clone());
        snapshot
    }

    fn downgrade(&self) -> WeakMachine {
        WeakMachine {
            inner: Arc::downgrade(&self.inner),
            state: Arc::clone(&self.state),
            encoder: Arc::clone(&self.encoder),
            previews: self.previews.clone(),
            settings: self.settings,
        }
    }

    /// Start a session. `remaining_secs` is the budget left across accepted
    /// segments and becomes the hard recording limit.
    ///
    /// An exhausted budget is rejected before any device is touched. Device
    /// failures are not errors here: they land in `Denied`.
    pub async fn start_segment(
        &self,
        mode: CaptureMode,
        remaining_secs: u32,
    ) -> Result<CaptureState, CaptureError> {
        if remaining_secs == 0 {
            return Err(CaptureError::BudgetExhausted);
        }

        let mut inner = self.inner.lock().await;
        if !matches!(inner.phase, Phase::Idle) {
            return Err(invalid("start a segment", &inner.phase));
        }

        inner.generation += 1;
        let session = Session {
            mode,
            facing: self.settings.default_facing,
            remaining_secs,
            generation: inner.generation,
        };
        debug!(capture.mode = %mode, capture.remaining_secs = remaining_secs, "Capture session started");

        self.acquire(&mut inner, session).await
    }

    /// `Denied → Asking` with the same mode and facing.
    pub async fn retry(&self) -> Result<CaptureState, CaptureError> {
        let mut inner = self.inner.lock().await;
        let session = match &inner.phase {
            Phase::Denied { session, .. } => *session,
            other => return Err(invalid("retry", other)),
        };

        self.acquire(&mut inner, session).await
    }

    async fn acquire(&self, inner: &mut Inner, session: Session) -> Result<CaptureState, CaptureError> {
        let asking = AskingScope::enter(&self.state, &inner.phase, session.mode);

        let opened = inner
            .lifecycle
            .open(session.mode, session.facing)
            .await
            .map(|_| ());
        asking.settle();

        inner.phase = match opened {
            Ok(()) => Phase::Preview(session),
            Err(err) => {
                warn!(capture.mode = %session.mode, error = %err, "Capture devices unavailable");
                Phase::Denied {
                    session,
                    reason: err.to_string(),
                }
            }
        };

        Ok(self.publish(&inner.phase))
    }

    /// Switch cameras during a video preview.
    pub async fn flip_camera(&self) -> Result<CaptureState, CaptureError> {
        let mut inner = self.inner.lock().await;
        let session = match &inner.phase {
            Phase::Preview(session) if session.mode == CaptureMode::Video => *session,
            Phase::Preview(_) => return Err(CaptureError::FlipUnsupported),
            other => return Err(invalid("flip the camera", other)),
        };

        let outcome = inner.lifecycle.flip_camera().await;
        inner.phase = match outcome {
            Ok(FlipOutcome::Flipped(facing)) => {
                debug!(facing = ?facing, "Camera flipped");
                Phase::Preview(Session { facing, ..session })
            }
            Ok(FlipOutcome::Restored { facing, error }) => {
                warn!(error = %error, facing = ?facing, "Camera flip failed, kept previous camera");
                Phase::Preview(Session { facing, ..session })
            }
            Err(err) => {
                warn!(error = %err, "Camera flip failed and previous camera could not be restored");
                Phase::Denied {
                    session,
                    reason: err.to_string(),
                }
            }
        };

        Ok(self.publish(&inner.phase))
    }

    /// `Preview → [Countdown] → Recording`.
    ///
    /// Resolves once recording has actually started. A session cancelled
    /// during the countdown resolves to `Cancelled`.
    pub async fn begin_recording(&self) -> Result<CaptureState, CaptureError> {
        let mut inner = self.inner.lock().await;
        let session = match &inner.phase {
            Phase::Preview(session) => *session,
            other => return Err(invalid("begin recording", other)),
        };

        let mut seconds_left = self.settings.countdown_secs;
        while seconds_left > 0 {
            inner.phase = Phase::Countdown {
                session,
                seconds_left,
            };
            self.publish(&inner.phase);
            drop(inner);

            tokio::time::sleep(Duration::from_secs(1)).await;

            inner = self.inner.lock().await;
            match &inner.phase {
                Phase::Countdown { session: current, .. } if current.generation == session.generation => {}
                _ => return Err(CaptureError::Cancelled),
            }
            seconds_left -= 1;
        }

        self.start_recorder(&mut inner, session)
    }

    fn start_recorder(&self, inner: &mut Inner, session: Session) -> Result<CaptureState, CaptureError> {
        let started = match inner.lifecycle.output() {
            Some(stream) => self.encoder.start(session.mode, stream),
            None => {
                inner.phase = Phase::Idle;
                self.publish(&inner.phase);
                return Err(DeviceError::NotLive.into());
            }
        };

        let recorder = match started {
            Ok(recorder) => recorder,
            Err(err) => {
                warn!(error = %err, "Encoder failed to start");
                inner.phase = Phase::Preview(session);
                self.publish(&inner.phase);
                return Err(err.into());
            }
        };

        let limit = Duration::from_secs(u64::from(session.remaining_secs));
        let weak = self.downgrade();
        let generation = session.generation;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            if let Some(machine) = weak.upgrade() {
                machine.expire(generation).await;
            }
        });

        info!(
            capture.mode = %session.mode,
            capture.limit_secs = session.remaining_secs,
            "Recording started"
        );

        inner.phase = Phase::Recording {
            session,
            recorder,
            started: Instant::now(),
            timer,
        };
        Ok(self.publish(&inner.phase))
    }

    /// Timer expiry; identical to a manual stop.
    async fn expire(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        let current = matches!(
            &inner.phase,
            Phase::Recording { session, .. } if session.generation == generation
        );
        if !current {
            return;
        }

        info!("Recording limit reached");
        if let Phase::Recording {
            session,
            recorder,
            started,
            ..
        } = std::mem::replace(&mut inner.phase, Phase::Idle)
        {
            if let Err(err) = self.finalize(&mut inner, session, recorder, started).await {
                warn!(error = %err, "Failed to finalize recording at time limit");
            }
        }
    }

    /// `Recording → Review`.
    pub async fn stop_recording(&self) -> Result<CaptureState, CaptureError> {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Recording {
                session,
                recorder,
                started,
                timer,
            } => {
                timer.abort();
                self.finalize(&mut inner, session, recorder, started).await
            }
            other => {
                let err = invalid("stop recording", &other);
                inner.phase = other;
                Err(err)
            }
        }
    }

    async fn finalize(
        &self,
        inner: &mut Inner,
        session: Session,
        recorder: Box<dyn EncodingSession>,
        started: Instant,
    ) -> Result<CaptureState, CaptureError> {
        let duration_secs = clip_duration(started.elapsed(), session.remaining_secs);
        let encoded = recorder.finish().await;
        inner.lifecycle.release();

        match encoded {
            Ok(media) => {
                let preview = self.previews.create(&media.payload, &media.mime_type);
                info!(
                    capture.mode = %session.mode,
                    segment.duration_secs = duration_secs,
                    segment.bytes = media.payload.len(),
                    "Recording stopped"
                );
                inner.phase = Phase::Review {
                    draft: SegmentDraft {
                        mode: session.mode,
                        payload: media.payload,
                        mime_type: media.mime_type,
                        duration_secs,
                        preview,
                    },
                };
                Ok(self.publish(&inner.phase))
            }
            Err(err) => {
                warn!(error = %err, "Recording could not be finalized");
                inner.phase = Phase::Idle;
                self.publish(&inner.phase);
                Err(err.into())
            }
        }
    }

    /// `Review → Idle`, handing the draft to the caller.
    pub async fn accept(&self) -> Result<SegmentDraft, CaptureError> {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Review { draft } => {
                self.publish(&inner.phase);
                Ok(draft)
            }
            other => {
                let err = invalid("accept", &other);
                inner.phase = other;
                Err(err)
            }
        }
    }

    /// `Review → Idle`, revoking the preview and dropping the recording.
    pub async fn discard(&self) -> Result<CaptureState, CaptureError> {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Review { draft } => {
                debug!(capture.mode = %draft.mode, "Recording discarded");
                draft.preview.revoke();
                Ok(self.publish(&inner.phase))
            }
            other => {
                let err = invalid("discard", &other);
                inner.phase = other;
                Err(err)
            }
        }
    }

    /// Return to idle from any state, releasing devices, the recorder and any
    /// unaccepted preview.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;

        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Recording {
                session,
                recorder,
                timer,
                ..
            } => {
                timer.abort();
                recorder.abort();
                info!(capture.mode = %session.mode, "Recording cancelled");
            }
            Phase::Review { draft } => draft.preview.revoke(),
            _ => {}
        }

        inner.lifecycle.release();
        self.publish(&inner.phase);
    }

    pub async fn is_live(&self) -> bool {
        self.inner.lock().await.lifecycle.is_live()
    }
}
