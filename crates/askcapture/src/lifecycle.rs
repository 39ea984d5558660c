//! Stream Lifecycle Manager
//!
//! Sole owner of the live device handle. At most one capture stream is live at
//! a time; opening a new one releases the previous one first, and every exit
//! path (release, flip, drop) goes through the same `release()`.

use std::sync::Arc;

use askconf::MixerConfig;
use tracing::{debug, info, warn};

use crate::mixer::{MixTopology, MixingGraph};
use crate::stream::{CaptureDevices, CaptureMode, CaptureRequest, DeviceError, Facing, MediaStream};

/// The stream currently leased from the devices.
struct LiveCapture {
    mode: CaptureMode,
    facing: Option<Facing>,
    source: MediaStream,
    graph: Option<MixingGraph>,
}

impl LiveCapture {
    fn output(&self) -> &MediaStream {
        match &self.graph {
            Some(graph) => graph.output(),
            None => &self.source,
        }
    }
}

/// A stream acquired while the rest of a capture is still being requested.
///
/// Stops its tracks on drop unless handed over with `keep`, so an open that
/// is abandoned mid-way (the caller's future dropped, or a later request
/// failing) never leaves hardware running.
struct PendingStream {
    stream: MediaStream,
    armed: bool,
}

impl PendingStream {
    fn new(stream: MediaStream) -> Self {
        Self {
            stream,
            armed: true,
        }
    }

    fn stream(&self) -> &MediaStream {
        &self.stream
    }

    fn keep(mut self) -> MediaStream {
        self.armed = false;
        std::mem::replace(&mut self.stream, MediaStream::new(Vec::new()))
    }
}

impl Drop for PendingStream {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for err in self.stream.stop() {
            warn!(error = %err, "Failed to release abandoned capture track");
        }
        debug!(stream.id = %self.stream.id(), "Abandoned capture stream released");
    }
}

/// Result of a camera flip that did not end in `Denied`.
#[derive(Debug, Clone, PartialEq)]
pub enum FlipOutcome {
    /// The opposite camera is live.
    Flipped(Facing),
    /// The opposite camera failed; the previous one was re-acquired.
    Restored { facing: Facing, error: DeviceError },
}

pub struct StreamLifecycle {
    devices: Arc<dyn CaptureDevices>,
    mixer: MixerConfig,
    live: Option<LiveCapture>,
}

impl StreamLifecycle {
    pub fn new(devices: Arc<dyn CaptureDevices>, mixer: MixerConfig) -> Self {
        Self {
            devices,
            mixer,
            live: None,
        }
    }

    /// Acquire the devices a mode needs and make them the live stream.
    ///
    /// Any stream still held from an earlier session is released first.
    pub async fn open(&mut self, mode: CaptureMode, facing: Facing) -> Result<&MediaStream, DeviceError> {
        self.release();

        let live = match mode {
            CaptureMode::Video => {
                let source = self.devices.acquire(CaptureRequest::Camera { facing }).await?;
                LiveCapture {
                    mode,
                    facing: Some(facing),
                    source,
                    graph: None,
                }
            }
            CaptureMode::Audio => {
                let source = self.devices.acquire(CaptureRequest::Microphone).await?;
                LiveCapture {
                    mode,
                    facing: None,
                    source,
                    graph: None,
                }
            }
            CaptureMode::Screen => {
                let display =
                    PendingStream::new(self.devices.acquire(CaptureRequest::Display).await?);
                let microphone = self.devices.acquire(CaptureRequest::Microphone).await;
                let graph = MixingGraph::build(display.stream(), microphone, &self.mixer);
                if graph.topology() != MixTopology::Mixed {
                    debug!(topology = ?graph.topology(), "screen audio not mixed");
                }
                LiveCapture {
                    mode,
                    facing: None,
                    source: display.keep(),
                    graph: Some(graph),
                }
            }
        };

        info!(
            capture.mode = %mode,
            stream.id = %live.output().id(),
            tracks = live.output().tracks().len(),
            "Capture stream acquired"
        );

        Ok(self.live.insert(live).output())
    }

    /// Switch to the opposite camera, falling back to the current one.
    ///
    /// `Err` only when the fallback acquisition fails too; the lifecycle is
    /// then empty.
    pub async fn flip_camera(&mut self) -> Result<FlipOutcome, DeviceError> {
        let current = match &self.live {
            Some(LiveCapture {
                mode: CaptureMode::Video,
                facing: Some(facing),
                ..
            }) => *facing,
            _ => return Err(DeviceError::NotLive),
        };

        let target = current.opposite();
        match self.open(CaptureMode::Video, target).await {
            Ok(_) => Ok(FlipOutcome::Flipped(target)),
            Err(error) => {
                warn!(
                    error = %error,
                    facing = ?target,
                    "Camera flip failed, restoring previous camera"
                );
                self.open(CaptureMode::Video, current).await?;
                Ok(FlipOutcome::Restored {
                    facing: current,
                    error,
                })
            }
        }
    }

    /// Stop every track and tear down the mixing graph. Idempotent.
    ///
    /// Cleanup failures are logged, never returned.
    pub fn release(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };

        if let Some(mut graph) = live.graph.take() {
            for err in graph.close() {
                warn!(error = %err, "Failed to release mixing graph resource");
            }
        }
        for err in live.source.stop() {
            warn!(error = %err, capture.mode = %live.mode, "Failed to release capture track");
        }

        debug!(capture.mode = %live.mode, stream.id = %live.source.id(), "Capture stream released");
    }

    /// The stream a recorder should consume.
    pub fn output(&self) -> Option<&MediaStream> {
        self.live.as_ref().map(LiveCapture::output)
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        self.live.as_ref().map(|l| l.mode)
    }

    pub fn facing(&self) -> Option<Facing> {
        self.live.as_ref().and_then(|l| l.facing)
    }

    pub fn topology(&self) -> Option<MixTopology> {
        self.live
            .as_ref()
            .and_then(|l| l.graph.as_ref())
            .map(MixingGraph::topology)
    }
}

impl Drop for StreamLifecycle {
    fn drop(&mut self) {
        self.release();
    }
}
