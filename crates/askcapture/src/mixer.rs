//! Audio mixing for screen recordings.
//!
//! A screen capture carries the display's own audio (tab or system sound) but
//! no voice. The `MixingGraph` pulls that audio and a separately acquired
//! microphone through independent gain stages and sums them into a single
//! output track, which the recorder sees next to the display's video tracks.
//!
//! The pieces:
//! - **MixerChannel**: control state for one input (gain, mute)
//! - **MixerState**: channels + master controls, and `mix_mono()` (pure math)
//! - **MixingGraph**: wiring of display/mic tracks into a mixed output stream
//!
//! Control values are atomics so gain changes from the UI never contend with
//! the track being pulled by the encoder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use askconf::MixerConfig;
use portable_atomic::AtomicF32;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::stream::{DeviceError, MediaStream, MediaTrack, TrackKind, TrackSource};

/// Channel name for display/system audio.
pub const SYSTEM_CHANNEL: &str = "system";
/// Channel name for the microphone.
pub const MICROPHONE_CHANNEL: &str = "microphone";

/// A single input channel in the mixer.
#[derive(Debug)]
pub struct MixerChannel {
    pub id: Uuid,
    pub name: String,
    /// Linear gain 0.0-2.0 (1.0 = unity)
    gain: AtomicF32,
    mute: AtomicBool,
}

impl MixerChannel {
    pub fn new(name: impl Into<String>, gain: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            gain: AtomicF32::new(gain.clamp(0.0, 2.0)),
            mute: AtomicBool::new(false),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain.load(Ordering::Relaxed)
    }

    /// Set gain (clamped to 0.0-2.0)
    pub fn set_gain(&self, value: f32) {
        self.gain.store(value.clamp(0.0, 2.0), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.mute.store(muted, Ordering::Relaxed);
    }
}

/// Channels plus master output controls.
#[derive(Debug)]
pub struct MixerState {
    channels: Vec<Arc<MixerChannel>>,
    master_gain: AtomicF32,
    master_mute: AtomicBool,
}

impl Default for MixerState {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerState {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            master_gain: AtomicF32::new(1.0),
            master_mute: AtomicBool::new(false),
        }
    }

    /// Add a channel and return its Arc for external control.
    pub fn add_channel(&mut self, channel: MixerChannel) -> Arc<MixerChannel> {
        let arc = Arc::new(channel);
        self.channels.push(Arc::clone(&arc));
        arc
    }

    pub fn channel(&self, index: usize) -> Option<&Arc<MixerChannel>> {
        self.channels.get(index)
    }

    pub fn channel_named(&self, name: &str) -> Option<&Arc<MixerChannel>> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain.load(Ordering::Relaxed)
    }

    pub fn set_master_gain(&self, value: f32) {
        self.master_gain.store(value.clamp(0.0, 2.0), Ordering::Relaxed);
    }

    pub fn set_master_mute(&self, muted: bool) {
        self.master_mute.store(muted, Ordering::Relaxed);
    }

    /// Sum mono inputs into `output` with per-channel and master gain.
    ///
    /// Input `i` feeds channel `i`. Extra inputs are ignored; missing inputs
    /// leave their channel silent. Output is cleared first.
    pub fn mix_mono(&self, inputs: &[&[f32]], output: &mut [f32]) {
        output.fill(0.0);

        if self.master_mute.load(Ordering::Relaxed) {
            return;
        }

        let master_gain = self.master_gain();

        for (idx, channel) in self.channels.iter().enumerate() {
            if channel.is_muted() {
                continue;
            }

            let Some(input) = inputs.get(idx) else {
                continue;
            };

            let gain = channel.gain() * master_gain;
            for (out, sample) in output.iter_mut().zip(input.iter()) {
                *out += sample * gain;
            }
        }
    }
}

/// How the output audio of a screen session was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixTopology {
    /// Display audio and microphone summed through the mixer.
    Mixed,
    /// Display had no audio; the microphone passes through unmodified.
    MicrophoneOnly,
    /// Microphone unavailable; raw display audio is recorded.
    DisplayOnly,
    /// Neither source produced audio.
    Silent,
}

/// Output track that pulls every input and mixes on demand.
struct MixedAudioTrack {
    state: Arc<MixerState>,
    inputs: Vec<MediaTrack>,
}

impl TrackSource for MixedAudioTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn pull_audio(&self, out: &mut [f32]) -> usize {
        let mut scratch: Vec<Vec<f32>> = Vec::with_capacity(self.inputs.len());
        let mut produced = 0;
        for input in &self.inputs {
            let mut buf = vec![0.0f32; out.len()];
            produced = produced.max(input.pull_audio(&mut buf));
            scratch.push(buf);
        }

        let refs: Vec<&[f32]> = scratch.iter().map(Vec::as_slice).collect();
        self.state.mix_mono(&refs, out);
        produced
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.state.set_master_mute(true);
        Ok(())
    }
}

/// Screen-session audio graph. Owns the extra microphone stream it was built with.
pub struct MixingGraph {
    state: Arc<MixerState>,
    topology: MixTopology,
    microphone: Option<MediaStream>,
    output: MediaStream,
}

impl MixingGraph {
    /// Wire a display stream and the outcome of the microphone acquisition.
    ///
    /// Never fails: a missing microphone degrades to display-only audio.
    pub fn build(
        display: &MediaStream,
        microphone: Result<MediaStream, DeviceError>,
        config: &MixerConfig,
    ) -> Self {
        let display_audio: Vec<MediaTrack> = display.audio_tracks().cloned().collect();
        let mut state = MixerState::new();

        let (topology, microphone, audio_tracks) = match microphone {
            Ok(mic) if mic.has_audio() => {
                let mic_audio: Vec<MediaTrack> = mic.audio_tracks().cloned().collect();
                if display_audio.is_empty() {
                    debug!("display has no audio track, passing microphone through");
                    (MixTopology::MicrophoneOnly, Some(mic), mic_audio)
                } else {
                    let mut inputs = Vec::with_capacity(display_audio.len() + mic_audio.len());
                    for track in &display_audio {
                        state.add_channel(MixerChannel::new(SYSTEM_CHANNEL, config.system_gain));
                        inputs.push(track.clone());
                    }
                    for track in &mic_audio {
                        state.add_channel(MixerChannel::new(
                            MICROPHONE_CHANNEL,
                            config.microphone_gain,
                        ));
                        inputs.push(track.clone());
                    }

                    let state = Arc::new(state);
                    let mixed = MediaTrack::new(
                        "mixed-audio",
                        Arc::new(MixedAudioTrack {
                            state: Arc::clone(&state),
                            inputs,
                        }),
                    );
                    info!(
                        system_gain = config.system_gain,
                        microphone_gain = config.microphone_gain,
                        "screen audio mixing enabled"
                    );
                    return Self::assemble(
                        state,
                        MixTopology::Mixed,
                        Some(mic),
                        display,
                        vec![mixed],
                    );
                }
            }
            Ok(mic) => {
                warn!("microphone stream has no audio track, recording display audio only");
                for err in mic.stop() {
                    warn!(error = %err, "failed to release empty microphone stream");
                }
                Self::degraded(display_audio)
            }
            Err(err) => {
                warn!(error = %err, "microphone unavailable, recording display audio only");
                Self::degraded(display_audio)
            }
        };

        Self::assemble(Arc::new(state), topology, microphone, display, audio_tracks)
    }

    fn degraded(
        display_audio: Vec<MediaTrack>,
    ) -> (MixTopology, Option<MediaStream>, Vec<MediaTrack>) {
        if display_audio.is_empty() {
            (MixTopology::Silent, None, Vec::new())
        } else {
            (MixTopology::DisplayOnly, None, display_audio)
        }
    }

    fn assemble(
        state: Arc<MixerState>,
        topology: MixTopology,
        microphone: Option<MediaStream>,
        display: &MediaStream,
        audio: Vec<MediaTrack>,
    ) -> Self {
        let mut tracks: Vec<MediaTrack> = display.video_tracks().cloned().collect();
        tracks.extend(audio);

        Self {
            state,
            topology,
            microphone,
            output: MediaStream::new(tracks),
        }
    }

    pub fn topology(&self) -> MixTopology {
        self.topology
    }

    /// The stream the recorder should consume.
    pub fn output(&self) -> &MediaStream {
        &self.output
    }

    pub fn state(&self) -> &Arc<MixerState> {
        &self.state
    }

    /// Adjust one side of the mix at runtime.
    pub fn set_channel_gain(&self, name: &str, gain: f32) -> bool {
        match self.state.channel_named(name) {
            Some(channel) => {
                channel.set_gain(gain);
                true
            }
            None => false,
        }
    }

    /// Stop the output and the owned microphone stream. Display tracks belong to
    /// the display stream and are released by its owner.
    pub fn close(&mut self) -> Vec<DeviceError> {
        self.state.set_master_mute(true);

        let mut errors: Vec<DeviceError> = Vec::new();
        if self.topology == MixTopology::Mixed {
            errors.extend(self.output.audio_tracks().filter_map(|t| t.stop().err()));
        }
        if let Some(mic) = self.microphone.take() {
            errors.extend(mic.stop());
        }
        errors
    }
}

impl Drop for MixingGraph {
    fn drop(&mut self) {
        for err in self.close() {
            warn!(error = %err, "failed to release mixing graph resource");
        }
    }
}
