#![allow(dead_code)]

use askcapture::synthetic::SyntheticDevices;
use askcapture::upload::{UploadMetadata, UploadSubject};
use askcapture::{
    AttachmentFile, CaptureMode, CaptureState, Composer, QuestionPayload, SegmentId, StorageRef,
    Submitter, UploadError, Uploader, WavEncoder,
};
use askconf::AskConfig;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Uploader whose behavior is scripted per item.
///
/// Items are keyed by attachment file name, or `segment-<mode>` for segments.
/// A key can be held (the upload blocks until released) or set to fail a
/// number of attempts before succeeding.
#[derive(Default)]
pub struct ScriptedUploader {
    held: DashSet<String>,
    failures: DashMap<String, usize>,
    released: Notify,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, Bytes)>>,
}

impl ScriptedUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hold(&self, key: &str) {
        self.held.insert(key.to_string());
    }

    pub fn release(&self, key: &str) {
        self.held.remove(key);
        self.released.notify_waiters();
    }

    pub fn fail_times(&self, key: &str, times: usize) {
        self.failures.insert(key.to_string(), times);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads received for a key, in call order.
    pub fn payloads_for(&self, key: &str) -> Vec<Bytes> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn key(metadata: &UploadMetadata) -> String {
        match &metadata.subject {
            UploadSubject::Segment { mode, .. } => format!("segment-{}", mode),
            UploadSubject::Attachment { file_name } => file_name.clone(),
        }
    }
}

#[async_trait]
impl Uploader for ScriptedUploader {
    async fn upload(&self, payload: Bytes, metadata: UploadMetadata) -> Result<StorageRef, UploadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let key = Self::key(&metadata);
        self.seen.lock().unwrap().push((key.clone(), payload.clone()));

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.held.contains(&key) {
                break;
            }
            released.await;
        }

        if let Some(mut remaining) = self.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(UploadError::Transport(format!("{} dropped", key)));
            }
        }

        Ok(StorageRef::new(format!("{}#{}", key, call)))
    }
}

#[derive(Default)]
pub struct RecordingSubmitter {
    pub submitted: Mutex<Vec<QuestionPayload>>,
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn submit(&self, payload: &QuestionPayload) -> anyhow::Result<()> {
        self.submitted.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

pub struct TestFixture {
    pub devices: Arc<SyntheticDevices>,
    pub uploader: Arc<ScriptedUploader>,
    pub composer: Composer,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_devices(SyntheticDevices::new().with_sample_rate(8_000))
    }

    pub fn with_devices(devices: SyntheticDevices) -> Self {
        Self::with_config(devices, Self::config())
    }

    /// Defaults with the countdown off and a low sample rate.
    pub fn config() -> AskConfig {
        let mut config = AskConfig::default();
        config.capture.countdown_secs = 0;
        config.mixer.sample_rate = 8_000;
        config
    }

    pub fn with_config(devices: SyntheticDevices, config: AskConfig) -> Self {
        let devices = Arc::new(devices);
        let uploader = ScriptedUploader::new();
        let composer = Composer::new(
            &config,
            devices.clone(),
            Arc::new(WavEncoder::new(config.mixer.sample_rate)),
            uploader.clone(),
        );

        Self {
            devices,
            uploader,
            composer,
        }
    }

    /// Record, stop after `secs` (or let the budget timer stop it), and accept.
    pub async fn record(&mut self, mode: CaptureMode, secs: u64) -> SegmentId {
        let state = self.composer.start_segment(mode).await.expect("start segment");
        assert_eq!(state.name(), "preview", "devices should be granted");
        self.composer.begin_recording().await.expect("begin recording");
        tokio::time::sleep(Duration::from_secs(secs)).await;
        self.stop().await;
        self.composer.accept_segment().await.expect("accept segment")
    }

    /// Stop the running recording; tolerates the budget timer getting there first.
    pub async fn stop(&self) {
        if let Err(err) = self.composer.stop_recording().await {
            let mut states = self.composer.capture().subscribe();
            states
                .wait_for(|s| matches!(s, CaptureState::Review { .. }))
                .await
                .unwrap_or_else(|_| panic!("stop failed: {}", err));
        }
    }
}

pub fn file(name: &str, size: u64) -> AttachmentFile {
    AttachmentFile::new(name, "application/pdf", vec![0u8; size as usize])
}

/// Let spawned uploads run to completion or to their next hold point.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}
