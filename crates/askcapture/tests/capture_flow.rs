mod fixtures;

use askcapture::synthetic::{DeviceKind, SyntheticDevices};
use askcapture::{CaptureError, CaptureMode, CaptureState, ComposerError, Facing};
use fixtures::TestFixture;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_screen_capture_without_microphone_still_records() {
    let devices = SyntheticDevices::new().with_sample_rate(8_000);
    devices.deny(DeviceKind::Microphone);
    let mut fx = TestFixture::with_devices(devices);

    let state = fx.composer.start_segment(CaptureMode::Screen).await.unwrap();
    assert_eq!(
        state,
        CaptureState::Preview {
            mode: CaptureMode::Screen,
            facing: None
        }
    );

    fx.composer.begin_recording().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let state = fx.composer.stop_recording().await.unwrap();
    assert_eq!(
        state,
        CaptureState::Review {
            mode: CaptureMode::Screen,
            duration_secs: 3
        }
    );
    assert_eq!(fx.devices.live_tracks(), 0);

    fx.composer.accept_segment().await.unwrap();
    fx.composer.wait_for_uploads().await;

    let sent = fx.uploader.payloads_for("segment-screen");
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_flip_keeps_the_previous_camera() {
    let devices = SyntheticDevices::new().with_sample_rate(8_000);
    devices.deny(DeviceKind::BackCamera);
    let mut fx = TestFixture::with_devices(devices);

    fx.composer.start_segment(CaptureMode::Video).await.unwrap();
    let state = fx.composer.flip_camera().await.unwrap();
    assert_eq!(
        state,
        CaptureState::Preview {
            mode: CaptureMode::Video,
            facing: Some(Facing::User)
        }
    );
    assert!(fx.composer.capture().is_live().await);

    // The restored camera still records.
    fx.composer.begin_recording().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    fx.stop().await;
    fx.composer.accept_segment().await.unwrap();
    assert_eq!(fx.composer.used_secs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_flip_switches_between_cameras() {
    let mut fx = TestFixture::new();

    fx.composer.start_segment(CaptureMode::Video).await.unwrap();
    let state = fx.composer.flip_camera().await.unwrap();
    assert_eq!(
        state,
        CaptureState::Preview {
            mode: CaptureMode::Video,
            facing: Some(Facing::Environment)
        }
    );

    let state = fx.composer.flip_camera().await.unwrap();
    assert_eq!(
        state,
        CaptureState::Preview {
            mode: CaptureMode::Video,
            facing: Some(Facing::User)
        }
    );

    // Camera and microphone, nothing leaked across the flips.
    assert_eq!(fx.devices.live_tracks(), 2);
    fx.composer.cancel_capture().await;
    assert_eq!(fx.devices.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flip_is_rejected_outside_video() {
    let mut fx = TestFixture::new();
    fx.composer.start_segment(CaptureMode::Audio).await.unwrap();

    let err = fx.composer.flip_camera().await.unwrap_err();
    assert!(matches!(
        err,
        ComposerError::Capture(CaptureError::FlipUnsupported)
    ));
    assert_eq!(fx.composer.capture().current().name(), "preview");
}

#[tokio::test(start_paused = true)]
async fn test_denied_session_can_retry() {
    let devices = SyntheticDevices::new().with_sample_rate(8_000);
    devices.deny(DeviceKind::Microphone);
    let mut fx = TestFixture::with_devices(devices);

    let state = fx.composer.start_segment(CaptureMode::Audio).await.unwrap();
    match &state {
        CaptureState::Denied { mode, reason } => {
            assert_eq!(*mode, CaptureMode::Audio);
            assert!(reason.contains("denied"), "reason: {}", reason);
        }
        other => panic!("expected denied, got {:?}", other),
    }
    assert_eq!(fx.devices.live_tracks(), 0);

    // Recording is not reachable from Denied.
    assert!(fx.composer.begin_recording().await.is_err());

    fx.devices.allow(DeviceKind::Microphone);
    let state = fx.composer.retry_capture().await.unwrap();
    assert_eq!(
        state,
        CaptureState::Preview {
            mode: CaptureMode::Audio,
            facing: None
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_a_recording_releases_everything() {
    let mut fx = TestFixture::new();
    fx.composer.start_segment(CaptureMode::Video).await.unwrap();
    fx.composer.begin_recording().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    fx.composer.cancel_capture().await;

    assert!(fx.composer.capture().current().is_idle());
    assert!(!fx.composer.capture().is_live().await);
    assert_eq!(fx.devices.live_tracks(), 0);
    assert_eq!(fx.composer.segment_count(), 0);
    assert_eq!(fx.composer.remaining_secs(), 90);
    assert_eq!(fx.composer.capture().previews().live_count(), 0);

    // The budget timer from the cancelled session must not fire later.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(fx.composer.capture().current().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_previews_are_released_exactly_once() {
    let mut fx = TestFixture::new();
    let previews = fx.composer.capture().previews().clone();

    let first = fx.record(CaptureMode::Audio, 2).await;
    fx.record(CaptureMode::Video, 2).await;

    // Recorded, then thrown away at review.
    fx.composer.start_segment(CaptureMode::Screen).await.unwrap();
    fx.composer.begin_recording().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    fx.stop().await;
    fx.composer.discard_segment().await.unwrap();

    fx.composer.remove_segment(first).unwrap();
    assert_eq!(previews.created_count(), 3);
    assert_eq!(previews.live_count(), 1);

    fx.composer.teardown().await;
    assert_eq!(previews.live_count(), 0);
    assert_eq!(previews.revoked_count(), previews.created_count());
    assert_eq!(fx.devices.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_segment_count_is_capped() {
    let mut fx = TestFixture::new();
    fx.record(CaptureMode::Audio, 1).await;
    fx.record(CaptureMode::Audio, 1).await;
    fx.record(CaptureMode::Audio, 1).await;
    let attempts = fx.devices.acquisition_attempts();

    let err = fx
        .composer
        .start_segment(CaptureMode::Audio)
        .await
        .unwrap_err();
    assert!(matches!(err, ComposerError::SegmentLimit { limit: 3 }));
    assert_eq!(fx.devices.acquisition_attempts(), attempts);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_runs_before_recording() {
    let mut config = TestFixture::config();
    config.capture.countdown_secs = 3;
    let mut fx = TestFixture::with_config(SyntheticDevices::new().with_sample_rate(8_000), config);

    fx.composer.start_segment(CaptureMode::Audio).await.unwrap();
    let started = tokio::time::Instant::now();
    let state = fx.composer.begin_recording().await.unwrap();

    assert_eq!(state.name(), "recording");
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_screen_request_leaves_no_device_running() {
    let mut fx = TestFixture::new();
    fx.devices.stall(DeviceKind::Microphone);

    // The display is granted, then the microphone prompt is never answered.
    let pending = fx.composer.start_segment(CaptureMode::Screen);
    assert!(tokio::time::timeout(Duration::from_secs(30), pending)
        .await
        .is_err());

    assert_eq!(fx.devices.live_tracks(), 0);
    assert!(fx.composer.capture().current().is_idle());
    assert_eq!(fx.composer.remaining_secs(), 90);

    fx.devices.allow(DeviceKind::Microphone);
    let state = fx.composer.start_segment(CaptureMode::Screen).await.unwrap();
    assert_eq!(state.name(), "preview");
    assert_eq!(fx.devices.live_tracks(), 2);
}
