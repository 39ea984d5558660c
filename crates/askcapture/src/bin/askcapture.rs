use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use askcapture::synthetic::{DeviceKind, SyntheticDevices};
use askcapture::{
    telemetry, AttachmentFile, CaptureMode, CaptureState, Composer, QuestionPayload,
    StoreUploader, Submitter, WavEncoder,
};
use askconf::AskConfig;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

/// Record a question with synthetic devices and upload it to the local store.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./askcapture.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full capture session and print the submitted payload
    Record {
        /// Segments to record, e.g. "video:3,audio:2,screen:2" (mode:seconds)
        #[arg(long, value_delimiter = ',', value_parser = parse_step, default_value = "audio:2")]
        plan: Vec<PlanStep>,

        /// Files to attach
        #[arg(long)]
        attach: Vec<PathBuf>,

        /// Question title
        #[arg(long, default_value = "Recorded question")]
        title: String,

        /// Question body
        #[arg(long, default_value = "")]
        text: String,

        /// Deny microphone access
        #[arg(long)]
        deny_mic: bool,

        /// Deny both cameras
        #[arg(long)]
        deny_camera: bool,

        /// Override the configured countdown
        #[arg(long)]
        countdown: Option<u32>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy)]
struct PlanStep {
    mode: CaptureMode,
    secs: u64,
}

fn parse_step(s: &str) -> Result<PlanStep, String> {
    let (mode, secs) = s
        .split_once(':')
        .ok_or_else(|| format!("expected mode:seconds, got '{}'", s))?;

    let mode = match mode.trim() {
        "video" => CaptureMode::Video,
        "audio" => CaptureMode::Audio,
        "screen" => CaptureMode::Screen,
        other => return Err(format!("unknown mode '{}'", other)),
    };
    let secs = secs
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid seconds '{}': {}", secs, e))?;

    Ok(PlanStep { mode, secs })
}

struct StdoutSubmitter;

#[async_trait]
impl Submitter for StdoutSubmitter {
    async fn submit(&self, payload: &QuestionPayload) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(payload)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = AskConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Config => {
            for file in &sources.files {
                eprintln!("# loaded {}", file.display());
            }
            for var in &sources.env_overrides {
                eprintln!("# override {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Command::Record {
            plan,
            attach,
            title,
            text,
            deny_mic,
            deny_camera,
            countdown,
        } => {
            if let Some(secs) = countdown {
                config.capture.countdown_secs = secs;
            }
            telemetry::init(&config.telemetry).context("Failed to initialize tracing")?;

            let devices = SyntheticDevices::new().with_sample_rate(config.mixer.sample_rate);
            if deny_mic {
                devices.deny(DeviceKind::Microphone);
            }
            if deny_camera {
                devices.deny(DeviceKind::FrontCamera);
                devices.deny(DeviceKind::BackCamera);
            }

            let uploader = StoreUploader::open(&config.paths.store_dir).with_context(|| {
                format!("Failed to open store at {}", config.paths.store_dir.display())
            })?;

            let mut composer = Composer::new(
                &config,
                Arc::new(devices),
                Arc::new(WavEncoder::new(config.mixer.sample_rate)),
                Arc::new(uploader),
            );

            let mut files = Vec::with_capacity(attach.len());
            for path in &attach {
                files.push(AttachmentFile::from_path(path).await?);
            }
            if !files.is_empty() {
                composer.add_attachments(files)?;
            }

            let outcome = record_plan(&mut composer, &plan).await;
            if let Err(err) = &outcome {
                warn!(error = %err, "Recording plan aborted");
            }

            composer.wait_for_uploads().await;
            let result = composer.proceed(&title, &text, &StdoutSubmitter).await;
            composer.teardown().await;

            result?;
            outcome
        }
    }
}

async fn record_plan(composer: &mut Composer, plan: &[PlanStep]) -> Result<()> {
    for step in plan {
        let state = composer.start_segment(step.mode).await?;
        if let CaptureState::Denied { reason, .. } = state {
            warn!(mode = %step.mode, reason = %reason, "Skipping segment");
            composer.cancel_capture().await;
            continue;
        }

        let state = composer.begin_recording().await?;
        let limit = match state {
            CaptureState::Recording { limit_secs, .. } => u64::from(limit_secs),
            other => bail!("recorder did not start, state is {}", other.name()),
        };
        if step.secs > limit {
            info!(requested = step.secs, limit, "Segment will stop at the remaining budget");
        }

        tokio::time::sleep(Duration::from_secs(step.secs.min(limit))).await;
        if let Err(err) = composer.stop_recording().await {
            // The budget timer may have stopped the recorder first.
            let mut states = composer.capture().subscribe();
            let state = states
                .wait_for(|s| !matches!(s, CaptureState::Recording { .. }))
                .await
                .context("capture machine went away")?
                .clone();
            if !matches!(state, CaptureState::Review { .. }) {
                return Err(err.into());
            }
            debug!(error = %err, "Recording already stopped at the time limit");
        }

        let id = composer.accept_segment().await?;
        info!(segment.id = %id, remaining_secs = composer.remaining_secs(), "Segment recorded");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step() {
        let step = parse_step("screen:12").unwrap();
        assert_eq!(step.mode, CaptureMode::Screen);
        assert_eq!(step.secs, 12);

        assert!(parse_step("screen").is_err());
        assert!(parse_step("hologram:3").is_err());
        assert!(parse_step("audio:x").is_err());
    }

    fn composer(store: &std::path::Path, devices: SyntheticDevices) -> Composer {
        let mut config = AskConfig::default();
        config.capture.countdown_secs = 0;
        Composer::new(
            &config,
            Arc::new(devices),
            Arc::new(WavEncoder::new(8_000)),
            Arc::new(StoreUploader::open(store).unwrap()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_step_at_budget_edge() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut composer = composer(dir.path(), SyntheticDevices::new().with_sample_rate(8_000));

        // The second step sleeps exactly as long as the budget timer runs.
        let plan = [parse_step("audio:30").unwrap(), parse_step("audio:75").unwrap()];
        record_plan(&mut composer, &plan).await.unwrap();

        assert_eq!(composer.segment_count(), 2);
        assert_eq!(composer.used_secs(), 90);
        assert_eq!(composer.remaining_secs(), 0);
        composer.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_skips_denied_segment() {
        let dir = tempfile::TempDir::new().unwrap();
        let devices = SyntheticDevices::new().with_sample_rate(8_000);
        devices.deny(DeviceKind::Microphone);
        let mut composer = composer(dir.path(), devices);

        let plan = [parse_step("audio:2").unwrap(), parse_step("screen:3").unwrap()];
        record_plan(&mut composer, &plan).await.unwrap();

        assert_eq!(composer.segment_count(), 1);
        assert_eq!(composer.used_secs(), 3);
        composer.teardown().await;
    }

    #[test]
    fn test_cli_parses_plan() {
        let cli = Cli::parse_from([
            "askcapture",
            "record",
            "--plan",
            "video:3,audio:2",
            "--deny-mic",
        ]);
        match cli.command {
            Command::Record { plan, deny_mic, .. } => {
                assert_eq!(plan.len(), 2);
                assert!(deny_mic);
            }
            Command::Config => panic!("expected record"),
        }
    }
}
