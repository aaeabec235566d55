//! interview-live - run a live voice interview from the terminal
//!
//! Connects the default microphone and speaker to the realtime interviewer for
//! the given session. Press Ctrl-C to end the interview.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use interview_live::audio::pulse::PulseDevices;
use interview_live::backend::http::HttpBackend;
use interview_live::backend::memory::MemoryBackend;
use interview_live::backend::{SessionApi, TurnStore};
use interview_live::transport::WsConnector;
use interview_live::{InterviewConfig, InterviewSession, SessionStatus, TranscriptUpdate};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "interview-live", about = "Run a live AI voice interview")]
struct Args {
    /// Interview session to run
    session_id: String,

    /// Interview platform base URL
    #[arg(long, env = "INTERVIEW_API_BASE")]
    api_base: Option<String>,

    /// Run against an in-process backend, connecting with OPENAI_API_KEY
    #[arg(long)]
    local: bool,

    /// Interviewer instructions for --local sessions
    #[arg(long, requires = "local")]
    instructions: Option<String>,

    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,

    /// PulseAudio source for the microphone
    #[arg(long, env = "INTERVIEW_INPUT_DEVICE")]
    input_device: Option<String>,

    /// PulseAudio sink for the interviewer's voice
    #[arg(long, env = "INTERVIEW_OUTPUT_DEVICE")]
    output_device: Option<String>,
}

fn backend(args: &Args, config: &InterviewConfig) -> Result<(Arc<dyn SessionApi>, Arc<dyn TurnStore>)> {
    if args.local {
        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set with --local")?;
        let memory = Arc::new(MemoryBackend::with_api_key(api_key));
        memory.schedule(args.session_id.clone(), args.instructions.clone());
        info!("Using in-process backend");
        let api: Arc<dyn SessionApi> = memory.clone();
        let store: Arc<dyn TurnStore> = memory;
        Ok((api, store))
    } else {
        let http = Arc::new(HttpBackend::new(config.api_base_url.clone())?);
        info!("Using interview platform at {}", config.api_base_url);
        let api: Arc<dyn SessionApi> = http.clone();
        let store: Arc<dyn TurnStore> = http;
        Ok((api, store))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = InterviewConfig::from_env()?;
    if let Some(base) = &args.api_base {
        config.api_base_url = base.clone();
    }
    if args.input_device.is_some() {
        config.input_device = args.input_device.clone();
    }
    if args.output_device.is_some() {
        config.output_device = args.output_device.clone();
    }
    config.validate()?;

    let (api, store) = backend(&args, &config)?;
    let connector = Arc::new(WsConnector::new(&config));
    let devices = Arc::new(PulseDevices::new());

    let mut session = InterviewSession::new(config, api, store, connector, devices);
    if args.muted {
        session.set_muted(true);
    }

    let mut transcript = session.subscribe_transcript();
    tokio::spawn(async move {
        loop {
            match transcript.recv().await {
                Ok(TranscriptUpdate::Completed(turn)) => {
                    println!("{:>11}: {}", turn.speaker.label(), turn.text);
                }
                Ok(TranscriptUpdate::Partial { .. }) => {}
                Err(RecvError::Lagged(n)) => warn!("Transcript display skipped {} updates", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = session.start(&args.session_id).await {
        error!("Could not start interview: {}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
    println!("🎙️ Interview started. Press Ctrl-C to finish.");

    let mut status = session.watch_status();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, ending interview");
            session.end_interview().await;
        }
        _ = status.wait_for(|s| s.status.is_terminal()) => {}
    }

    match session.wait().await {
        Some(outcome) if outcome.status == SessionStatus::Ended => {
            println!(
                "✅ Interview ended: {} turns, {} saved, {} failed, {} dropped",
                outcome.transcript.len(),
                outcome.turns.persisted,
                outcome.turns.failed,
                outcome.turns.dropped
            );
            Ok(())
        }
        Some(outcome) => {
            error!("Interview failed: {}", outcome.error.unwrap_or_default());
            eprintln!("{}", interview_live::error::RESTART_MESSAGE);
            std::process::exit(1);
        }
        None => Ok(()),
    }
}
