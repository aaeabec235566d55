//! Pre-interview microphone check: list input sources and show a live level.

use anyhow::Result;
use clap::Parser;
use interview_live::audio::pulse::{list_sources, DeviceType, PulseDevices};
use interview_live::audio::{level_percent, AudioDevices, AudioFormat};
use interview_live::InterviewConfig;
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mic_check", about = "Check the microphone before an interview")]
struct Args {
    /// PulseAudio source to test instead of the default
    #[arg(long, env = "INTERVIEW_INPUT_DEVICE")]
    device: Option<String>,

    /// How long to show the level meter, in seconds
    #[arg(long, default_value_t = 3)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let config = InterviewConfig::from_env()?;

    println!("Available microphones:");
    match list_sources(DeviceType::Microphone) {
        Ok(sources) if sources.is_empty() => println!("  (none found)"),
        Ok(sources) => {
            for (i, source) in sources.iter().enumerate() {
                println!("{}: {}", i + 1, source.description);
                println!("   Name: {}", source.name);
                println!(
                    "   Rate: {} Hz, Channels: {}",
                    source.sample_rate, source.channels
                );
            }
        }
        Err(e) => println!("Error listing devices: {}", e),
    }

    let format = AudioFormat {
        sample_rate: config.sample_rate,
        channels: 1,
        // 50ms frames keep the meter responsive
        frame_samples: (config.sample_rate / 20) as usize,
        app_name: "interview-live-mic-check".to_string(),
        device: args.device.or(config.input_device),
    };

    let devices = PulseDevices::new();
    let mut capture = match devices.open_capture(&format) {
        Ok(capture) => capture,
        Err(e) => {
            println!("  ❌ {}", e);
            println!("Check that a microphone is connected and allowed.");
            std::process::exit(1);
        }
    };

    println!("\nSpeak now...");
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut peak = 0u8;

    while Instant::now() < deadline {
        let Ok(Some(frame)) = tokio::time::timeout_at(deadline, capture.recv()).await else {
            break;
        };
        let level = level_percent(&frame.samples);
        peak = peak.max(level);
        let bar = "█".repeat(level as usize / 2);
        print!("\r  {:>3}% {:<50}", level, bar);
        let _ = std::io::stdout().flush();
    }
    capture.stop();

    println!();
    if peak < 2 {
        println!("  ⚠️ No input detected. Is the microphone muted?");
    } else {
        println!("  ✅ Microphone working (peak level {}%)", peak);
    }
    Ok(())
}
