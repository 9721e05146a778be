use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::Parser;
use tokio::spawn;
use tokio::sync::mpsc::{self, Receiver as TokioReceiver};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod ble;
mod config;
mod controller;
mod decode;
mod discovery;
mod error;
mod fake;
mod session;
mod signal;
mod stats;

use ble::{BtleplugCentral, HeartRateCentral};
use config::{parse_duration, Args};
use controller::{SessionConfig, SessionController};
use fake::FakeCentral;
use session::{SessionOutcome, SessionReport};
use signal::SessionEvent;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let duration = match &args.duration {
        Some(input) => parse_duration(input)?,
        None => prompt_duration()?,
    };
    let session_config = SessionConfig {
        duration,
        policy: args.policy(),
        discovery_timeout: args.discovery_timeout(),
    };

    let central: Box<dyn HeartRateCentral> = if args.fake {
        Box::new(FakeCentral)
    } else {
        Box::new(BtleplugCentral::new().await?)
    };

    // Ctrl-C cancels the recording wait; the controller still tears down.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let (events_tx, events_rx) = mpsc::channel(128);
    let printer = spawn(print_events(events_rx));

    let report = SessionController::new(central.as_ref(), events_tx)
        .run(&session_config, cancel)
        .await?;

    // The event sender went down with the controller, so the printer drains
    // and exits before the summary is printed.
    let _ = printer.await;
    print_report(&report);
    Ok(())
}

fn prompt_duration() -> Result<std::time::Duration> {
    print!("Enter recording duration in seconds (e.g. 300) or minutes (e.g. 5m): ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(parse_duration(&line)?)
}

async fn print_events(mut rx: TokioReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::ScanStarted => println!("Scanning for device..."),
            SessionEvent::DeviceFound { device } => {
                println!("Found {}! Connecting...", device.label());
            }
            SessionEvent::Connected { .. } => println!("Connected! Waiting for data..."),
            SessionEvent::RecordingStarted { duration } => {
                let seconds = duration.as_secs_f64();
                println!(
                    "Recording for {seconds:.0} seconds ({:.1} minutes)...",
                    seconds / 60.0
                );
            }
            SessionEvent::HeartRate { sample } => {
                println!(
                    "Time: {:.1}s | Heart Rate: {} bpm",
                    sample.elapsed_seconds, sample.heart_rate_bpm
                );
            }
            SessionEvent::RecordingFinished { outcome } => match outcome {
                SessionOutcome::Completed => println!("Recording finished."),
                SessionOutcome::Interrupted => println!("Recording interrupted."),
                SessionOutcome::LinkLost => {
                    println!("Device link lost; keeping the samples collected so far.");
                }
            },
        }
    }
}

fn print_report(report: &SessionReport) {
    if report.samples.is_empty() {
        println!("No samples recorded.");
        return;
    }

    let rates = report.heart_rates();
    println!(
        "\nRecorded {} samples from {}.",
        rates.len(),
        report.device.label()
    );
    if report.dropped > 0 {
        println!("Dropped {} malformed notification(s).", report.dropped);
    }

    println!("\nStatistics:");
    if let Ok(mean) = stats::mean(&rates) {
        // Truncated for display only; the exported series stays exact.
        println!("Average: {} BPM", mean as u32);
    }
    match stats::trimmed_mean(&rates) {
        Ok(trimmed) => {
            let max = rates.iter().copied().max().unwrap_or(0);
            let min = rates.iter().copied().min().unwrap_or(0);
            println!("Trimmed Mean: {} BPM (Max: {max}, Min: {min})", trimmed as u32);
        }
        Err(err) => println!("Trimmed mean unavailable: {err}"),
    }
}
