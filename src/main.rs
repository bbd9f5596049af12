use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use android_pilot::agent_engine::{AgentEvent, RunStatus};
use android_pilot::config::{self, RunConfig};

#[derive(Debug, Parser)]
#[command(name = "android-pilot", version, about = "Drive an Android device toward a goal with a vision model")]
struct CliArgs {
    /// Natural-language goal, e.g. "open Settings and enable dark mode".
    #[arg(long)]
    goal: String,

    #[arg(long, default_value_t = 20)]
    max_steps: u32,

    /// Free-text context passed to the model.
    #[arg(long)]
    context: Option<String>,

    /// Extra instruction for the model; may be repeated.
    #[arg(long = "instruction")]
    instructions: Vec<String>,

    /// Wait for Enter after each executed action ("q" stops the run).
    #[arg(long)]
    pause: bool,

    /// Log prompts and raw model responses.
    #[arg(long)]
    debug: bool,

    /// Path to config.toml (defaults to next to the executable, then the working directory).
    #[arg(long, env = "ANDROID_PILOT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let app = match config::load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::from(2);
        }
    };

    let run_config = RunConfig {
        goal: args.goal,
        max_steps: args.max_steps,
        context: args.context,
        instructions: args.instructions,
        pause_after_each_action: args.pause,
        debug: args.debug,
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            ctrl_c_token.cancel();
        }
    });

    let events = if run_config.pause_after_each_action {
        let (tx, rx) = mpsc::channel::<AgentEvent>(1);
        tokio::spawn(read_confirmations(tx));
        Some(rx)
    } else {
        None
    };

    let result = android_pilot::run(&app, run_config, cancel, events).await;

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "could not serialize run result"),
    }

    match result.status {
        RunStatus::Achieved => ExitCode::SUCCESS,
        RunStatus::AbortedOnError => ExitCode::from(1),
        RunStatus::MaxStepsExceeded => ExitCode::from(3),
        RunStatus::UserCancelled => ExitCode::from(130),
    }
}

/// Enter continues, `q`/`quit`/`stop` ends the run. The engine discards
/// confirmations typed before it pauses, so extra Enters never approve a
/// later step.
async fn read_confirmations(tx: mpsc::Sender<AgentEvent>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let event = match lines.next_line().await {
            Ok(Some(line)) => match line.trim().to_ascii_lowercase().as_str() {
                "q" | "quit" | "stop" => AgentEvent::Stop,
                _ => AgentEvent::Continue,
            },
            Ok(None) | Err(_) => AgentEvent::Stop,
        };
        let stop = event == AgentEvent::Stop;
        if tx.send(event).await.is_err() || stop {
            break;
        }
    }
}
