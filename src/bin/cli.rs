use anyhow::{bail, Context, Result};
use livecam::device::NativeDevice;
use livecam::{CameraSession, LivecamConfig, PermissionOracle, SessionStatus};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const FRAME_POLL: Duration = Duration::from_millis(100);

struct Args {
    config: Option<PathBuf>,
    json: bool,
    seconds: u64,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        config: None,
        json: false,
        seconds: 10,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.get(i).context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--seconds" => {
                i += 1;
                let value = args.get(i).context("--seconds needs a value")?;
                parsed.seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value: {}", value))?;
            }
            "--json" => parsed.json = true,
            "--help" | "-h" => {
                println!("Usage: livecam-cli [--config PATH] [--json] [--seconds N]");
                std::process::exit(0);
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }
    Ok(parsed)
}

fn print_status(status: &SessionStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
    } else {
        let mut line = format!("[{}] {}", status.state, status.message);
        if let Some(error) = &status.error {
            line.push_str(&format!(" ({})", error.kind));
        }
        if status.retry_available {
            line.push_str(" [retry available]");
        }
        if status.manual_start_available {
            line.push_str(" [manual start available]");
        }
        println!("{}", line);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    livecam::init_logging();

    let args: Vec<String> = env::args().collect();
    let args = parse_args(&args)?;

    let config = LivecamConfig::load(args.config.as_deref()).with_context(|| {
        let path = args.config.clone().unwrap_or_else(LivecamConfig::default_path);
        format!("failed to load {}", path.display())
    })?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let session = CameraSession::from_config(NativeDevice::new(config.capture.jpeg_quality), &config)
        .permissions(PermissionOracle::native())
        .mount();
    let mut statuses = session.subscribe();
    print_status(&session.status(), args.json)?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.seconds);
    let mut poll = tokio::time::interval(FRAME_POLL);
    let mut reported = None;

    while running.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
        tokio::select! {
            received = statuses.recv() => match received {
                Ok(status) => print_status(&status, args.json)?,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = poll.tick() => {
                if let Ok((generation, image)) = session.sample_frame().await {
                    if reported != Some(generation) && !image.is_empty() {
                        session.report_frame_decoded(generation, image.width, image.height)?;
                        reported = Some(generation);
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }

    let last = session.status();
    session.unmount().await;
    if !args.json {
        println!("Final state: {}", last.state);
    }
    Ok(())
}
