use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ember_replay::broadcast::{SubscriberHub, Subscription};
use ember_replay::config::PlaybackConfig;
use ember_replay::core::{parse_timestamp, PlaybackEvent};
use ember_replay::playback::SessionController;
use ember_replay::store::MemoryStore;

const USAGE: &str = "usage: ember-replay <archive.csv|archive.json> <start> <end> [speed] [--config <path>]";

struct Args {
    archive: String,
    start: String,
    end: String,
    speed: Option<String>,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(arg),
        }
    }

    if !(3..=4).contains(&positional.len()) {
        bail!(USAGE);
    }

    let mut positional = positional.into_iter();
    Ok(Args {
        archive: positional.next().unwrap_or_default(),
        start: positional.next().unwrap_or_default(),
        end: positional.next().unwrap_or_default(),
        speed: positional.next(),
        config,
    })
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = PlaybackConfig::load(args.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run(args, config))
}

async fn run(args: Args, config: PlaybackConfig) -> Result<()> {
    let start = parse_timestamp(&args.start)?;
    let end = parse_timestamp(&args.end)?;

    let store = MemoryStore::from_archive(&args.archive)?;
    if store.is_empty() {
        warn!("Archive {} holds no records", args.archive);
    } else if let Some((first, last)) = store.time_span() {
        info!("Loaded {} records from {} ({} to {})", store.len(), args.archive, first, last);
    }
    info!("Speed table: {}", serde_json::to_string(&config.client_view())?);

    let hub = Arc::new(SubscriberHub::new(config.subscriber_buffer));
    let mut subscription = hub.subscribe().await;
    let controller = SessionController::new(config, Arc::new(store), hub.clone());

    let ack = controller.start(start, end, args.speed.as_deref()).await?;
    let mut out = std::io::stdout();
    write_json_line(&mut out, &ack)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    forward_events(&controller, &mut subscription, &mut out, shutdown).await
}

fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Print playback events until the session is over.
///
/// Returns once the end notification is printed or both session tasks have
/// exited; the latter covers an end notification dropped on a full queue.
/// `shutdown` resolving issues a stop.
async fn forward_events<W: Write>(
    controller: &SessionController,
    subscription: &mut Subscription,
    out: &mut W,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let finished = controller.wait_finished();
    tokio::pin!(finished);
    tokio::pin!(shutdown);
    let mut interrupted = false;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown, if !interrupted => {
                interrupted = true;
                info!("Interrupted, stopping playback");
                match controller.stop().await {
                    Ok(ack) => {
                        // Both tasks are joined: whatever was delivered is already queued
                        drain(subscription, out)?;
                        write_json_line(out, &ack)?;
                        return Ok(());
                    }
                    Err(e) => warn!("Stop rejected: {} ({})", e, e.condition()),
                }
            }
            event = subscription.recv() => {
                let Some(event) = event else {
                    warn!("Subscription closed before end of playback");
                    return Ok(());
                };
                write_json_line(out, &event)?;
                if matches!(event, PlaybackEvent::PlaybackEnded(_)) {
                    return Ok(());
                }
            }
            _ = &mut finished => {
                drain(subscription, out)?;
                return Ok(());
            }
        }
    }
}

fn drain<W: Write>(subscription: &mut Subscription, out: &mut W) -> Result<()> {
    while let Some(event) = subscription.try_recv() {
        write_json_line(out, &event)?;
    }
    Ok(())
}
