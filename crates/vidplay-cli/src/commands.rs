//! CLI command implementations

use crate::output::{self, Field, OutputFormat};
use crate::script::{Script, Step};
use anyhow::anyhow;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vidplay_core::sim::SimulatedEngineFactory;
use vidplay_core::{PlaybackSession, SessionConfig, SessionDeps, SourceDescriptor};

/// Run a playback script against the simulated engine
pub async fn run(path: &Path, progress: bool, format: &str) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    let script = Script::load(path)?;
    info!(steps = script.steps.len(), "Loaded script {}", path.display());

    let factory = Arc::new(SimulatedEngineFactory::new(script.engine.clone()));
    let session = PlaybackSession::new(script.config.clone(), SessionDeps::new(factory))?;

    let bar = if progress && format != OutputFormat::Json {
        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {msg}",
        )?);
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(bar)
    } else {
        None
    };

    // Event printer; ends when the session closes its sink
    let mut events = session.events().attach();
    let printer = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while let Some(record) = events.recv().await {
                print_line(bar.as_ref(), output::event_line(&record, format));
            }
        })
    };

    // Position bar follows the published snapshots
    let watcher = bar.clone().map(|bar| {
        let mut snapshots = session.subscribe();
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.duration_ms > 0 {
                    bar.set_length(snapshot.duration_ms as u64);
                }
                bar.set_position(snapshot.position_ms.max(0) as u64);
                bar.set_message(format!(
                    "{} {}",
                    snapshot.state,
                    output::format_ms(snapshot.position_ms)
                ));
            }
        })
    });

    session.set_source(script.source.clone()).await?;

    for (i, step) in script.steps.iter().enumerate() {
        debug!(step = i + 1, action = step.name(), "Running step");
        if let Err(e) = run_step(&session, step, format, bar.as_ref()).await {
            warn!(step = i + 1, action = step.name(), error = %e, "Step failed");
            print_line(bar.as_ref(), format!("step {} ({}) failed: {e}", i + 1, step.name()));
        }
    }

    let summary = session.status().await?;
    session.dispose();
    let _ = printer.await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    match format {
        OutputFormat::Json => println!("{}", output::json(&summary)),
        _ => {
            println!("\nSession {}:", summary.session_id);
            println!("{}", output::fields(output::snapshot_fields(&summary), format));
        }
    }

    Ok(())
}

async fn run_step(
    session: &PlaybackSession,
    step: &Step,
    format: OutputFormat,
    bar: Option<&ProgressBar>,
) -> anyhow::Result<()> {
    match step {
        Step::Play => session.play().await?,
        Step::Pause => session.pause().await?,
        Step::Seek { position_ms } => {
            let position = session.seek_to(*position_ms).await?;
            debug!(requested = position_ms, position, "Seek confirmed");
        }
        Step::SetSpeed { rate } => session.set_speed(*rate).await?,
        Step::SetVolume { volume } => session.set_volume(*volume).await?,
        Step::SetTrack { kind, index } => session.set_track(*kind, *index).await?,
        Step::SetLooping { looping } => session.set_looping(*looping).await?,
        Step::EnablePip { bounds } => {
            if !session.enable_pip(*bounds).await? {
                print_line(bar, "picture-in-picture not available".to_string());
            }
        }
        Step::SetPipActive { active } => session.set_pip_active(*active).await?,
        Step::SetSource { source } => session.set_source(source.clone()).await?,
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        Step::WaitUntil { state, timeout_ms } => {
            let target = state.to_lowercase();
            let mut snapshots = session.subscribe();
            tokio::time::timeout(
                Duration::from_millis(*timeout_ms),
                snapshots.wait_for(|s| s.state.to_string() == target),
            )
            .await
            .map_err(|_| anyhow!("timed out waiting for state {state}"))??;
        }
        Step::Status => {
            let snapshot = session.status().await?;
            let text = match format {
                OutputFormat::Json => serde_json::to_string(&snapshot)?,
                _ => output::fields(output::snapshot_fields(&snapshot), format),
            };
            print_line(bar, text);
        }
    }
    Ok(())
}

fn print_line(bar: Option<&ProgressBar>, line: String) {
    match bar {
        Some(bar) => bar.println(line),
        None => println!("{line}"),
    }
}

/// Show the effective configuration
pub fn config(file: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let config = match file {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::json(&config)),
        format => {
            let rows = vec![
                Field::new("Default rate", config.default_rate),
                Field::new("Retry attempts", config.retry.max_attempts),
                Field::new("Retry backoff", format!("{} ms ({:?})", config.retry.backoff_ms, config.retry.backoff)),
                Field::new("Stall threshold", format!("{} ticks", config.stall.threshold_ticks)),
                Field::new("Low water", format!("{} ms", config.stall.low_water_ms)),
                Field::new("High water", format!("{} ms", config.stall.high_water_ms)),
                Field::new("Track change grace", format!("{} ms", config.stall.track_change_grace_ms)),
                Field::new("Buffering updates", config.emit_buffering_updates),
            ];
            println!("Session configuration:");
            println!("{}", output::fields(rows, format));
        }
    }
    Ok(())
}

/// Arguments for `probe`
pub struct ProbeArgs {
    pub locator: String,
    pub asset: bool,
    pub license_url: Option<String>,
    pub certificate_url: Option<String>,
    pub cache_key: Option<String>,
}

/// Validate a descriptor and show how it resolves
pub fn probe(args: ProbeArgs, format: &str) -> anyhow::Result<()> {
    let mut descriptor = if args.asset {
        SourceDescriptor::asset(args.locator)
    } else {
        SourceDescriptor::network(args.locator)
    };
    if let Some(license_url) = &args.license_url {
        descriptor = descriptor.with_drm(args.certificate_url.as_deref(), license_url);
    } else if let Some(certificate_url) = args.certificate_url {
        // Rejected by resolve; kept so the error names the real problem
        descriptor.certificate_url = Some(certificate_url);
    }
    if let Some(cache_key) = args.cache_key {
        descriptor = descriptor.with_cache(cache_key, false);
    }

    let resolved = descriptor.resolve()?;

    match OutputFormat::from(format) {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "key": resolved.key,
                "location": resolved.location.to_string(),
                "format": resolved.format,
                "protected": resolved.drm.is_some(),
                "contentId": resolved.drm.as_ref().map(|d| d.content_id.clone()),
                "cacheKey": resolved.cache.as_ref().map(|c| c.cache_key.clone()),
            });
            println!("{}", output::json(&value));
        }
        format => {
            let rows = vec![
                Field::new("Key", &resolved.key),
                Field::new("Location", &resolved.location),
                Field::new("Format", resolved.format),
                Field::new("Protected", resolved.drm.is_some()),
                Field::new(
                    "Content id",
                    resolved.drm.as_ref().map(|d| d.content_id.as_str()).unwrap_or("-"),
                ),
                Field::new(
                    "Cache key",
                    resolved.cache.as_ref().map(|c| c.cache_key.as_str()).unwrap_or("-"),
                ),
            ];
            println!("Source:");
            println!("{}", output::fields(rows, format));
        }
    }
    Ok(())
}
