// src/main.rs
use std::env;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ecg_stream::analysis::{AnalysisReport, SignalSource, SyntheticEcgSource};
use ecg_stream::{
    load_config, AnomalyScorer, FrameEngine, FrameScheduler, SharedSettings, SignalTransformer,
    StreamConfig, StreamEvent, TemplateScorer,
};
use log::{info, warn};
use serde_json::json;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// Usage: ecg-stream [config.json] [output-dir]
fn main() -> Result<()> {
    env_logger::init();
    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => load_config(&path).with_context(|| format!("loading config {path}"))?,
        None => StreamConfig::default(),
    };
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| ".".to_owned()));
    fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let mut scorer: Box<dyn AnomalyScorer> = match &config.model_path {
        Some(path) => Box::new(
            TemplateScorer::from_path(path)
                .with_context(|| format!("loading model {}", path.display()))?,
        ),
        None => {
            warn!("no model_path configured; scoring against a flat template");
            Box::new(TemplateScorer::flat())
        }
    };
    scorer.warm_up().context("warming up scorer")?;

    let mut source = SyntheticEcgSource::new(20.0, 42);
    source.sample_rate_hz = config.transformer.sample_rate_hz;
    let signal = source
        .next_signal()?
        .context("synthetic source produced no recording")?;
    let beats = signal.annotations().len();

    let settings = SharedSettings::new(config.initial_settings()?);
    let engine = FrameEngine::new(
        signal,
        SignalTransformer::new(config.transformer.clone())?,
        scorer,
        settings,
        config.engine.clone(),
    )?;

    let mut scheduler = FrameScheduler::spawn(engine);
    let started = Instant::now();
    scheduler.start();
    scheduler.spawn_ticker(config.engine.tick_interval());

    let mut analyzed = Vec::new();
    while scheduler.is_running() {
        thread::sleep(POLL_INTERVAL);
        record_events(scheduler.drain_events(), &mut analyzed);
    }
    scheduler.stop_ticker();
    scheduler.flush()?;
    record_events(scheduler.drain_events(), &mut analyzed);

    let snapshot = scheduler.snapshot();
    fs::write(out_dir.join("main.png"), snapshot.main.to_png()?)?;
    if let Some(sub_frame) = &snapshot.sub_frame {
        fs::write(out_dir.join("sub_frame.png"), sub_frame.canvas.to_png()?)?;
        sub_frame
            .thumbnail(432, 100)?
            .save(out_dir.join("sub_frame_thumb.png"))?;
    }

    let scored: Vec<_> = analyzed.iter().flat_map(|r| r.scored.iter()).collect();
    let summary = json!({
        "samples": scheduler.signal_len(),
        "annotated_beats": beats,
        "windows_analyzed": scheduler.windows_analyzed(),
        "peaks_scored": scored.len(),
        "peaks_flagged": scored.iter().filter(|p| p.flagged).count(),
        "degenerate_windows": analyzed.iter().filter(|r| r.degenerate).count(),
        "elapsed_secs": started.elapsed().as_secs_f64(),
        "settings": scheduler.settings().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn record_events(events: Vec<StreamEvent>, analyzed: &mut Vec<AnalysisReport>) {
    for event in events {
        match event {
            StreamEvent::Log(line) => info!("{line}"),
            StreamEvent::SignalLoaded { len } => info!("signal loaded ({len} samples)"),
            StreamEvent::Analysis(report) => {
                for peak in report.scored.iter().filter(|p| p.flagged) {
                    info!(
                        "window {}: beat at sample {} flagged (error {:.5})",
                        report.window_index, peak.sample_index, peak.error
                    );
                }
                analyzed.push(report);
            }
            StreamEvent::Exhausted { position } => info!("stream ended at {position}"),
        }
    }
}
