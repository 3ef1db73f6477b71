//! Motion feature runner
//!
//! Generates a moving synthetic scene on the configured backend, runs it
//! through optical flow and feature extraction, and prints one report per
//! frame to stdout. Latency lines go to stderr.
//!
//! Usage: `runner [config.toml]` (defaults to `configs/runner.toml` when present).

use anyhow::{bail, Context, Result};
use common_io::Stage;
use config::{AppConfig, ReportFormat};
use motion_features::{FeatureExtractor, FeatureGridMeta};
use optical_flow::OpticalFlowStage;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod report;
mod synthetic;

use report::FrameReport;
use synthetic::ShiftFlowProvider;

const DEFAULT_CONFIG: &str = "configs/runner.toml";

fn load_config() -> Result<AppConfig> {
    match std::env::args().nth(1) {
        Some(path) => AppConfig::from_file(&path),
        None if Path::new(DEFAULT_CONFIG).exists() => AppConfig::from_file(DEFAULT_CONFIG),
        None => {
            tracing::info!("no config file given, using defaults");
            Ok(AppConfig::default())
        }
    }
}

/// The one device both elements run on. An explicit id in either section
/// selects it, and conflicting explicit ids are rejected before anything opens.
fn shared_device_id(config: &AppConfig) -> Result<i32> {
    let features = config.feature_extractor.device_id;
    let flow = config.optical_flow.device_id;
    match (features, flow) {
        (f, o) if f >= 0 && o >= 0 && f != o => {
            bail!("feature_extractor.device_id = {f} conflicts with optical_flow.device_id = {o}")
        }
        (f, _) if f >= 0 => Ok(f),
        (_, o) => Ok(o),
    }
}

/// Run the configured number of frames, handing each report to `sink`.
fn run(config: &AppConfig, mut sink: impl FnMut(&FrameReport) -> Result<()>) -> Result<()> {
    let runner = &config.runner;
    let device_id = shared_device_id(config)?;
    let ctx = gpu_context::open(runner.backend, device_id)
        .with_context(|| format!("opening {:?} backend on device {device_id}", runner.backend))?;
    tracing::info!(
        backend = ctx.backend().name(),
        device = ctx.device_id(),
        width = runner.width,
        height = runner.height,
        frames = runner.frames,
        "runner starting"
    );

    let shift = (runner.shift_x, runner.shift_y);
    let mut flow = OpticalFlowStage::new(
        config.optical_flow.clone(),
        ctx.clone(),
        ShiftFlowProvider::new(shift, config.optical_flow.output_vector_grid_size),
    );
    let mut features = FeatureExtractor::new(config.feature_extractor.clone(), ctx.clone());
    flow.start().context("starting optical flow")?;
    features.start().context("starting feature extractor")?;

    for idx in 0..runner.frames {
        let buffer = synthetic::moving_frame(&ctx, runner.width, runner.height, idx, shift)
            .with_context(|| format!("generating frame {idx}"))?;
        let buffer = telemetry::time_stage("optical_flow", &mut flow, buffer);
        let buffer = telemetry::time_stage("motion_features", &mut features, buffer);

        let report = match buffer.attached::<FeatureGridMeta>() {
            Some(meta) => FrameReport::from_meta(meta),
            None => FrameReport::empty(
                buffer.meta.frame_idx,
                buffer.meta.timestamp_ns(),
                config.feature_extractor.features_grid_width,
                config.feature_extractor.features_grid_height,
            ),
        };
        sink(&report)?;
    }

    features.stop()?;
    flow.stop()?;
    tracing::info!("runner finished");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;
    let format = config.runner.report;
    run(&config, |report| {
        match format {
            ReportFormat::Json => println!("{}", report.to_json()?),
            ReportFormat::Summary => println!("{}", report.summary()),
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::RunnerConfig;
    use motion_features::FeatureExtractorConfig;

    fn small_config() -> AppConfig {
        AppConfig {
            feature_extractor: FeatureExtractorConfig {
                features_grid_width: 4,
                features_grid_height: 4,
                ..FeatureExtractorConfig::default()
            },
            runner: RunnerConfig {
                frames: 3,
                width: 40,
                height: 40,
                shift_x: 3.0,
                ..RunnerConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn synthetic_run_reports_every_frame() {
        let mut reports = Vec::new();
        run(&small_config(), |r| {
            reports.push((
                r.frame_number,
                r.features.pixels.clone(),
                r.features.x0_to_x1.clone(),
                r.features.count.clone(),
            ));
            Ok(())
        })
        .unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports[0].1.is_empty());
        for (i, (frame, pixels, x0_to_x1, count)) in reports.iter().enumerate().skip(1) {
            assert_eq!(*frame, i as u64);
            assert_eq!(pixels, &vec![100; 16]);
            assert_eq!(count, &vec![100; 16]);
            assert_eq!(x0_to_x1, &vec![300.0; 16]);
        }
    }

    #[test]
    fn device_id_is_resolved_once_for_both_elements() {
        let mut config = small_config();
        assert_eq!(shared_device_id(&config).unwrap(), -1);

        config.optical_flow.device_id = 0;
        assert_eq!(shared_device_id(&config).unwrap(), 0);
        run(&config, |_| Ok(())).unwrap();

        config.feature_extractor.device_id = 0;
        assert_eq!(shared_device_id(&config).unwrap(), 0);

        config.feature_extractor.device_id = 1;
        let err = run(&config, |_| Ok(())).unwrap_err();
        assert!(format!("{err:#}").contains("conflicts"));
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn cuda_backend_without_feature_fails_cleanly() {
        let mut config = small_config();
        config.runner.backend = gpu_context::BackendKind::Cuda;
        let err = run(&config, |_| Ok(())).unwrap_err();
        assert!(format!("{err:#}").contains("Cuda"));
    }
}
