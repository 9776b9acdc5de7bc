// Wires sources, normalizers, detectors and sinks together for each input and
// drives them until they finish or Ctrl-C arrives.

use crate::cli::Args;
use crate::config::Properties;
use crate::pipeline::detection::{DiffConfig, FrameDiffDetector};
use crate::pipeline::export::{CsvSink, LogSink, ResultSink};
use crate::pipeline::normalizer::{IdentityNormalizer, Normalizer};
use crate::pipeline::orchestrator::{run_pipelines, PipelineOutcome, PipelineSpec};
use crate::pipeline::shutdown::ShutdownSignal;
use crate::pipeline::size_normalizer::SizeMaskNormalizer;
use crate::run_context::{create_run, run_id_for, write_stats, RunMetadata};
use crate::video::image_sequence::ImageSequenceSource;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;

pub async fn run(args: Args) -> Result<()> {
    let props = load_properties(&args)?;
    let (specs, runs) = build_pipelines(&args, &props)?;
    tracing::info!("Starting {} pipeline(s)", specs.len());

    let shutdown = ShutdownSignal::new();
    let mut work = tokio::task::spawn_blocking({
        let shutdown = shutdown.clone();
        move || run_pipelines(specs, &shutdown)
    });

    let outcomes = tokio::select! {
        outcomes = &mut work => outcomes?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::warn!("Shutdown requested, finishing in-flight batches");
            shutdown.trigger();
            work.await?
        }
    };

    report(outcomes, &runs)
}

fn load_properties(args: &Args) -> Result<Properties> {
    let mut props = match &args.config {
        Some(path) => Properties::load(path)?,
        None => Properties::new(),
    };
    for pair in &args.overrides {
        props.apply_override(pair)?;
    }
    Ok(props)
}

fn build_normalizer(args: &Args, props: &Properties) -> Result<(Box<dyn Normalizer>, (u32, u32))> {
    if args.skip_normalize {
        let identity: Box<dyn Normalizer> = Box::new(IdentityNormalizer::new(&args.normalizer));
        return Ok((identity, (args.width, args.height)));
    }
    let normalizer =
        SizeMaskNormalizer::from_properties(props, &args.normalizer, args.width, args.height)
            .with_context(|| format!("Failed to configure normalizer {}", args.normalizer))?;
    let target = normalizer.target().unwrap_or((args.width, args.height));
    let boxed: Box<dyn Normalizer> = Box::new(normalizer);
    Ok((boxed, target))
}

fn build_pipelines(
    args: &Args,
    props: &Properties,
) -> Result<(Vec<PipelineSpec>, HashMap<String, RunMetadata>)> {
    let diff_config = DiffConfig::from_properties(props)?;
    let fps = props.get_f64("source.fps", 30.0)?;
    let overlap = props.get_int("source.overlap", 1)?.max(0) as usize;

    let mut specs = Vec::with_capacity(args.inputs.len());
    let mut runs = HashMap::new();

    for input in &args.inputs {
        let run_id = run_id_for(input)?;
        if runs.contains_key(run_id) {
            bail!("Two inputs map to the same run id: {}", run_id);
        }

        let (normalizer, target) = build_normalizer(args, props)?;
        let metadata = create_run(&args.output_root, input, normalizer.name(), target)?;

        let source = ImageSequenceSource::open(input, fps)
            .with_context(|| format!("Failed to open frames at: {:?}", input))?
            .with_overlap(overlap);
        tracing::info!(
            "{}: {} frames, normalizer {}, target {}x{}",
            metadata.run_id,
            source.total_frames(),
            metadata.normalizer,
            target.0,
            target.1
        );
        let sink: Box<dyn ResultSink> = if args.log_only {
            Box::new(LogSink)
        } else {
            Box::new(CsvSink::create(&metadata.results_path())?)
        };

        specs.push(PipelineSpec {
            name: metadata.run_id.clone(),
            source: Box::new(source),
            detector: Box::new(FrameDiffDetector::new(normalizer, diff_config.clone())),
            sink,
        });
        runs.insert(metadata.run_id.clone(), metadata);
    }

    Ok((specs, runs))
}

fn report(outcomes: Vec<PipelineOutcome>, runs: &HashMap<String, RunMetadata>) -> Result<()> {
    let total = outcomes.len();
    let mut failed = 0;

    for outcome in outcomes {
        match outcome.result {
            Ok(stats) => {
                tracing::info!(
                    "{}: {} batches, {} detections, {:.1} ms/batch",
                    outcome.name,
                    stats.batches,
                    stats.detections,
                    stats.ms_per_batch
                );
                if let Some(metadata) = runs.get(&outcome.name) {
                    if let Err(e) = write_stats(metadata, &stats) {
                        tracing::warn!("{}: failed to write stats: {:#}", outcome.name, e);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!("{}: {:#}", outcome.name, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} pipelines failed", failed, total);
    }
    Ok(())
}
