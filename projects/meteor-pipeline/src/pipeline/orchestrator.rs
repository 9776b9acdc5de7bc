// Pipeline orchestrator: runs several independent pipelines side by side
//
// Each pipeline gets its own worker thread and its own source, detector and
// sink. The shutdown signal is the only thing they share.

use crate::pipeline::detection::Detector;
use crate::pipeline::export::ResultSink;
use crate::pipeline::runner::PipelineRunner;
use crate::pipeline::shutdown::ShutdownSignal;
use crate::pipeline::types::RunStats;
use crate::video::FrameSource;
use anyhow::{anyhow, Result};
use crossbeam::channel::{self, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Everything one pipeline instance owns.
pub struct PipelineSpec {
    pub name: String,
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
    pub sink: Box<dyn ResultSink>,
}

pub struct PipelineOutcome {
    pub name: String,
    pub result: Result<RunStats>,
}

/// Runs every pipeline to completion and returns their outcomes in the order
/// they finished. Blocks until all workers are done.
pub fn run_pipelines(specs: Vec<PipelineSpec>, shutdown: &ShutdownSignal) -> Vec<PipelineOutcome> {
    let (tx, rx) = channel::unbounded::<PipelineOutcome>();
    let mut outcomes = Vec::new();

    for spec in specs {
        let name = spec.name.clone();
        let runner = PipelineRunner::new(
            &spec.name,
            spec.source,
            spec.detector,
            spec.sink,
            shutdown.clone(),
        );
        if let Err(e) = spawn_pipeline_worker(runner, tx.clone()) {
            tracing::error!("Failed to spawn pipeline worker {}: {}", name, e);
            outcomes.push(PipelineOutcome {
                name,
                result: Err(e.into()),
            });
        }
    }

    // Only the workers hold senders now; the loop ends when the last one exits
    drop(tx);
    outcomes.extend(rx.iter());
    outcomes
}

fn spawn_pipeline_worker(
    mut runner: PipelineRunner,
    tx: Sender<PipelineOutcome>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pipeline-{}", runner.name()))
        .spawn(move || {
            let name = runner.name().to_string();
            tracing::info!("Spawning pipeline worker {}", name);
            // A panicking runner still reports an outcome
            let result = panic::catch_unwind(AssertUnwindSafe(|| runner.run()))
                .unwrap_or_else(|payload| {
                    Err(anyhow!("worker panicked: {}", panic_message(&*payload)))
                });

            match &result {
                Ok(_) => tracing::info!("Pipeline worker {} finished gracefully", name),
                Err(e) => tracing::error!("Pipeline worker {} failed: {:#}", name, e),
            }
            let _ = tx.send(PipelineOutcome { name, result });
        })?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runner::test_support::*;
    use crate::pipeline::types::StopReason;
    use anyhow::bail;
    use std::collections::BTreeMap;

    fn spec(name: &str, source: ScriptedSource, detector: ScriptedDetector) -> PipelineSpec {
        PipelineSpec {
            name: name.to_string(),
            source: Box::new(source),
            detector: Box::new(detector),
            sink: Box::new(RecordingSink::default()),
        }
    }

    #[test]
    fn test_pipelines_run_independently() {
        let mut failing = ScriptedDetector::new(1, &[true]);
        failing.fail_on = Some(0);

        let specs = vec![
            spec("a", ScriptedSource::new(3, 2), ScriptedDetector::new(2, &[true, true])),
            spec("b", ScriptedSource::new(5, 1), ScriptedDetector::new(1, &[false])),
            spec("c", ScriptedSource::new(2, 1), failing),
        ];

        let outcomes: BTreeMap<String, Result<RunStats>> = run_pipelines(specs, &ShutdownSignal::new())
            .into_iter()
            .map(|o| (o.name, o.result))
            .collect();

        assert_eq!(outcomes.len(), 3);
        let a = outcomes["a"].as_ref().unwrap();
        assert_eq!((a.batches, a.detections), (3, 2));
        let b = outcomes["b"].as_ref().unwrap();
        assert_eq!((b.batches, b.detections), (5, 0));
        assert_eq!(b.stop_reason, Some(StopReason::EndOfStream));
        assert!(outcomes["c"].is_err());
    }

    #[test]
    fn test_panicking_worker_is_reported_as_failed() {
        struct PanickingDetector;
        impl Detector for PanickingDetector {
            fn required_frame_count(&self) -> usize {
                1
            }

            fn run(
                &mut self,
                _batch: &mut [crate::pipeline::types::FrameRecord],
                _result: &mut crate::pipeline::types::ResultRecord,
            ) -> Result<bool> {
                panic!("detector bug")
            }
        }

        let specs = vec![
            spec("ok", ScriptedSource::new(2, 1), ScriptedDetector::new(1, &[true, false])),
            PipelineSpec {
                name: "broken".to_string(),
                source: Box::new(ScriptedSource::new(2, 1)),
                detector: Box::new(PanickingDetector),
                sink: Box::new(RecordingSink::default()),
            },
        ];

        let outcomes: BTreeMap<String, Result<RunStats>> = run_pipelines(specs, &ShutdownSignal::new())
            .into_iter()
            .map(|o| (o.name, o.result))
            .collect();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes["ok"].as_ref().unwrap().batches, 2);
        let err = outcomes["broken"].as_ref().unwrap_err();
        assert!(format!("{:#}", err).contains("detector bug"));
    }

    #[test]
    fn test_shared_shutdown_stops_every_pipeline() {
        struct EndlessSource;
        impl FrameSource for EndlessSource {
            fn next_batch(
                &mut self,
                count: usize,
            ) -> Result<Option<Vec<crate::pipeline::types::FrameRecord>>> {
                if count == 0 {
                    bail!("empty batch requested");
                }
                Ok(Some((0..count as u64).map(frame).collect()))
            }
        }

        let shutdown = ShutdownSignal::new();
        let mut trigger = ScriptedDetector::new(1, &[]);
        trigger.shutdown_during = Some((3, shutdown.clone()));

        let specs = vec![
            PipelineSpec {
                name: "trigger".to_string(),
                source: Box::new(EndlessSource),
                detector: Box::new(trigger),
                sink: Box::new(RecordingSink::default()),
            },
            PipelineSpec {
                name: "endless".to_string(),
                source: Box::new(EndlessSource),
                detector: Box::new(ScriptedDetector::new(1, &[])),
                sink: Box::new(RecordingSink::default()),
            },
        ];

        let outcomes = run_pipelines(specs, &shutdown);
        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            let stats = outcome.result.unwrap();
            assert_eq!(stats.stop_reason, Some(StopReason::Shutdown));
            if outcome.name == "trigger" {
                assert_eq!(stats.batches, 4);
            }
        }
    }
}
