// Pipeline runner: source -> detector -> sink, one batch at a time.
//
// The shutdown signal is checked only at the top of the loop, so a batch that
// has been fetched is always carried through detection and export.

use crate::pipeline::detection::Detector;
use crate::pipeline::export::ResultSink;
use crate::pipeline::shutdown::ShutdownSignal;
use crate::pipeline::types::{ResultRecord, RunStats, RunnerState, StopReason};
use crate::video::FrameSource;
use anyhow::{bail, Result};
use std::time::Instant;

pub struct PipelineRunner {
    name: String,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    sink: Box<dyn ResultSink>,
    shutdown: ShutdownSignal,
    state: RunnerState,
}

impl PipelineRunner {
    pub fn new(
        name: &str,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        sink: Box<dyn ResultSink>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            name: name.to_string(),
            source,
            detector,
            sink,
            shutdown,
            state: RunnerState::Stopped,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Runs until end of stream or shutdown. A detector error aborts this
    /// runner and is returned.
    pub fn run(&mut self) -> Result<RunStats> {
        let required = self.detector.required_frame_count();
        if required == 0 {
            bail!("Pipeline {}: detector requires 0 frames per batch", self.name);
        }

        self.state = RunnerState::Running;
        let mut stats = RunStats::default();
        tracing::info!(
            "Pipeline {}: started, {} frames per batch",
            self.name,
            required
        );

        let reason = loop {
            if self.shutdown.is_shutdown() {
                break StopReason::Shutdown;
            }

            let mut batch = match self.source.next_batch(required) {
                Ok(Some(batch)) if batch.len() >= required => batch,
                Ok(_) => break StopReason::EndOfStream,
                Err(e) => {
                    tracing::warn!("Pipeline {}: source failed, stopping: {:#}", self.name, e);
                    break StopReason::SourceError;
                }
            };

            let start_inst = Instant::now();
            let mut result = ResultRecord::for_batch(&batch[0]);
            let detected = match self.detector.run(&mut batch, &mut result) {
                Ok(detected) => detected,
                Err(e) => {
                    self.state = RunnerState::Stopped;
                    return Err(e.context(format!(
                        "Pipeline {}: detector failed on batch starting at frame {}",
                        self.name, result.frame_index
                    )));
                }
            };

            if detected {
                stats.detections += 1;
                tracing::info!(
                    "Pipeline {}: detection at frame {}: {}",
                    self.name,
                    result.frame_index,
                    result.message
                );
                if let Err(e) = self.sink.run(&result) {
                    stats.sink_failures += 1;
                    tracing::error!("Pipeline {}: sink failed: {:#}", self.name, e);
                }
            }

            let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
            stats.record_batch(duration_ms);
        };

        self.state = RunnerState::Stopped;
        stats.stop_reason = Some(reason);
        tracing::info!(
            "Pipeline {}: stopped ({:?}) after {} batches, {} detections",
            self.name,
            reason,
            stats.batches,
            stats.detections
        );
        Ok(stats)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::pipeline::types::FrameRecord;
    use image::{DynamicImage, GrayImage};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    pub fn frame(index: u64) -> FrameRecord {
        FrameRecord::new(
            index,
            index as f64 * 10.0,
            DynamicImage::ImageLuma8(GrayImage::new(2, 2)),
        )
    }

    /// Yields scripted batches, then either ends or fails.
    pub struct ScriptedSource {
        pub batches: VecDeque<Vec<FrameRecord>>,
        pub fail_at_end: bool,
        pub fetches: Arc<Mutex<usize>>,
    }

    impl ScriptedSource {
        pub fn new(batches: usize, batch_size: usize) -> Self {
            let batches = (0..batches)
                .map(|b| {
                    (0..batch_size)
                        .map(|i| frame((b * batch_size + i) as u64))
                        .collect()
                })
                .collect();
            Self {
                batches,
                fail_at_end: false,
                fetches: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_batch(&mut self, _count: usize) -> Result<Option<Vec<FrameRecord>>> {
            *self.fetches.lock().unwrap() += 1;
            match self.batches.pop_front() {
                Some(batch) => Ok(Some(batch)),
                None if self.fail_at_end => bail!("stream broke"),
                None => Ok(None),
            }
        }
    }

    /// Answers from a script and records the first frame of every batch.
    pub struct ScriptedDetector {
        pub frames: usize,
        pub answers: VecDeque<bool>,
        pub calls: Arc<Mutex<Vec<u64>>>,
        /// Triggered while processing this call (0-based), if set
        pub shutdown_during: Option<(usize, ShutdownSignal)>,
        pub fail_on: Option<usize>,
    }

    impl ScriptedDetector {
        pub fn new(frames: usize, answers: &[bool]) -> Self {
            Self {
                frames,
                answers: answers.iter().copied().collect(),
                calls: Arc::new(Mutex::new(Vec::new())),
                shutdown_during: None,
                fail_on: None,
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn required_frame_count(&self) -> usize {
            self.frames
        }

        fn run(&mut self, batch: &mut [FrameRecord], result: &mut ResultRecord) -> Result<bool> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(batch[0].frame_index);
                calls.len() - 1
            };
            if self.fail_on == Some(call) {
                bail!("degenerate frame");
            }
            if let Some((at, signal)) = &self.shutdown_during {
                if *at == call {
                    signal.trigger();
                }
            }
            let detected = self.answers.pop_front().unwrap_or(false);
            if detected {
                result.mark = 1;
                result.message = format!("call {}", call);
            }
            Ok(detected)
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub seen: Arc<Mutex<Vec<ResultRecord>>>,
    }

    impl ResultSink for RecordingSink {
        fn run(&mut self, result: &ResultRecord) -> Result<()> {
            self.seen.lock().unwrap().push(result.clone());
            Ok(())
        }
    }
}
