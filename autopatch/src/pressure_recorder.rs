//! Background recording of the pipette pressure.

use chrono::{DateTime, Local};
use hardware::PressureController;
use log::{info, warn};
use shared::clock::Clock;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 20 Hz
pub const RECORD_PERIOD: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSample {
    /// Clock time of the reading
    pub time: Duration,
    pub mbar: f64,
}

/// Samples a pressure controller on its own thread until stopped or
/// `max_samples` readings have been taken
pub struct PressureRecorder {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<PressureSample>>>,
}

impl PressureRecorder {
    pub fn start(
        pressure: Arc<dyn PressureController>,
        clock: Arc<dyn Clock>,
        max_samples: usize,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("pressure-recorder".to_string())
            .spawn(move || {
                let mut samples = Vec::with_capacity(max_samples.min(1 << 16));
                while flag.load(Ordering::SeqCst) && samples.len() < max_samples {
                    let time = clock.now();
                    match pressure.measure() {
                        Ok(mbar) => samples.push(PressureSample { time, mbar }),
                        Err(e) => warn!("pressure read failed: {e}"),
                    }
                    clock.sleep(RECORD_PERIOD);
                }
                samples
            })?;
        info!("pressure recording started");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop sampling and return everything recorded
    pub fn stop(self) -> Vec<PressureSample> {
        self.running.store(false, Ordering::SeqCst);
        self.join()
    }

    /// Wait for the sample limit to be reached
    pub fn join(mut self) -> Vec<PressureSample> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Vec<PressureSample> {
        let samples = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(samples)) => samples,
            Some(Err(_)) => {
                warn!("pressure recorder thread panicked");
                Vec::new()
            }
            None => Vec::new(),
        };
        info!("pressure recording stopped after {} samples", samples.len());
        samples
    }
}

impl Drop for PressureRecorder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Write `time_s,mbar` lines
pub fn save_samples(path: &Path, samples: &[PressureSample]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for sample in samples {
        writeln!(out, "{:.3},{}", sample.time.as_secs_f64(), sample.mbar)?;
    }
    out.flush()
}

/// File name for a recording started at `started`
pub fn default_file_name(started: DateTime<Local>) -> String {
    format!("pressure_{}.csv", started.format("%Y%m%d_%H%M%S"))
}
