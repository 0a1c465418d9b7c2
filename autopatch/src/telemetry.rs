//! Frame and resistance sources for the control thread.
//!
//! Each source is either direct (the control thread queries the device
//! itself) or published (a background thread keeps a [`LatestSlot`] filled
//! and the control thread reads whatever is newest). Published sources never
//! queue: a reader that falls behind skips values.

use crate::error::{PatchError, PatchResult};
use hardware::{Amplifier, DeviceError};
use log::{debug, warn};
use ndarray::Array2;
use shared::camera_interface::CameraInterface;
use shared::clock::Clock;
use shared::latest::LatestSlot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Meter reads averaged into one resistance value
pub const METER_AVERAGE: usize = 3;

/// How long a published source waits for its first value
pub const FIRST_VALUE_TIMEOUT: Duration = Duration::from_secs(2);

const FIRST_VALUE_POLL: Duration = Duration::from_millis(5);

/// Supplier of display-oriented frames
pub trait FrameSource: Send {
    fn latest_frame(&mut self) -> PatchResult<Array2<u16>>;
}

/// Supplier of pipette resistance in ohms
pub trait ResistanceSource: Send {
    fn resistance(&mut self) -> PatchResult<f64>;
}

/// Captures a new frame on every request
pub struct DirectFrames<C: CameraInterface> {
    camera: C,
}

impl<C: CameraInterface> DirectFrames<C> {
    pub fn new(camera: C) -> Self {
        Self { camera }
    }
}

impl<C: CameraInterface> FrameSource for DirectFrames<C> {
    fn latest_frame(&mut self) -> PatchResult<Array2<u16>> {
        Ok(self.camera.capture_oriented()?)
    }
}

/// Block (in wall time) until `slot` holds a value or the timeout expires
fn wait_first<T: Clone>(slot: &LatestSlot<T>, timeout: Duration) -> Option<T> {
    let start = Instant::now();
    loop {
        if let Some(value) = slot.latest() {
            return Some(value);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        thread::sleep(FIRST_VALUE_POLL);
    }
}

/// Reads the frame most recently published by a [`FramePump`]
pub struct PublishedFrames {
    slot: LatestSlot<Arc<Array2<u16>>>,
}

impl PublishedFrames {
    pub fn new(slot: LatestSlot<Arc<Array2<u16>>>) -> Self {
        Self { slot }
    }
}

impl FrameSource for PublishedFrames {
    fn latest_frame(&mut self) -> PatchResult<Array2<u16>> {
        wait_first(&self.slot, FIRST_VALUE_TIMEOUT)
            .map(|frame| frame.as_ref().clone())
            .ok_or_else(|| PatchError::Camera("no frame published".to_string()))
    }
}

/// Stop flag and join handle of a background publisher
struct Worker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<F>(name: &str, mut tick: F, period: Duration) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            while flag.load(Ordering::SeqCst) {
                tick();
                thread::sleep(period);
            }
        })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("telemetry thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background thread publishing the newest camera frame
pub struct FramePump {
    slot: LatestSlot<Arc<Array2<u16>>>,
    worker: Worker,
}

impl FramePump {
    /// Start capturing from `camera` every `period`
    pub fn spawn<C>(mut camera: C, period: Duration) -> std::io::Result<Self>
    where
        C: CameraInterface + 'static,
    {
        let slot = LatestSlot::new();
        let publish = slot.clone();
        let worker = Worker::spawn(
            "frame-pump",
            move || match camera.capture_oriented() {
                Ok(frame) => {
                    publish.publish(Arc::new(frame));
                }
                Err(e) => warn!("frame capture failed: {e}"),
            },
            period,
        )?;
        Ok(Self { slot, worker })
    }

    /// A reader of this pump's frames
    pub fn source(&self) -> PublishedFrames {
        PublishedFrames::new(self.slot.clone())
    }

    /// Frames published so far
    pub fn frames_published(&self) -> u64 {
        self.slot.version()
    }

    pub fn stop(mut self) {
        self.worker.stop();
    }
}

/// Average of `reads` consecutive meter readings
fn averaged_reading(amplifier: &dyn Amplifier, reads: usize) -> PatchResult<f64> {
    let reads = reads.max(1);
    let mut total = 0.0;
    for _ in 0..reads {
        total += amplifier.read_meter()?;
    }
    Ok(total / reads as f64)
}

/// Reads the amplifier meter on demand
pub struct DirectMeter {
    amplifier: Arc<dyn Amplifier>,
    reads: usize,
}

impl DirectMeter {
    pub fn new(amplifier: Arc<dyn Amplifier>) -> Self {
        Self {
            amplifier,
            reads: METER_AVERAGE,
        }
    }
}

impl ResistanceSource for DirectMeter {
    fn resistance(&mut self) -> PatchResult<f64> {
        averaged_reading(self.amplifier.as_ref(), self.reads)
    }
}

/// Reads the value most recently published by a [`ResistanceSampler`]
pub struct PublishedResistance {
    slot: LatestSlot<f64>,
}

impl ResistanceSource for PublishedResistance {
    fn resistance(&mut self) -> PatchResult<f64> {
        wait_first(&self.slot, FIRST_VALUE_TIMEOUT).ok_or_else(|| {
            PatchError::Device(DeviceError::Communication {
                device: "resistance sampler".to_string(),
                message: "no reading published".to_string(),
            })
        })
    }
}

/// Background thread publishing averaged meter readings while enabled
pub struct ResistanceSampler {
    slot: LatestSlot<f64>,
    enabled: Arc<AtomicBool>,
    worker: Worker,
}

impl ResistanceSampler {
    pub fn spawn(amplifier: Arc<dyn Amplifier>, period: Duration) -> std::io::Result<Self> {
        let slot = LatestSlot::new();
        let enabled = Arc::new(AtomicBool::new(true));
        let publish = slot.clone();
        let gate = enabled.clone();
        let worker = Worker::spawn(
            "resistance-sampler",
            move || {
                if !gate.load(Ordering::SeqCst) {
                    return;
                }
                match averaged_reading(amplifier.as_ref(), METER_AVERAGE) {
                    Ok(ohms) => {
                        publish.publish(ohms);
                    }
                    Err(e) => warn!("meter read failed: {e}"),
                }
            },
            period,
        )?;
        Ok(Self {
            slot,
            enabled,
            worker,
        })
    }

    /// Pause or resume sampling; a paused sampler keeps its last value
    pub fn set_enabled(&self, enabled: bool) {
        debug!("resistance sampling {}", if enabled { "on" } else { "off" });
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn source(&self) -> PublishedResistance {
        PublishedResistance {
            slot: self.slot.clone(),
        }
    }

    pub fn stop(mut self) {
        self.worker.stop();
    }
}

/// Sleep on `clock` in slices of at most `slice`, returning early once
/// `running` is cleared. Returns whether the full duration elapsed.
pub fn interruptible_sleep(
    clock: &dyn Clock,
    running: &AtomicBool,
    duration: Duration,
    slice: Duration,
) -> bool {
    let end = clock.now() + duration;
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = clock.now();
        if now >= end {
            return true;
        }
        clock.sleep((end - now).min(slice));
    }
}
