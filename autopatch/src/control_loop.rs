//! The control thread: one pending command at a time, plus follow mode.
//!
//! Commands arrive through a [`ControlHandle`] and land in a single
//! overwritable slot, so a click that was superseded before the loop got to
//! it is never executed. Every device move happens on the loop's thread.

use crate::error::PatchError;
use crate::robot::PatchRobot;
use crate::sequencer::PatchOutcome;
use crate::state::PendingEvent;
use hardware::format_resistance;
use log::{debug, info, warn};
use shared::image_proc::PixelPos;
use shared::latest::LatestSlot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(10);

/// Submits commands to, and stops, a [`ControlLoop`] from any thread
#[derive(Clone)]
pub struct ControlHandle {
    pending: LatestSlot<PendingEvent>,
    running: Arc<AtomicBool>,
}

impl ControlHandle {
    /// Replace any command not yet picked up
    pub fn submit(&self, event: PendingEvent) {
        debug!("submitted {event:?}");
        self.pending.publish(event);
    }

    /// Stop the loop; a procedure in progress ends at its next step
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct ControlLoop {
    robot: PatchRobot,
    pending: LatestSlot<PendingEvent>,
    follow: Option<PixelPos>,
    idle_poll: Duration,
}

impl ControlLoop {
    pub fn new(robot: PatchRobot) -> Self {
        Self {
            robot,
            pending: LatestSlot::new(),
            follow: None,
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }

    /// Wall-time pause between polls when there is nothing to do
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            pending: self.pending.clone(),
            running: self.robot.rig().running_flag(),
        }
    }

    pub fn robot(&self) -> &PatchRobot {
        &self.robot
    }

    pub fn robot_mut(&mut self) -> &mut PatchRobot {
        &mut self.robot
    }

    /// Pixel being followed, if follow mode is on
    pub fn follow_target(&self) -> Option<PixelPos> {
        self.follow
    }

    fn report_failure(&self, what: &str, err: &PatchError) {
        if matches!(err, PatchError::Cancelled) {
            info!("{what} cancelled");
            return;
        }
        warn!("{what} failed: {err}");
        self.robot.rig().report(format!("{what} failed: {err}"));
    }

    fn handle_event(&mut self, event: PendingEvent) {
        if event.cancels_follow() && self.follow.take().is_some() {
            self.robot.rig().report("Follow stopped");
        }

        let (what, result) = match event {
            PendingEvent::Positioning(pixel) => ("positioning", self.robot.position_at(pixel)),
            PendingEvent::PatchClamp(pixel) => {
                let result = self.robot.patch_at(pixel).map(|outcome| {
                    let message = match outcome {
                        PatchOutcome::Sealed { resistance } => {
                            format!("Sealed at {}", format_resistance(resistance))
                        }
                        PatchOutcome::Clamped { resistance } => {
                            format!("Whole-cell at {}", format_resistance(resistance))
                        }
                    };
                    self.robot.rig().report(message);
                });
                ("patch", result)
            }
            PendingEvent::Calibration => ("calibration", self.robot.calibrate()),
            PendingEvent::TakeTemplate => ("template capture", self.robot.take_templates()),
            PendingEvent::Follow(pixel) => {
                self.follow = Some(pixel);
                self.robot
                    .rig()
                    .report(format!("Following ({:.0}, {:.0})", pixel.x, pixel.y));
                ("follow", Ok(()))
            }
            PendingEvent::StopFollow => ("stop follow", Ok(())),
        };

        if let Err(e) = result {
            self.report_failure(what, &e);
        }
    }

    /// Handle the pending command, or take one follow step. Returns whether
    /// anything was done.
    pub fn step(&mut self) -> bool {
        if let Some(event) = self.pending.take() {
            self.handle_event(event);
            return true;
        }

        let Some(target) = self.follow else {
            return false;
        };
        if let Err(e) = self.robot.follow_step(target) {
            self.follow = None;
            self.report_failure("follow", &e);
        }
        true
    }

    /// Run until stopped through a handle, then leave the rig safe
    pub fn run(mut self) -> PatchRobot {
        let running = self.robot.rig().running_flag();
        info!("control loop started");
        while running.load(Ordering::SeqCst) {
            if !self.step() {
                thread::sleep(self.idle_poll);
            }
        }
        self.robot.shutdown();
        info!("control loop stopped");
        self.robot
    }

    /// Run on a dedicated thread; joining yields the robot back
    pub fn spawn(self) -> std::io::Result<JoinHandle<PatchRobot>> {
        thread::Builder::new()
            .name("control".to_string())
            .spawn(move || self.run())
    }
}
