//! Shared components and utilities for the patch-clamp rig crates.
//!
//! This crate holds the pieces that are used by both the device layer and the
//! calibration/patching core: camera abstractions, image matching, the clock
//! used for every bounded wait, single-slot publication between threads, and
//! on-disk configuration locations.

pub mod camera_interface;
pub mod clock;
pub mod config_storage;
pub mod image_proc;
pub mod latest;
