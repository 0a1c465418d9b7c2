//! Three-axis motorized units.
//!
//! Positions are in µm relative to the unit's zero, which callers can move
//! with [`XyzUnit::set_zero`]. Moves return once commanded; completion is
//! observed with [`XyzUnit::wait_until_settled`], which every implementation
//! must bound by a timeout.

use crate::axis::Axis;
use crate::error::{DeviceError, DeviceResult};

pub trait XyzUnit: Send + Sync {
    /// Identifier used in logs and errors
    fn name(&self) -> &str;

    /// Current position along `axis` in µm
    fn position(&self, axis: Axis) -> DeviceResult<f64>;

    /// Command a move to `x` µm along `axis`
    fn absolute_move(&self, x: f64, axis: Axis) -> DeviceResult<()>;

    /// Command a move of `dx` µm along `axis`
    fn relative_move(&self, dx: f64, axis: Axis) -> DeviceResult<()>;

    /// Block until `axis` has stopped, or fail with [`DeviceError::Timeout`]
    fn wait_until_settled(&self, axis: Axis) -> DeviceResult<()>;

    /// Make the current position the zero of `axis`
    fn set_zero(&self, axis: Axis) -> DeviceResult<()>;

    /// Command a move back to the zero of `axis`
    fn go_to_zero(&self, axis: Axis) -> DeviceResult<()> {
        self.absolute_move(0.0, axis)
    }

    fn position_group(&self, axes: &[Axis]) -> DeviceResult<Vec<f64>> {
        axes.iter().map(|&axis| self.position(axis)).collect()
    }

    fn absolute_move_group(&self, targets: &[f64], axes: &[Axis]) -> DeviceResult<()> {
        check_group(targets, axes)?;
        for (&x, &axis) in targets.iter().zip(axes) {
            self.absolute_move(x, axis)?;
        }
        Ok(())
    }

    fn relative_move_group(&self, deltas: &[f64], axes: &[Axis]) -> DeviceResult<()> {
        check_group(deltas, axes)?;
        for (&dx, &axis) in deltas.iter().zip(axes) {
            self.relative_move(dx, axis)?;
        }
        Ok(())
    }

    fn wait_until_settled_group(&self, axes: &[Axis]) -> DeviceResult<()> {
        for &axis in axes {
            self.wait_until_settled(axis)?;
        }
        Ok(())
    }

    fn set_zero_group(&self, axes: &[Axis]) -> DeviceResult<()> {
        for &axis in axes {
            self.set_zero(axis)?;
        }
        Ok(())
    }

    fn go_to_zero_group(&self, axes: &[Axis]) -> DeviceResult<()> {
        for &axis in axes {
            self.go_to_zero(axis)?;
        }
        Ok(())
    }
}

fn check_group(values: &[f64], axes: &[Axis]) -> DeviceResult<()> {
    if values.len() != axes.len() {
        return Err(DeviceError::GroupMismatch {
            axes: axes.len(),
            values: values.len(),
        });
    }
    Ok(())
}
