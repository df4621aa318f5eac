//! Planner-facing types: the block handed over by the planner, the
//! fixed-capacity block queue, and the planner settings the motion core
//! reads (steps-per-mm tables, toolhead motion limits, junction deviation).

use heapless::Deque;

use crate::errors::{ConfigError, PlannerError};
use crate::{NUM_AXES, Z_AXIS};

/// Capacity of the planner block queue.
pub const BLOCK_QUEUE_SIZE: usize = 16;

/// M203 clamps the Z axis feedrate to this ceiling.
const Z_MAX_FEEDRATE: f32 = 40.0;

/// A single straight-line multi-axis move with a pre-computed trapezoidal
/// velocity profile, as delivered by the planner. Immutable while the
/// motion core processes it.
#[derive(Debug, Copy, Clone, Default)]
pub struct Block {
    /// Unsigned step counts per axis.
    pub steps: [u32; NUM_AXES],
    /// Direction bits; a set bit means negative motion on that axis.
    pub direction_bits: u8,
    /// Total move length. [mm]
    pub millimeters: f32,
    /// Step count of the dominant axis.
    pub step_event_count: u32,
    /// Entry step rate. [steps/s]
    pub initial_rate: u32,
    /// Exit step rate. [steps/s]
    pub final_rate: u32,
    /// Nominal feedrate the planner hopes to reach. [mm/s]
    pub nominal_speed: f32,
    /// Acceleration magnitude for both ramps. [mm/s^2]
    pub acceleration: f32,
    /// Offset of the source line in the job file, for the job tracker.
    pub file_position: u32,
    /// Extruder selected for this block.
    pub extruder: u8,
    /// Planner step position at the end of the block, snapshotted by the
    /// position-sync commands.
    pub position: [i32; NUM_AXES],
    /// Sync-only block: snapshot the XYZ position counters, no motion.
    pub sync_position: bool,
    /// Sync-only block: snapshot the E position counter, no motion.
    pub sync_e: bool,
}

impl Block {
    /// Signed direction of the given axis: -1.0 when the direction bit is
    /// set, +1.0 otherwise.
    pub fn dir_sign(&self, axis: usize) -> f32 {
        if self.direction_bits & (1 << axis) != 0 {
            -1.0
        } else {
            1.0
        }
    }

    /// Whether this block only carries a position snapshot.
    pub fn is_sync(&self) -> bool {
        self.sync_position || self.sync_e
    }
}

/// FIFO of planner blocks awaiting the motion core. The head block stays
/// visible until the controller marks it consumed.
pub struct PlannerQueue {
    blocks: Deque<Block, BLOCK_QUEUE_SIZE>,
}

impl PlannerQueue {
    pub fn new() -> Self {
        Self {
            blocks: Deque::new(),
        }
    }

    /// Enqueue a block behind any already planned.
    pub fn push(&mut self, block: Block) -> Result<(), PlannerError> {
        self.blocks
            .push_back(block)
            .map_err(|_| PlannerError::QueueFull)
    }

    /// The oldest block not yet consumed, if any.
    pub fn head(&self) -> Option<&Block> {
        self.blocks.front()
    }

    /// Drop the head block after the controller has taken it over.
    pub fn mark_block_consumed(&mut self) {
        self.blocks.pop_front();
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Discard all queued blocks (quick-stop path).
    pub fn clear(&mut self) {
        while self.blocks.pop_front().is_some() {}
    }
}

impl Default for PlannerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-axis feedrate and acceleration ceilings.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionLimits {
    pub max_feedrate_mm_s: [f32; NUM_AXES],
    pub max_acceleration_mm_per_s2: [f32; NUM_AXES],
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            max_feedrate_mm_s: [300.0, 300.0, 40.0, 50.0],
            max_acceleration_mm_per_s2: [3000.0, 3000.0, 100.0, 10000.0],
        }
    }
}

/// Motion limits for the attached toolhead kind. G-code handlers write the
/// variant matching the installed head; the motion pipeline only ever reads
/// the shared effective projection held next to this in
/// [`PlannerSettings`].
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum ToolheadSettings {
    Fdm(MotionLimits),
    Laser(MotionLimits),
    Cnc(MotionLimits),
}

impl ToolheadSettings {
    fn limits_mut(&mut self) -> &mut MotionLimits {
        match self {
            ToolheadSettings::Fdm(l) | ToolheadSettings::Laser(l) | ToolheadSettings::Cnc(l) => l,
        }
    }

    pub fn limits(&self) -> &MotionLimits {
        match self {
            ToolheadSettings::Fdm(l) | ToolheadSettings::Laser(l) | ToolheadSettings::Cnc(l) => l,
        }
    }
}

/// Planner configuration consumed by the motion core and the interpolator.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct PlannerSettings {
    /// Steps per millimeter per axis.
    pub axis_steps_per_mm: [f32; NUM_AXES],
    /// Millimeters per step per axis (reciprocal table).
    pub steps_to_mm: [f32; NUM_AXES],
    /// Junction deviation. [mm]
    pub junction_deviation_mm: f32,
    /// Limits of the installed toolhead.
    pub toolhead: ToolheadSettings,
    /// Shared effective limits; kept in lockstep with the active toolhead
    /// variant. The only limits the motion pipeline reads.
    pub effective: MotionLimits,
}

impl PlannerSettings {
    pub fn new(axis_steps_per_mm: [f32; NUM_AXES], toolhead: ToolheadSettings) -> Self {
        let mut steps_to_mm = [0.0; NUM_AXES];
        for a in 0..NUM_AXES {
            steps_to_mm[a] = 1.0 / axis_steps_per_mm[a];
        }
        let effective = *toolhead.limits();
        Self {
            axis_steps_per_mm,
            steps_to_mm,
            junction_deviation_mm: 0.02,
            toolhead,
            effective,
        }
    }

    /// M203: set a per-axis feedrate ceiling on the installed toolhead and
    /// the effective projection. Z is clamped to 40 mm/s.
    pub fn set_max_feedrate(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        if axis >= NUM_AXES {
            return Err(ConfigError::InvalidAxis);
        }
        let value = if axis == Z_AXIS {
            value.min(Z_MAX_FEEDRATE)
        } else {
            value
        };
        self.toolhead.limits_mut().max_feedrate_mm_s[axis] = value;
        self.effective.max_feedrate_mm_s[axis] = value;
        Ok(())
    }

    /// M201: set a per-axis acceleration ceiling on the installed toolhead
    /// and the effective projection.
    pub fn set_max_acceleration(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        if axis >= NUM_AXES {
            return Err(ConfigError::InvalidAxis);
        }
        self.toolhead.limits_mut().max_acceleration_mm_per_s2[axis] = value;
        self.effective.max_acceleration_mm_per_s2[axis] = value;
        Ok(())
    }

    /// M205 J: junction deviation, accepted in 0.01..=0.3 mm. Out-of-range
    /// values are rejected and the stored value is retained.
    pub fn set_junction_deviation(&mut self, value: f32) -> Result<(), ConfigError> {
        if !(0.01..=0.3).contains(&value) {
            return Err(ConfigError::JunctionDeviationOutOfRange);
        }
        self.junction_deviation_mm = value;
        Ok(())
    }
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self::new(
            [80.0, 80.0, 400.0, 500.0],
            ToolheadSettings::Fdm(MotionLimits::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{E_AXIS, X_AXIS};

    #[test]
    fn queue_is_fifo_and_reports_full() {
        let mut queue = PlannerQueue::new();
        for i in 0..BLOCK_QUEUE_SIZE {
            let mut block = Block::default();
            block.file_position = i as u32;
            assert!(queue.push(block).is_ok());
        }
        assert_eq!(
            queue.push(Block::default()),
            Err(PlannerError::QueueFull)
        );
        assert_eq!(queue.head().unwrap().file_position, 0);
        queue.mark_block_consumed();
        assert_eq!(queue.head().unwrap().file_position, 1);
    }

    #[test]
    fn junction_deviation_guard() {
        let mut settings = PlannerSettings::default();
        let err = settings.set_junction_deviation(0.5).unwrap_err();
        assert_eq!(err, ConfigError::JunctionDeviationOutOfRange);
        assert_eq!(settings.junction_deviation_mm, 0.02);
        // Exact diagnostic text surfaced to the G-code layer.
        assert_eq!(format!("{err}"), "?J out of range (0.01 to 0.3)");
        settings.set_junction_deviation(0.08).unwrap();
        assert_eq!(settings.junction_deviation_mm, 0.08);
    }

    #[test]
    fn toolhead_writes_track_effective_projection() {
        let mut settings = PlannerSettings::default();
        settings.set_max_feedrate(X_AXIS, 250.0).unwrap();
        assert_eq!(settings.effective.max_feedrate_mm_s[X_AXIS], 250.0);
        assert_eq!(
            settings.toolhead.limits().max_feedrate_mm_s[X_AXIS],
            250.0
        );
        // Z feedrate is clamped to 40 mm/s regardless of the request.
        settings.set_max_feedrate(Z_AXIS, 120.0).unwrap();
        assert_eq!(settings.effective.max_feedrate_mm_s[Z_AXIS], 40.0);
    }

    #[test]
    fn direction_sign_follows_bits() {
        let mut block = Block::default();
        block.direction_bits = 1 << E_AXIS;
        assert_eq!(block.dir_sign(X_AXIS), 1.0);
        assert_eq!(block.dir_sign(E_AXIS), -1.0);
    }
}
