//! Trapezoid-to-fixed-time conversion and the sliding trajectory window.
//!
//! [`BlockParams::load`] turns one planner block into FTM-local parameters:
//! start position, signed per-axis ratios, sample counts for the accel,
//! coast and decel phases, phase-end positions and the peak feedrate.
//! [`BlockParams::sample`] then evaluates the profile at one fixed-time
//! index. [`TrajectoryWindow`] buffers generated samples and hands complete
//! batches to the interpolator while retaining the shaper pre-roll.

use crate::block::{Block, PlannerSettings};
use crate::errors::BlockError;
use crate::math::{ceilf, sq, sqrtf};
use crate::{FTM_BATCH_SIZE, FTM_FS, FTM_TS, FTM_WINDOW_SIZE, NUM_AXES};

/// FTM-local parameters of the block currently being vectorized.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct BlockParams {
    /// Start position of the block. [mm]
    pub start_posn: [f32; NUM_AXES],
    /// Signed move distance per axis. [mm]
    pub move_dist: [f32; NUM_AXES],
    /// Signed per-axis unit direction of the move.
    pub ratio: [f32; NUM_AXES],
    /// Starting feedrate. [mm/s]
    pub f_s: f32,
    /// Feedrate at the end of the accel phase. [mm/s]
    pub f_p: f32,
    /// Acceleration of the accel phase. [mm/s^2]
    pub accel_p: f32,
    /// Acceleration of the decel phase. [mm/s^2]
    pub decel_p: f32,
    /// Distance traveled by the end of the accel phase. [mm]
    pub s_1e: f32,
    /// Distance traveled by the end of the coast phase. [mm]
    pub s_2e: f32,
    /// Data points in the acceleration phase.
    pub n1: u32,
    /// Data points in the coasting phase.
    pub n2: u32,
    /// Data points in the deceleration phase.
    pub n3: u32,
    /// Total data points generated from the block.
    pub max_intervals: u32,
}

impl BlockParams {
    /// Convert planner block data to fixed-time control variables.
    ///
    /// `start_posn` carries over the cumulative end position of the
    /// previous block; the caller advances it by `move_dist` afterwards.
    pub fn load(
        block: &Block,
        settings: &PlannerSettings,
        start_posn: [f32; NUM_AXES],
    ) -> Result<Self, BlockError> {
        let total_length = block.millimeters;
        if !(total_length > 0.0) {
            return Err(BlockError::ZeroLength);
        }
        if block.step_event_count == 0 {
            return Err(BlockError::ZeroStepEvents);
        }
        let accel = block.acceleration;
        if !(accel > 0.0) {
            return Err(BlockError::ZeroAcceleration);
        }

        let one_over_length = 1.0 / total_length;
        let mut move_dist = [0.0; NUM_AXES];
        let mut ratio = [0.0; NUM_AXES];
        for a in 0..NUM_AXES {
            move_dist[a] = block.steps[a] as f32 * settings.steps_to_mm[a] * block.dir_sign(a);
            ratio[a] = move_dist[a] * one_over_length;
        }

        // (mm) Distance per step event of the dominant axis.
        let spm = total_length / block.step_event_count as f32;
        let f_s = spm * block.initial_rate as f32;
        let f_e = spm * block.final_rate as f32;

        let one_over_accel = 1.0 / accel;
        let mut f_n = block.nominal_speed;
        let ldiff = total_length + 0.5 * one_over_accel * (sq(f_s) + sq(f_e));

        let mut t2 = ldiff / f_n - one_over_accel * f_n;
        if t2 < 0.0 {
            // Nominal speed unreachable; clip to the ramp intersection.
            t2 = 0.0;
            f_n = sqrtf(ldiff * accel);
        }

        let t1 = ((f_n - f_s) * one_over_accel).max(0.0);
        let t3 = ((f_n - f_e) * one_over_accel).max(0.0);

        let n1 = ceilf(t1 * FTM_FS) as u32;
        let n2 = ceilf(t2 * FTM_FS) as u32;
        let n3 = ceilf(t3 * FTM_FS) as u32;

        // Rematerialize phase durations as whole-sample multiples.
        let t1_p = n1 as f32 * FTM_TS;
        let t2_p = n2 as f32 * FTM_TS;
        let t3_p = n3 as f32 * FTM_TS;

        // Reachable feedrate at the end of the accel phase, given the
        // quantized phase durations.
        let f_p = (2.0 * total_length - f_s * t1_p - f_e * t3_p) / (t1_p + 2.0 * t2_p + t3_p);

        let accel_p = if n1 > 0 { (f_p - f_s) / t1_p } else { 0.0 };
        let decel_p = if n3 > 0 { (f_e - f_p) / t3_p } else { 0.0 };

        let s_1e = f_s * t1_p + 0.5 * accel_p * sq(t1_p);
        let s_2e = s_1e + f_p * t2_p;

        Ok(Self {
            start_posn,
            move_dist,
            ratio,
            f_s,
            f_p,
            accel_p,
            decel_p,
            s_1e,
            s_2e,
            n1,
            n2,
            n3,
            max_intervals: n1 + n2 + n3,
        })
    }

    /// A zero-motion tail holding `start_posn` for `max_intervals` samples,
    /// used to flush shaper state and pad out the final batch.
    pub fn runout(start_posn: [f32; NUM_AXES], max_intervals: u32) -> Self {
        Self {
            start_posn,
            n2: max_intervals,
            max_intervals,
            ..Self::default()
        }
    }

    /// Evaluate distance traveled and the acceleration factor at fixed-time
    /// sample `idx`.
    pub fn sample(&self, idx: u32) -> (f32, f32) {
        let mut tau = (idx + 1) as f32 * FTM_TS;
        if idx < self.n1 {
            // Acceleration phase.
            (self.f_s * tau + 0.5 * self.accel_p * sq(tau), self.accel_p)
        } else if idx < self.n1 + self.n2 {
            // Coasting phase.
            (self.s_1e + self.f_p * (tau - self.n1 as f32 * FTM_TS), 0.0)
        } else {
            // Deceleration phase.
            tau -= (self.n1 + self.n2) as f32 * FTM_TS;
            (
                self.s_2e + self.f_p * tau + 0.5 * self.decel_p * sq(tau),
                self.decel_p,
            )
        }
    }
}

/// The sliding per-axis sample window. `traj` receives freshly generated
/// samples; a completed batch is copied into `traj_mod` for the
/// interpolator (the frequency-based-smoothing hook operates on `traj_mod`
/// between the copy and interpolation), then the retained pre-roll slides
/// to the front.
pub struct TrajectoryWindow {
    pub traj: [[f32; FTM_WINDOW_SIZE]; NUM_AXES],
    pub traj_mod: [[f32; FTM_WINDOW_SIZE]; NUM_AXES],
}

impl TrajectoryWindow {
    pub fn new() -> Self {
        Self {
            traj: [[0.0; FTM_WINDOW_SIZE]; NUM_AXES],
            traj_mod: [[0.0; FTM_WINDOW_SIZE]; NUM_AXES],
        }
    }

    /// Hand the completed window to the interpolator side and slide the
    /// pre-roll back to the front of `traj`.
    pub fn handoff(&mut self) {
        for a in 0..NUM_AXES {
            self.traj_mod[a] = self.traj[a];
            self.traj[a].copy_within(FTM_BATCH_SIZE.., 0);
        }
    }

    pub fn reset(&mut self) {
        self.traj = [[0.0; FTM_WINDOW_SIZE]; NUM_AXES];
        self.traj_mod = [[0.0; FTM_WINDOW_SIZE]; NUM_AXES];
    }
}

impl Default for TrajectoryWindow {
    fn default() -> Self {
        Self::new()
    }
}
