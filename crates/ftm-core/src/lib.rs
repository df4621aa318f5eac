//! # Fixed-Time Motion Core
//!
//! A deterministic fixed-time trajectory generator for multi-axis motion
//! controllers (3D printer / laser / CNC), usable on both host and MCU
//! (`no_std`-friendly).
//!
//! The pipeline consumes planner blocks (trapezoidal velocity profiles over a
//! straight multi-axis move) and emits, at a fixed sample rate, packed
//! step/direction command words into a lock-free ring drained by a stepper
//! interrupt. Between trajectory sampling and pulse emission sits an input
//! shaper that cancels residual vibration in X and Y by convolving the
//! position signal with a train of weighted, time-delayed impulses.
//!
//! Provides the core pieces:
//! - Shaper kernel (ZV/ZVD/ZVDD/ZVDDD/EI/2HEI/3HEI/MZV gain and delay tables)
//! - Block loader and fixed-time vector generator
//! - Batch window with a post-processing hook
//! - Bresenham interpolator producing sub-tick step commands
//! - Single-producer/single-consumer command ring with sync side tables
//! - Cooperative controller loop tying it all together

#![cfg_attr(not(feature = "std"), no_std)]

pub mod block;
pub mod config;
pub mod controller;
pub mod errors;
pub mod interp;
pub mod ring;
pub mod shaper;
pub mod trajectory;

mod math;

// Re-export core types for easier access
pub use block::{Block, MotionLimits, PlannerQueue, PlannerSettings, ToolheadSettings};
pub use config::{DynFreqMode, FtConfig, FtMotionMode};
pub use controller::FtMotion;
pub use errors::{BlockError, ConfigError, PlannerError};
pub use ring::{FtCommand, StepperChannel, StepperConsumer, StepperProducer};

/// Number of logical axes handled by the motion core.
pub const NUM_AXES: usize = 4;

/// Axis indices into the per-axis arrays.
pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;
pub const E_AXIS: usize = 3;

/// Trajectory sample rate in Hz.
pub const FTM_FS: f32 = 1000.0;
/// Trajectory sample period in seconds.
pub const FTM_TS: f32 = 1.0 / FTM_FS;

/// Samples retained in the sliding trajectory window.
pub const FTM_WINDOW_SIZE: usize = 200;
/// Samples handed to the interpolator per completed batch.
pub const FTM_BATCH_SIZE: usize = 100;
/// Window position generation resumes from after a batch is emitted. The
/// tail `[FTM_LAST_BATCH_IDX, FTM_WINDOW_SIZE)` is the shaper pre-roll.
pub const FTM_LAST_BATCH_IDX: usize = FTM_WINDOW_SIZE - FTM_BATCH_SIZE;

/// Length of the shaper delay line. Must exceed the largest impulse delay
/// in use; refreshed delays are clamped below this bound.
pub const FTM_ZMAX: usize = 600;

/// Stepper commands emitted per trajectory sample (sub-ticks).
pub const FTM_STEPS_PER_UNIT_TIME: i32 = 20;
/// Bresenham error threshold for emitting a step within a sample.
pub const FTM_CTS_COMPARE_VAL: i32 = FTM_STEPS_PER_UNIT_TIME / 2;

/// Upper bound on trajectory samples generated per controller pass.
pub const FTM_POINTS_PER_LOOP: u32 = 100;
/// Upper bound on batch samples interpolated per controller pass.
pub const FTM_STEPS_PER_LOOP: u32 = 60;

/// Floor applied to the effective shaping frequency before recomputing
/// impulse delays.
pub const FTM_MIN_SHAPE_FREQ: f32 = 10.0;

/// Runout samples needed to flush the longest admissible delay line,
/// rounded up to whole batches.
pub const FTM_SHAPER_INTERVALS: u32 =
    (FTM_BATCH_SIZE * ((FTM_ZMAX + FTM_BATCH_SIZE - 1) / FTM_BATCH_SIZE)) as u32;
/// Minimum runout length when no shaper is active: one full batch.
pub const FTM_MIN_MAX_INTERVALS: u32 = FTM_BATCH_SIZE as u32;
