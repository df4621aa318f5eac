//! Simulation rig: core + fake ISR + a miniature planner.
//!
//! The rig accepts millimeter moves, plans each as a standalone block
//! (full-stop junctions; lookahead lives upstream in the real planner),
//! feeds the controller loop, and drains the fake stepper at a configurable
//! rate so ring backpressure is exercised the way a live machine would.

use ftm_core::ring::StepperChannel;
use ftm_core::{
    Block, FtConfig, FtMotion, PlannerQueue, PlannerSettings, E_AXIS, NUM_AXES,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fake_stepper::FakeStepper;

/// One move of a batch job. Omitted axes hold their position.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct JobMove {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
    pub e: Option<f32>,
    /// Requested feedrate. [mm/s]
    pub feedrate: f32,
    /// Requested acceleration; defaults to 1000 mm/s^2.
    pub accel: Option<f32>,
}

/// Result of running a job through the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobSummary {
    pub moves: usize,
    pub blocks: usize,
    pub command_words: u64,
    pub step_position: [i64; NUM_AXES],
    pub position_mm: [f32; NUM_AXES],
    pub skipped_blocks: u32,
}

/// Errors from loading or running a batch job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("failed to read job file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse job file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("pipeline stalled before the job completed")]
    Stalled,
}

/// Load a JSON job file: an array of [`JobMove`]s.
pub fn load_job(path: &std::path::Path) -> Result<Vec<JobMove>, JobError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// The assembled simulation: controller, planner feed and fake ISR over
/// one shared stepper channel.
pub struct SimRig<'a> {
    pub ftm: FtMotion<'a>,
    pub stepper: FakeStepper<'a>,
    pub planner: PlannerQueue,
    pub settings: PlannerSettings,
    /// Words the fake ISR consumes per controller tick.
    pub drain_per_tick: usize,
    /// (mm) Planned position cursor.
    cursor: [f32; NUM_AXES],
    /// Planner-side step counters, snapshotted into blocks for sync.
    position_steps: [i32; NUM_AXES],
    file_position: u32,
    blocks_planned: usize,
}

impl<'a> SimRig<'a> {
    pub fn new(channel: &'a mut StepperChannel, cfg: FtConfig, settings: PlannerSettings) -> Self {
        let (producer, consumer) = channel.split();
        let mut ftm = FtMotion::new(cfg, producer);
        ftm.init();
        Self {
            ftm,
            stepper: FakeStepper::new(consumer),
            planner: PlannerQueue::new(),
            settings,
            drain_per_tick: 2048,
            cursor: [0.0; NUM_AXES],
            position_steps: [0; NUM_AXES],
            file_position: 0,
            blocks_planned: 0,
        }
    }

    /// Enable command-trace capture on the fake stepper.
    pub fn with_capture(mut self) -> Self {
        self.stepper = self.stepper.with_capture();
        self
    }

    /// Plan one move into the block queue. Returns false for zero-distance
    /// moves and when the queue is full (the caller retries after a tick).
    pub fn enqueue_move(&mut self, mv: &JobMove) -> bool {
        let target = [
            mv.x.unwrap_or(self.cursor[0]),
            mv.y.unwrap_or(self.cursor[1]),
            mv.z.unwrap_or(self.cursor[2]),
            mv.e.unwrap_or(self.cursor[3]),
        ];
        let accel = mv.accel.unwrap_or(1000.0);
        let Some(block) = self.plan_block(target, mv.feedrate, accel) else {
            debug!(?target, "zero-distance move dropped");
            self.cursor = target;
            return false;
        };
        if self.planner.push(block).is_err() {
            return false;
        }
        // Commit the planner-side cursors only once the block is queued.
        self.position_steps = block.position;
        self.file_position = block.file_position;
        self.cursor = target;
        self.blocks_planned += 1;
        true
    }

    /// One controller pass plus one ISR drain burst.
    pub fn tick(&mut self) {
        self.ftm.loop_tick(&mut self.planner, &self.settings, false);
        self.stepper.drain(self.drain_per_tick);
    }

    /// Everything generated, interpolated and consumed.
    pub fn idle(&self) -> bool {
        !self.ftm.busy() && self.planner.is_empty() && self.stepper.items() == 0
    }

    /// Run a whole job to completion.
    pub fn run_job(&mut self, moves: &[JobMove]) -> Result<JobSummary, JobError> {
        let mut next = 0;
        for _ in 0..2_000_000u64 {
            while next < moves.len() && self.enqueue_move(&moves[next]) {
                next += 1;
            }
            // A zero-distance move neither plans nor retries.
            while next < moves.len() && self.move_is_empty(&moves[next]) {
                next += 1;
            }
            self.tick();
            if next >= moves.len() && self.idle() {
                let summary = self.summary(moves.len());
                info!(
                    blocks = summary.blocks,
                    words = summary.command_words,
                    "job complete"
                );
                return Ok(summary);
            }
        }
        Err(JobError::Stalled)
    }

    fn move_is_empty(&self, mv: &JobMove) -> bool {
        let target = [
            mv.x.unwrap_or(self.cursor[0]),
            mv.y.unwrap_or(self.cursor[1]),
            mv.z.unwrap_or(self.cursor[2]),
            mv.e.unwrap_or(self.cursor[3]),
        ];
        target == self.cursor
    }

    fn summary(&self, moves: usize) -> JobSummary {
        JobSummary {
            moves,
            blocks: self.blocks_planned,
            command_words: self.stepper.words_consumed,
            step_position: self.stepper.position,
            position_mm: self.stepper.position_mm(&self.settings),
            skipped_blocks: self.ftm.skipped_blocks(),
        }
    }

    /// Convert a target position into a planner block with a trapezoid the
    /// upstream planner would deliver: full stops at both ends, feedrate
    /// and acceleration clamped against the effective toolhead limits.
    fn plan_block(&self, target: [f32; NUM_AXES], feedrate: f32, accel: f32) -> Option<Block> {
        let mut steps = [0u32; NUM_AXES];
        let mut direction_bits = 0u8;
        let mut delta = [0.0f32; NUM_AXES];
        let mut length_sq = 0.0f32;
        for a in 0..NUM_AXES {
            delta[a] = target[a] - self.cursor[a];
            steps[a] = (delta[a].abs() * self.settings.axis_steps_per_mm[a] + 0.5) as u32;
            if delta[a] < 0.0 {
                direction_bits |= 1 << a;
            }
            if a != E_AXIS {
                length_sq += delta[a] * delta[a];
            }
        }
        let millimeters = if length_sq > 0.0 {
            length_sq.sqrt()
        } else {
            delta[E_AXIS].abs()
        };
        let step_event_count = steps.iter().copied().max().unwrap_or(0);
        if step_event_count == 0 || millimeters <= 0.0 {
            return None;
        }

        // Per-axis limiting against the effective projection.
        let limits = &self.settings.effective;
        let mut nominal = feedrate;
        let mut accel = accel;
        for a in 0..NUM_AXES {
            let component = delta[a].abs();
            if component > 0.0 {
                let scale = millimeters / component;
                nominal = nominal.min(limits.max_feedrate_mm_s[a] * scale);
                accel = accel.min(limits.max_acceleration_mm_per_s2[a] * scale);
            }
        }

        let mut position = self.position_steps;
        for a in 0..NUM_AXES {
            let signed = steps[a] as i32;
            position[a] += if direction_bits & (1 << a) != 0 {
                -signed
            } else {
                signed
            };
        }

        Some(Block {
            steps,
            direction_bits,
            millimeters,
            step_event_count,
            initial_rate: 0,
            final_rate: 0,
            nominal_speed: nominal,
            acceleration: accel,
            file_position: self.file_position + 1,
            extruder: 0,
            position,
            sync_position: false,
            sync_e: false,
        })
    }
}
