//! The cooperative fixed-time motion controller.
//!
//! [`FtMotion`] owns the whole pipeline: it ingests planner blocks, runs
//! the vector generator up to a bounded number of samples per pass, slides
//! the batch window, interpolates ready batches into the command ring, and
//! publishes the busy flag. [`FtMotion::loop_tick`] does bounded work and
//! returns; it must only ever be invoked from one task.
//!
//! Lifecycle: create at boot, [`init`](FtMotion::init) once,
//! [`reset`](FtMotion::reset) on abort or quick-stop.

use crate::block::{Block, PlannerQueue, PlannerSettings};
use crate::config::{FtConfig, FtMotionMode};
use crate::errors::ConfigError;
use crate::interp::Interpolator;
use crate::ring::{BlockInfoSync, StepperProducer};
use crate::shaper::ShaperKernel;
use crate::trajectory::{BlockParams, TrajectoryWindow};
use crate::{
    E_AXIS, FTM_BATCH_SIZE, FTM_FS, FTM_LAST_BATCH_IDX, FTM_MIN_MAX_INTERVALS, FTM_POINTS_PER_LOOP,
    FTM_SHAPER_INTERVALS, FTM_STEPS_PER_LOOP, FTM_STEPS_PER_UNIT_TIME, FTM_TS, FTM_WINDOW_SIZE,
    NUM_AXES, X_AXIS, Y_AXIS, Z_AXIS,
};

/// The fixed-time motion pipeline.
pub struct FtMotion<'a> {
    cfg: FtConfig,
    shaping: ShaperKernel,
    producer: StepperProducer<'a>,

    current_block: Option<Block>,
    params: BlockParams,
    window: TrajectoryWindow,
    interp: Interpolator,

    /// A block is ready to be processed.
    block_proc_rdy: bool,
    /// One-tick shadow of the above, for one-shot block loading.
    block_proc_rdy_z1: bool,
    /// The current block is done being processed.
    block_proc_dn: bool,
    /// A full window of samples awaits post-processing.
    batch_rdy: bool,
    /// The batch is post-processed and awaits interpolation.
    batch_rdy_for_interp: bool,
    /// A runout tail is armed and allowed.
    runout_ena: bool,
    /// The loaded block variables describe a runout tail.
    block_data_is_runout: bool,
    busy: bool,

    /// (mm) Cumulative end position of all processed blocks.
    end_posn_prev_block: [f32; NUM_AXES],

    /// Sample index within the current block.
    make_vector_idx: u32,
    make_vector_idx_z1: u32,
    /// Write position within the trajectory window.
    make_vector_batch_idx: usize,

    /// Sample index within the batch being interpolated.
    interp_idx: u32,
    interp_idx_z1: u32,

    /// (mm) Unit delay of the raw extruder position.
    e_raw_z1: f32,
    /// (mm) Unit delay of the advanced extruder position.
    e_advanced_z1: f32,

    /// Degenerate blocks consumed without processing.
    skipped_blocks: u32,
}

impl<'a> FtMotion<'a> {
    pub fn new(cfg: FtConfig, producer: StepperProducer<'a>) -> Self {
        Self {
            cfg,
            shaping: ShaperKernel::new(),
            producer,
            current_block: None,
            params: BlockParams::default(),
            window: TrajectoryWindow::new(),
            interp: Interpolator::new(),
            block_proc_rdy: false,
            block_proc_rdy_z1: false,
            block_proc_dn: false,
            batch_rdy: false,
            batch_rdy_for_interp: false,
            runout_ena: false,
            block_data_is_runout: false,
            busy: false,
            end_posn_prev_block: [0.0; NUM_AXES],
            make_vector_idx: 0,
            make_vector_idx_z1: 0,
            make_vector_batch_idx: FTM_LAST_BATCH_IDX,
            interp_idx: 0,
            interp_idx_z1: 0,
            e_raw_z1: 0.0,
            e_advanced_z1: 0.0,
            skipped_blocks: 0,
        }
    }

    /// Initialize shaping state and zero the pipeline. Call once at boot.
    pub fn init(&mut self) {
        self.shaping.refresh_gains(&self.cfg);
        self.shaping.refresh_base_delays(&self.cfg);
        self.reset();
    }

    /// Reset all trajectory processing state, the command ring and the sync
    /// tables. Runs under a critical section so the stepper interrupt never
    /// observes a partially reset ring.
    pub fn reset(&mut self) {
        critical_section::with(|_| {
            // The consumer is quiesced for the duration of the section.
            unsafe { self.producer.reset_unchecked() };

            self.window.reset();
            self.block_proc_rdy = false;
            self.block_proc_rdy_z1 = false;
            self.block_proc_dn = false;
            self.batch_rdy = false;
            self.batch_rdy_for_interp = false;
            self.runout_ena = false;
            self.block_data_is_runout = false;

            self.end_posn_prev_block = [0.0; NUM_AXES];

            self.make_vector_idx = 0;
            self.make_vector_idx_z1 = 0;
            self.make_vector_batch_idx = FTM_LAST_BATCH_IDX;

            self.interp.reset();
            self.interp_idx = 0;
            self.interp_idx_z1 = 0;

            self.shaping.reset_history();
            self.e_raw_z1 = 0.0;
            self.e_advanced_z1 = 0.0;

            self.current_block = None;
            self.params = BlockParams::default();
        });
    }

    /// Busy status published to the planner.
    pub fn busy(&self) -> bool {
        self.busy
    }

    /// The per-axis running step totals emitted into the ring.
    pub fn step_position(&self) -> [i32; NUM_AXES] {
        self.interp.step_position()
    }

    /// (mm) End position of the last vectorized block.
    pub fn generated_end_position(&self) -> [f32; NUM_AXES] {
        self.end_posn_prev_block
    }

    /// Degenerate blocks consumed without processing since boot.
    pub fn skipped_blocks(&self) -> u32 {
        self.skipped_blocks
    }

    pub fn config(&self) -> &FtConfig {
        &self.cfg
    }

    // ---- Control API ----
    //
    // Callers quiesce the pipeline first: drain the planner and wait for
    // `busy()` to clear. None of these can block on that themselves.

    /// Switch the pipeline mode, refreshing shaper gains and delays when
    /// the new mode shapes. Returns the previous mode.
    pub fn enable(&mut self, mode: FtMotionMode) -> FtMotionMode {
        let prev = self.cfg.mode;
        self.set_mode(mode);
        prev
    }

    /// Disable the pipeline and reset all state. Returns the previous mode.
    pub fn disable(&mut self) -> FtMotionMode {
        let prev = self.cfg.mode;
        self.cfg.mode = FtMotionMode::Disabled;
        self.reset();
        prev
    }

    /// Set the pipeline mode and refresh shaping state if applicable.
    pub fn set_mode(&mut self, mode: FtMotionMode) {
        self.cfg.mode = mode;
        if self.cfg.mode.has_shaper() {
            self.shaping.refresh_gains(&self.cfg);
            self.shaping.refresh_base_delays(&self.cfg);
        }
    }

    /// Set a damping ratio; refreshes gains and delays (the damped period
    /// depends on zeta).
    pub fn set_zeta(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        self.cfg.set_zeta(axis, value)?;
        if self.cfg.mode.has_shaper() {
            self.shaping.refresh_gains(&self.cfg);
            self.shaping.refresh_base_delays(&self.cfg);
        }
        Ok(())
    }

    /// Set a vibration tolerance; refreshes gains (EI family only reads
    /// it).
    pub fn set_vtol(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        self.cfg.set_vtol(axis, value)?;
        if self.cfg.mode.has_shaper() {
            self.shaping.refresh_gains(&self.cfg);
        }
        Ok(())
    }

    /// Set a base shaping frequency; refreshes delays.
    pub fn set_base_freq(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        self.cfg.set_base_freq(axis, value)?;
        if self.cfg.mode.has_shaper() {
            self.shaping.refresh_base_delays(&self.cfg);
        }
        Ok(())
    }

    /// Set a dynamic frequency gain. Takes effect at the next dynamic
    /// refresh during vectorization.
    pub fn set_dyn_freq_k(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        self.cfg.set_dyn_freq_k(axis, value)
    }

    pub fn set_dyn_freq_mode(&mut self, mode: crate::config::DynFreqMode) {
        self.cfg.dyn_freq_mode = mode;
    }

    pub fn set_linear_advance(&mut self, enabled: bool, k: f32) -> Result<(), ConfigError> {
        self.cfg.set_linear_advance(enabled, k)
    }

    pub fn set_steps_rounding(&mut self, rounding: bool) {
        self.cfg.steps_rounding = rounding;
    }

    // ---- Controller loop ----

    /// One cooperative controller pass. Must not be invoked from more than
    /// one task.
    pub fn loop_tick(
        &mut self,
        planner: &mut PlannerQueue,
        settings: &PlannerSettings,
        quickstop: bool,
    ) {
        if self.cfg.mode == FtMotionMode::Disabled {
            return;
        }

        // Handle block abort: reset all state with the consumer quiesced,
        // then start looking for the next block.
        if self.producer.abort_requested() {
            self.reset();
            self.block_proc_dn = true;
            self.producer.clear_abort();
        }

        if quickstop {
            self.reset();
            self.block_proc_dn = true;
        }

        // Planner processing and block conversion.
        if !self.block_proc_rdy {
            self.block_queue_update(planner);
        }

        if self.block_proc_rdy {
            if !self.block_proc_rdy_z1 {
                // One-shot block load; runout tails arrive pre-loaded.
                if !self.block_data_is_runout {
                    self.load_block_data(settings);
                } else {
                    self.block_data_is_runout = false;
                }
            }
            while !self.block_proc_dn
                && !self.batch_rdy
                && self
                    .make_vector_idx
                    .wrapping_sub(self.make_vector_idx_z1)
                    < FTM_POINTS_PER_LOOP
            {
                self.make_vector();
            }
        }

        // Post processing: frequency-based smoothing would transform the
        // handed-off window here, between the copy and interpolation.
        if self.batch_rdy && !self.batch_rdy_for_interp {
            self.window.handoff();
            self.batch_rdy_for_interp = true;
            self.batch_rdy = false;
        }

        // Interpolation, deferred whenever ring free space runs short.
        while self.batch_rdy_for_interp
            && self.producer.free() >= FTM_STEPS_PER_UNIT_TIME as usize
            && self.interp_idx.wrapping_sub(self.interp_idx_z1) < FTM_STEPS_PER_LOOP
        {
            let idx = self.interp_idx as usize;
            let point = [
                self.window.traj_mod[X_AXIS][idx],
                self.window.traj_mod[Y_AXIS][idx],
                self.window.traj_mod[Z_AXIS][idx],
                self.window.traj_mod[E_AXIS][idx],
            ];
            if self
                .interp
                .convert_sample(&point, settings, self.cfg.steps_rounding, &mut self.producer)
                .is_err()
            {
                break;
            }
            self.interp_idx += 1;
            if self.interp_idx == FTM_BATCH_SIZE as u32 {
                self.batch_rdy_for_interp = false;
                self.interp_idx = 0;
            }
        }

        // Report busy status to the planner.
        let ring_busy = self.producer.items() > 0;
        self.busy = ring_busy
            || (self.block_proc_rdy && !self.block_proc_dn)
            || self.batch_rdy
            || self.batch_rdy_for_interp
            || self.runout_ena;

        self.block_proc_rdy_z1 = self.block_proc_rdy;
        self.make_vector_idx_z1 = self.make_vector_idx;
        self.interp_idx_z1 = self.interp_idx;
    }

    // ---- Private functions ----

    /// Poll the planner for work: consume sync-only blocks, skip degenerate
    /// ones, take over the next motion block, or arm a runout tail when the
    /// planner has gone idle.
    fn block_queue_update(&mut self, planner: &mut PlannerQueue) {
        loop {
            let Some(&block) = planner.head() else {
                self.runout_block();
                return;
            };

            if block.is_sync() {
                let e_only = block.sync_e;
                if self
                    .producer
                    .push_position_sync(&block.position, e_only)
                    .is_err()
                {
                    return; // ring full, retry next pass
                }
                planner.mark_block_consumed();
                continue;
            }

            if !(block.millimeters > 0.0)
                || block.step_event_count == 0
                || !(block.acceleration > 0.0)
            {
                self.skipped_blocks = self.skipped_blocks.wrapping_add(1);
                planner.mark_block_consumed();
                continue;
            }

            let steps_e = block.steps[E_AXIS] as i32;
            let info = BlockInfoSync {
                file_position: block.file_position,
                steps_x: block.steps[X_AXIS] as i32,
                steps_y: block.steps[Y_AXIS] as i32,
                steps_e: if block.direction_bits & (1 << E_AXIS) != 0 {
                    -steps_e
                } else {
                    steps_e
                },
            };
            if self.producer.push_block_info(info).is_err() {
                return; // ring full, retry next pass
            }
            planner.mark_block_consumed();
            self.current_block = Some(block);
            self.start_block_proc();
            return;
        }
    }

    /// Set controller states to begin processing a block.
    fn start_block_proc(&mut self) {
        self.block_proc_rdy = true;
        self.block_proc_dn = false;
        self.runout_ena = true;
    }

    /// Synthesize a zero-motion tail so held shaper impulses flush out and
    /// the final partial batch reaches the interpolator.
    fn runout_block(&mut self) {
        if !self.runout_ena {
            return;
        }

        let base = if self.cfg.mode.has_shaper() {
            FTM_SHAPER_INTERVALS.max(FTM_MIN_MAX_INTERVALS)
        } else {
            FTM_MIN_MAX_INTERVALS
        };
        let pad = (FTM_WINDOW_SIZE - self.make_vector_batch_idx) as u32;
        self.params = BlockParams::runout(self.end_posn_prev_block, base + pad);

        self.block_proc_rdy = true;
        self.block_data_is_runout = true;
        self.runout_ena = false;
        self.block_proc_dn = false;
    }

    /// Load / convert the taken-over block to fixed-time control variables.
    fn load_block_data(&mut self, settings: &PlannerSettings) {
        let Some(block) = self.current_block else {
            self.block_proc_dn = true;
            self.block_proc_rdy = false;
            return;
        };
        match BlockParams::load(&block, settings, self.end_posn_prev_block) {
            Ok(params) => {
                for a in 0..NUM_AXES {
                    self.end_posn_prev_block[a] += params.move_dist[a];
                }
                self.params = params;
            }
            Err(_) => {
                // Pre-validated at ingestion; nothing to vectorize.
                self.skipped_blocks = self.skipped_blocks.wrapping_add(1);
                self.block_proc_dn = true;
                self.block_proc_rdy = false;
            }
        }
    }

    /// Generate one data point of the fixed-time trajectory.
    fn make_vector(&mut self) {
        let (dist, accel_k) = self.params.sample(self.make_vector_idx);
        let bi = self.make_vector_batch_idx;

        let mut point = [0.0f32; NUM_AXES];
        for a in 0..NUM_AXES {
            point[a] = self.params.start_posn[a] + self.params.ratio[a] * dist;
        }

        // Feed-forward extruder compensation proportional to acceleration.
        if self.cfg.linear_adv_ena {
            let e_new = point[E_AXIS];
            let mut dedt_adj = (e_new - self.e_raw_z1) * FTM_FS;
            if self.params.ratio[E_AXIS] > 0.0 {
                dedt_adj += accel_k * self.cfg.linear_adv_k;
            }
            self.e_raw_z1 = e_new;
            self.e_advanced_z1 += dedt_adj * FTM_TS;
            point[E_AXIS] = self.e_advanced_z1;
        }

        // Update shaping parameters if needed.
        self.shaping
            .dynamic_refresh(&self.cfg, point[Z_AXIS], point[E_AXIS]);

        // Apply shaping if in mode.
        if self.cfg.mode.has_shaper() {
            let (sx, sy) = self.shaping.apply(point[X_AXIS], point[Y_AXIS]);
            point[X_AXIS] = sx;
            point[Y_AXIS] = sy;
        }

        for a in 0..NUM_AXES {
            self.window.traj[a][bi] = point[a];
        }

        self.make_vector_batch_idx += 1;
        if self.make_vector_batch_idx == FTM_WINDOW_SIZE {
            self.make_vector_batch_idx = FTM_LAST_BATCH_IDX;
            self.batch_rdy = true;
        }

        self.make_vector_idx += 1;
        if self.make_vector_idx == self.params.max_intervals {
            self.block_proc_dn = true;
            self.block_proc_rdy = false;
            self.make_vector_idx = 0;
        }
    }
}
