//! Bresenham interpolator: batch samples to sub-tick step commands.
//!
//! For each sample the per-axis step target is compared against the running
//! step total; the signed difference feeds integer error accumulators over
//! `FTM_STEPS_PER_UNIT_TIME` sub-ticks, emitting one command word per
//! sub-tick with step and direction bits set as the accumulators cross the
//! threshold.

use crate::block::PlannerSettings;
use crate::ring::{FtCommand, StepperProducer, FT_DIR_BITS, FT_STEP_BITS};
use crate::{FTM_CTS_COMPARE_VAL, FTM_STEPS_PER_UNIT_TIME, NUM_AXES};

/// Interpolator state: the per-axis running step totals. Never reset while
/// a session is live; zeroed only by the full pipeline reset.
#[derive(Debug, Default)]
pub struct Interpolator {
    steps: [i32; NUM_AXES],
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The running step totals (command words emitted so far, signed).
    pub fn step_position(&self) -> [i32; NUM_AXES] {
        self.steps
    }

    pub fn reset(&mut self) {
        self.steps = [0; NUM_AXES];
    }

    /// Convert one batch sample into `FTM_STEPS_PER_UNIT_TIME` command
    /// words. `rounding` selects nearest rounding of step targets over
    /// legacy truncation.
    ///
    /// The caller gates on ring free space; a full ring aborts the sample
    /// mid-way and surfaces the rejected word.
    pub fn convert_sample(
        &mut self,
        point: &[f32; NUM_AXES],
        settings: &PlannerSettings,
        rounding: bool,
        producer: &mut StepperProducer<'_>,
    ) -> Result<(), FtCommand> {
        let mut delta = [0i32; NUM_AXES];
        for a in 0..NUM_AXES {
            let scaled = point[a] * settings.axis_steps_per_mm[a];
            let target = if rounding {
                (scaled + if scaled < 0.0 { -0.5 } else { 0.5 }) as i32
            } else {
                scaled as i32
            };
            delta[a] = target - self.steps[a];
        }

        let mut err = [0i32; NUM_AXES];
        for _ in 0..FTM_STEPS_PER_UNIT_TIME {
            let mut word: FtCommand = 0;
            for a in 0..NUM_AXES {
                err[a] += delta[a];
                if delta[a] >= 0 {
                    if err[a] >= FTM_CTS_COMPARE_VAL {
                        self.steps[a] += 1;
                        word |= FT_STEP_BITS[a];
                        err[a] -= FTM_STEPS_PER_UNIT_TIME;
                    }
                } else if err[a] <= -FTM_CTS_COMPARE_VAL {
                    self.steps[a] -= 1;
                    word |= FT_DIR_BITS[a] | FT_STEP_BITS[a];
                    err[a] += FTM_STEPS_PER_UNIT_TIME;
                }
            }
            producer.push(word)?;
        }
        Ok(())
    }
}
