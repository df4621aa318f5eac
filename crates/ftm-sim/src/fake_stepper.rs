//! Simulated stepper interrupt.
//!
//! Consumes command words from the ring exactly as the hardware ISR would:
//! strictly in FIFO order, one word per timer tick, applying step/dir bits
//! to absolute position counters and sync words to the snapshot state.

use ftm_core::ring::{
    BlockInfoSync, FtCommand, StepperConsumer, FT_BIT_SYNC_BLOCK_INFO, FT_BIT_SYNC_POS,
    FT_BIT_SYNC_POS_E, FT_DIR_BITS, FT_STEP_BITS, FT_SYNC_INDEX_MASK,
};
use ftm_core::{PlannerSettings, E_AXIS, NUM_AXES};

/// The ISR stand-in. Owns the consumer half of the stepper channel.
pub struct FakeStepper<'a> {
    consumer: StepperConsumer<'a>,
    /// Absolute step position per axis, driven by step/dir bits.
    pub position: [i64; NUM_AXES],
    /// Last position snapshot delivered by a sync command.
    pub synced_position: [i32; NUM_AXES],
    /// Block-info records received, oldest first.
    pub block_infos: Vec<BlockInfoSync>,
    /// Total command words consumed.
    pub words_consumed: u64,
    /// Full command trace, when capturing.
    capture: Option<Vec<FtCommand>>,
}

impl<'a> FakeStepper<'a> {
    pub fn new(consumer: StepperConsumer<'a>) -> Self {
        Self {
            consumer,
            position: [0; NUM_AXES],
            synced_position: [0; NUM_AXES],
            block_infos: Vec::new(),
            words_consumed: 0,
            capture: None,
        }
    }

    /// Record every consumed word for later inspection or replay diffing.
    pub fn with_capture(mut self) -> Self {
        self.capture = Some(Vec::new());
        self
    }

    /// Words currently waiting in the ring.
    pub fn items(&self) -> usize {
        self.consumer.items()
    }

    /// Signal the controller to abandon the current block.
    pub fn request_abort(&self) {
        self.consumer.request_abort();
    }

    /// Drain up to `max_words` commands, applying each.
    pub fn drain(&mut self, max_words: usize) -> usize {
        let mut consumed = 0;
        while consumed < max_words {
            let Some(word) = self.consumer.pop() else {
                break;
            };
            self.apply(word);
            consumed += 1;
        }
        self.words_consumed += consumed as u64;
        consumed
    }

    /// Captured command trace, if capturing was enabled.
    pub fn trace(&self) -> Option<&[FtCommand]> {
        self.capture.as_deref()
    }

    /// Absolute position in millimeters.
    pub fn position_mm(&self, settings: &PlannerSettings) -> [f32; NUM_AXES] {
        let mut mm = [0.0; NUM_AXES];
        for a in 0..NUM_AXES {
            mm[a] = self.position[a] as f32 * settings.steps_to_mm[a];
        }
        mm
    }

    fn apply(&mut self, word: FtCommand) {
        if let Some(trace) = &mut self.capture {
            trace.push(word);
        }
        let idx = (word & FT_SYNC_INDEX_MASK) as usize;
        if word & FT_BIT_SYNC_POS != 0 {
            let snapshot = self.consumer.position_sync(idx);
            for a in 0..NUM_AXES {
                if a != E_AXIS {
                    self.synced_position[a] = snapshot[a];
                }
            }
        } else if word & FT_BIT_SYNC_POS_E != 0 {
            self.synced_position[E_AXIS] = self.consumer.position_sync(idx)[E_AXIS];
        } else if word & FT_BIT_SYNC_BLOCK_INFO != 0 {
            self.block_infos.push(self.consumer.block_info(idx));
        } else {
            for a in 0..NUM_AXES {
                if word & FT_STEP_BITS[a] != 0 {
                    self.position[a] += if word & FT_DIR_BITS[a] != 0 { -1 } else { 1 };
                }
            }
        }
    }
}
