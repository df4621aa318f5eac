//! Lock-free command ring and sync side tables shared with the stepper ISR.
//!
//! Single producer (the controller loop), single consumer (the stepper
//! interrupt). Each ring slot is one packed command word: step and
//! direction bits per axis, or one of three mutually exclusive sync
//! meta-bits whose low byte indexes a side table.
//!
//! Index discipline: the producer only writes `prod`, the consumer only
//! writes `cons`; each index is stored with release ordering and loaded by
//! the other side with acquire ordering. Side-table entries are written
//! before the command word referencing them is published by the `prod`
//! release store, which is the barrier weakly ordered targets need between
//! the entry write and the command write.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::NUM_AXES;

/// A packed step/dir/sync command word.
pub type FtCommand = u32;

/// Capacity of the command ring. Power of two; one slot is always kept
/// free so the producer can never overtake the consumer.
pub const FTM_STEPPERCMD_BUFF_SIZE: usize = 4096;
const CMD_MASK: usize = FTM_STEPPERCMD_BUFF_SIZE - 1;

/// Entries in the position-sync side table.
pub const FTM_SYNC_POSITION_SIZE: usize = 16;
/// Entries in the block-info side table.
pub const FTM_BLOCK_INFO_SIZE: usize = 16;

/// Step bits, one per axis, bits 0..4.
pub const FT_STEP_BITS: [FtCommand; NUM_AXES] = [1 << 0, 1 << 1, 1 << 2, 1 << 3];
/// Direction bits, one per axis, bits 4..8. A set bit means negative
/// motion.
pub const FT_DIR_BITS: [FtCommand; NUM_AXES] = [1 << 4, 1 << 5, 1 << 6, 1 << 7];

/// Snapshot the XYZ position counters from the position-sync table.
pub const FT_BIT_SYNC_POS: FtCommand = 1 << 29;
/// Snapshot the E position counter from the position-sync table.
pub const FT_BIT_SYNC_POS_E: FtCommand = 1 << 30;
/// Deliver a block-info record to the job tracker.
pub const FT_BIT_SYNC_BLOCK_INFO: FtCommand = 1 << 31;
/// Low bits of a sync command carrying the side-table index.
pub const FT_SYNC_INDEX_MASK: FtCommand = 0xFF;

/// Job-tracker record published when a new block starts: source file
/// offset and per-axis step counts, E signed by direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfoSync {
    pub file_position: u32,
    pub steps_x: i32,
    pub steps_y: i32,
    pub steps_e: i32,
}

impl BlockInfoSync {
    pub const EMPTY: Self = Self {
        file_position: 0,
        steps_x: 0,
        steps_y: 0,
        steps_e: 0,
    };
}

/// The shared channel between the controller and the stepper ISR: the
/// command ring, both sync side tables, and the abort flag. Created once
/// at boot and split into a producer and a consumer handle.
pub struct StepperChannel {
    cmd: UnsafeCell<[FtCommand; FTM_STEPPERCMD_BUFF_SIZE]>,
    prod_idx: AtomicUsize,
    cons_idx: AtomicUsize,
    position_sync: UnsafeCell<[[i32; NUM_AXES]; FTM_SYNC_POSITION_SIZE]>,
    block_info: UnsafeCell<[BlockInfoSync; FTM_BLOCK_INFO_SIZE]>,
    abort_current_block: AtomicBool,
}

// The producer/consumer split plus the index discipline above make the
// interior mutability sound across the ISR boundary.
unsafe impl Sync for StepperChannel {}

impl StepperChannel {
    pub const fn new() -> Self {
        Self {
            cmd: UnsafeCell::new([0; FTM_STEPPERCMD_BUFF_SIZE]),
            prod_idx: AtomicUsize::new(0),
            cons_idx: AtomicUsize::new(0),
            position_sync: UnsafeCell::new([[0; NUM_AXES]; FTM_SYNC_POSITION_SIZE]),
            block_info: UnsafeCell::new([BlockInfoSync::EMPTY; FTM_BLOCK_INFO_SIZE]),
            abort_current_block: AtomicBool::new(false),
        }
    }

    /// Split into the controller-side producer and the ISR-side consumer.
    pub fn split(&mut self) -> (StepperProducer<'_>, StepperConsumer<'_>) {
        let ch = &*self;
        (
            StepperProducer {
                ch,
                position_sync_idx: 0,
                block_info_idx: 0,
            },
            StepperConsumer { ch },
        )
    }

    fn items(&self) -> usize {
        let prod = self.prod_idx.load(Ordering::Relaxed);
        let cons = self.cons_idx.load(Ordering::Relaxed);
        (prod + FTM_STEPPERCMD_BUFF_SIZE - cons) & CMD_MASK
    }
}

impl Default for StepperChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller-side handle: writes command words and side-table entries,
/// owns the side-table cursors, and performs the quiesced reset.
pub struct StepperProducer<'a> {
    ch: &'a StepperChannel,
    position_sync_idx: usize,
    block_info_idx: usize,
}

impl<'a> StepperProducer<'a> {
    /// Commands currently queued.
    pub fn items(&self) -> usize {
        self.ch.items()
    }

    /// Free slots, excluding the reserved empty slot.
    pub fn free(&self) -> usize {
        FTM_STEPPERCMD_BUFF_SIZE - 1 - self.items()
    }

    /// Enqueue one command word. Fails when only the reserved slot is
    /// left; the caller gates on [`free`](Self::free) so this is the
    /// backstop, not the backpressure mechanism.
    pub fn push(&mut self, word: FtCommand) -> Result<(), FtCommand> {
        if self.free() == 0 {
            return Err(word);
        }
        let prod = self.ch.prod_idx.load(Ordering::Relaxed);
        unsafe {
            (*self.ch.cmd.get())[prod] = word;
        }
        self.ch
            .prod_idx
            .store((prod + 1) & CMD_MASK, Ordering::Release);
        Ok(())
    }

    /// Publish a position snapshot and the sync command referencing it.
    /// `e_only` selects the extruder-only variant.
    pub fn push_position_sync(
        &mut self,
        position: &[i32; NUM_AXES],
        e_only: bool,
    ) -> Result<(), FtCommand> {
        let idx = self.position_sync_idx;
        unsafe {
            (*self.ch.position_sync.get())[idx] = *position;
        }
        let meta = if e_only {
            FT_BIT_SYNC_POS_E
        } else {
            FT_BIT_SYNC_POS
        };
        self.push(meta | idx as FtCommand)?;
        self.position_sync_idx = (idx + 1) % FTM_SYNC_POSITION_SIZE;
        Ok(())
    }

    /// Publish a block-info record and the sync command referencing it.
    pub fn push_block_info(&mut self, info: BlockInfoSync) -> Result<(), FtCommand> {
        let idx = self.block_info_idx;
        unsafe {
            (*self.ch.block_info.get())[idx] = info;
        }
        self.push(FT_BIT_SYNC_BLOCK_INFO | idx as FtCommand)?;
        self.block_info_idx = (idx + 1) % FTM_BLOCK_INFO_SIZE;
        Ok(())
    }

    /// Whether the ISR has requested the current block be abandoned.
    pub fn abort_requested(&self) -> bool {
        self.ch.abort_current_block.load(Ordering::Acquire)
    }

    /// Acknowledge the abort after the reset completed.
    pub fn clear_abort(&self) {
        self.ch.abort_current_block.store(false, Ordering::Release);
    }

    /// Zero the ring, both indices, both side tables and the cursors.
    ///
    /// # Safety
    ///
    /// The consumer must be quiesced (interrupts disabled) for the whole
    /// call; a concurrent `pop` would race the index stores.
    pub unsafe fn reset_unchecked(&mut self) {
        unsafe {
            (*self.ch.cmd.get()) = [0; FTM_STEPPERCMD_BUFF_SIZE];
            (*self.ch.position_sync.get()) = [[0; NUM_AXES]; FTM_SYNC_POSITION_SIZE];
            (*self.ch.block_info.get()) = [BlockInfoSync::EMPTY; FTM_BLOCK_INFO_SIZE];
        }
        self.ch.prod_idx.store(0, Ordering::Release);
        self.ch.cons_idx.store(0, Ordering::Release);
        self.position_sync_idx = 0;
        self.block_info_idx = 0;
    }
}

/// ISR-side handle: FIFO pop of command words, side-table reads, and the
/// abort request.
pub struct StepperConsumer<'a> {
    ch: &'a StepperChannel,
}

impl<'a> StepperConsumer<'a> {
    /// Commands currently queued.
    pub fn items(&self) -> usize {
        self.ch.items()
    }

    /// Take the next command word, if any.
    pub fn pop(&mut self) -> Option<FtCommand> {
        let cons = self.ch.cons_idx.load(Ordering::Relaxed);
        let prod = self.ch.prod_idx.load(Ordering::Acquire);
        if cons == prod {
            return None;
        }
        let word = unsafe { (*self.ch.cmd.get())[cons] };
        self.ch
            .cons_idx
            .store((cons + 1) & CMD_MASK, Ordering::Release);
        Some(word)
    }

    /// Read a position snapshot referenced by a sync command's low bits.
    pub fn position_sync(&self, idx: usize) -> [i32; NUM_AXES] {
        unsafe { (*self.ch.position_sync.get())[idx % FTM_SYNC_POSITION_SIZE] }
    }

    /// Read a block-info record referenced by a sync command's low bits.
    pub fn block_info(&self, idx: usize) -> BlockInfoSync {
        unsafe { (*self.ch.block_info.get())[idx % FTM_BLOCK_INFO_SIZE] }
    }

    /// Ask the controller to abandon the current block and reset.
    pub fn request_abort(&self) {
        self.ch.abort_current_block.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_and_wraparound() {
        let mut channel = StepperChannel::new();
        let (mut producer, mut consumer) = channel.split();
        // Cycle more words than the ring holds, draining as we go.
        let mut next_expected = 0u32;
        for word in 0..(3 * FTM_STEPPERCMD_BUFF_SIZE as u32) {
            producer.push(word).unwrap();
            if producer.free() < 8 {
                while let Some(got) = consumer.pop() {
                    assert_eq!(got, next_expected);
                    next_expected += 1;
                }
            }
        }
        while let Some(got) = consumer.pop() {
            assert_eq!(got, next_expected);
            next_expected += 1;
        }
        assert_eq!(next_expected, 3 * FTM_STEPPERCMD_BUFF_SIZE as u32);
    }

    #[test]
    fn producer_never_overwrites_consumer() {
        let mut channel = StepperChannel::new();
        let (mut producer, mut consumer) = channel.split();
        for word in 0..FTM_STEPPERCMD_BUFF_SIZE as u32 {
            let _ = producer.push(word);
        }
        // The reserved slot rejects the final word.
        assert_eq!(producer.items(), FTM_STEPPERCMD_BUFF_SIZE - 1);
        assert_eq!(producer.push(0xdead), Err(0xdead));
        assert_eq!(consumer.pop(), Some(0));
    }

    #[test]
    fn sync_tables_round_trip() {
        let mut channel = StepperChannel::new();
        let (mut producer, mut consumer) = channel.split();
        producer
            .push_position_sync(&[10, 20, 30, 40], false)
            .unwrap();
        producer.push_position_sync(&[0, 0, 0, 55], true).unwrap();
        producer
            .push_block_info(BlockInfoSync {
                file_position: 99,
                steps_x: 800,
                steps_y: -400,
                steps_e: -32,
            })
            .unwrap();

        let word = consumer.pop().unwrap();
        assert_ne!(word & FT_BIT_SYNC_POS, 0);
        let snapshot = consumer.position_sync((word & FT_SYNC_INDEX_MASK) as usize);
        assert_eq!(snapshot, [10, 20, 30, 40]);

        let word = consumer.pop().unwrap();
        assert_ne!(word & FT_BIT_SYNC_POS_E, 0);
        assert_eq!(
            consumer.position_sync((word & FT_SYNC_INDEX_MASK) as usize)[crate::E_AXIS],
            55
        );

        let word = consumer.pop().unwrap();
        assert_ne!(word & FT_BIT_SYNC_BLOCK_INFO, 0);
        let info = consumer.block_info((word & FT_SYNC_INDEX_MASK) as usize);
        assert_eq!(info.file_position, 99);
        assert_eq!(info.steps_e, -32);
    }

    #[test]
    fn reset_empties_everything() {
        let mut channel = StepperChannel::new();
        let (mut producer, mut consumer) = channel.split();
        producer.push(0x11).unwrap();
        producer.push_position_sync(&[1, 2, 3, 4], false).unwrap();
        unsafe { producer.reset_unchecked() };
        assert_eq!(producer.items(), 0);
        assert_eq!(consumer.pop(), None);
        assert_eq!(consumer.position_sync(0), [0; NUM_AXES]);
    }
}
