//! Fixed pool of sample blocks cycled through the sink
//!
//! Every slot is either `Free` (owned by the generator, ready for refill) or
//! `InFlight` (submitted to the sink, not yet reclaimed). The pool never grows:
//! memory is `num_buffers * block_len` samples for the lifetime of the stream.

use super::sink::AudioSink;
use crate::waveform::AudioBlock;
use crate::{Result, ToneError};

/// Index of a slot in the ring
pub type SlotId = usize;

/// Ownership state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Ready to be refilled and submitted
    Free,
    /// Submitted to the sink, waiting to be played and reclaimed
    InFlight,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    block: AudioBlock,
}

/// Ring of `num_buffers` equally sized blocks
#[derive(Debug)]
pub struct BufferRing {
    slots: Vec<Slot>,
    block_len: usize,
}

impl BufferRing {
    /// Create a ring with every slot free and silent.
    ///
    /// # Errors
    ///
    /// Returns an error if either dimension is 0.
    pub fn new(num_buffers: usize, block_len: usize) -> Result<Self> {
        if num_buffers == 0 || block_len == 0 {
            return Err(ToneError::RingError(format!(
                "ring needs at least one non-empty block, got {num_buffers} x {block_len}"
            )));
        }
        let slots = (0..num_buffers)
            .map(|_| Slot {
                state: SlotState::Free,
                block: AudioBlock::silent(block_len),
            })
            .collect();
        Ok(BufferRing { slots, block_len })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Samples per block.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// State of slot `id`.
    pub fn state(&self, id: SlotId) -> Option<SlotState> {
        self.slots.get(id).map(|slot| slot.state)
    }

    /// Last block written into slot `id`.
    pub fn block(&self, id: SlotId) -> Option<&AudioBlock> {
        self.slots.get(id).map(|slot| &slot.block)
    }

    /// Slots ready for refill.
    pub fn free_count(&self) -> usize {
        self.count(SlotState::Free)
    }

    /// Slots owned by the sink.
    pub fn in_flight_count(&self) -> usize {
        self.count(SlotState::InFlight)
    }

    /// True when no slot is queued on the sink.
    pub fn is_all_free(&self) -> bool {
        self.in_flight_count() == 0
    }

    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|slot| slot.state == state).count()
    }

    /// Submit one initial block per slot, in slot order.
    ///
    /// Every slot must be free and exactly `len()` blocks must be supplied.
    pub fn submit_all(
        &mut self,
        sink: &mut dyn AudioSink,
        blocks: impl IntoIterator<Item = AudioBlock>,
    ) -> Result<usize> {
        if !self.slots.iter().all(|slot| slot.state == SlotState::Free) {
            return Err(ToneError::RingError(
                "initial fill requires every slot to be free".into(),
            ));
        }
        let mut submitted = 0;
        let mut blocks = blocks.into_iter();
        for id in 0..self.slots.len() {
            let block = blocks.next().ok_or_else(|| {
                ToneError::RingError(format!(
                    "initial fill needs {} blocks, got {id}",
                    self.slots.len()
                ))
            })?;
            self.refill(sink, id, block)?;
            submitted += 1;
        }
        if blocks.next().is_some() {
            return Err(ToneError::RingError(format!(
                "initial fill got more than {} blocks",
                self.slots.len()
            )));
        }
        Ok(submitted)
    }

    /// Reclaim every block the sink has finished playing.
    ///
    /// Returned slots are `Free` and must be refilled before the next call.
    pub fn reclaim_processed(&mut self, sink: &mut dyn AudioSink) -> Result<Vec<SlotId>> {
        let processed = sink.processed_count()?;
        let mut reclaimed = Vec::with_capacity(processed);
        for _ in 0..processed {
            let id = sink.reclaim()?;
            match self.slots.get_mut(id) {
                Some(slot) if slot.state == SlotState::InFlight => {
                    slot.state = SlotState::Free;
                    reclaimed.push(id);
                }
                Some(_) => {
                    return Err(ToneError::RingError(format!(
                        "sink returned slot {id} which was not in flight"
                    )))
                }
                None => {
                    return Err(ToneError::RingError(format!(
                        "sink returned unknown slot {id}"
                    )))
                }
            }
        }
        Ok(reclaimed)
    }

    /// Store `block` in free slot `id` and submit it.
    ///
    /// If the submit fails the slot stays `Free`.
    pub fn refill(&mut self, sink: &mut dyn AudioSink, id: SlotId, block: AudioBlock) -> Result<()> {
        if block.len() != self.block_len {
            return Err(ToneError::RingError(format!(
                "block has {} samples, ring blocks have {}",
                block.len(),
                self.block_len
            )));
        }
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| ToneError::RingError(format!("unknown slot {id}")))?;
        if slot.state == SlotState::InFlight {
            return Err(ToneError::RingError(format!(
                "slot {id} is already in flight"
            )));
        }
        slot.block = block;
        sink.submit(id, &slot.block)?;
        slot.state = SlotState::InFlight;
        Ok(())
    }

    /// Discard everything queued on the sink and free every slot.
    ///
    /// Slots are freed even when the sink call fails.
    pub fn flush(&mut self, sink: &mut dyn AudioSink) -> Result<()> {
        let result = sink.discard_queued();
        self.release_all();
        result
    }

    /// Free every slot without talking to the sink (device already gone).
    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
        }
    }
}
