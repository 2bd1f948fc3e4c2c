//! In-process audio sink
//!
//! [`VirtualSink`] behaves like a queue-based device but consumes samples only
//! when told to through its [`VirtualSinkProbe`]. The headless CLI drains it in
//! real time; tests drain it block by block and inject underruns and failures.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::ring::SlotId;
use super::sink::{AudioSink, SinkFormat, SinkOpener};
use crate::waveform::AudioBlock;
use crate::{Result, ToneError};

#[derive(Debug, Default)]
struct VirtualState {
    format: Option<SinkFormat>,
    open: bool,
    playing: bool,
    /// Submitted, not fully played
    queue: VecDeque<(SlotId, usize)>,
    /// Samples of the queue front already consumed
    front_consumed: usize,
    /// Played, waiting for reclaim
    processed: VecDeque<SlotId>,
    /// Copy of every submitted block when capture is on
    captured: Vec<(SlotId, AudioBlock)>,
    capture: bool,
    samples_played: u64,
    open_count: usize,
    play_calls: usize,
    underruns: usize,
    fail_calls: usize,
    fail_open: bool,
    /// Submitting to a dry, unhalted device starts it again (rodio behaviour)
    auto_resume: bool,
    /// Stopped by the caller, as opposed to run dry
    halted: bool,
}

impl VirtualState {
    fn check_failure(&mut self, op: &str) -> Result<()> {
        if !self.open {
            return Err(ToneError::SinkError(format!("{op} on a closed sink")));
        }
        if self.fail_calls > 0 {
            self.fail_calls -= 1;
            return Err(ToneError::SinkError(format!("injected {op} failure")));
        }
        Ok(())
    }

    /// Consume up to `samples` samples; returns how many were played.
    fn consume(&mut self, mut samples: usize) -> usize {
        if !self.playing {
            return 0;
        }
        let mut played = 0;
        while samples > 0 {
            let Some(&(slot, len)) = self.queue.front() else {
                break;
            };
            let take = samples.min(len - self.front_consumed);
            self.front_consumed += take;
            samples -= take;
            played += take;
            if self.front_consumed == len {
                self.queue.pop_front();
                self.processed.push_back(slot);
                self.front_consumed = 0;
            }
        }
        self.samples_played += played as u64;
        if self.queue.is_empty() {
            // Ran dry: device stops by itself
            self.playing = false;
            if samples > 0 || played > 0 {
                self.underruns += 1;
            }
        }
        played
    }
}

/// Queue-based sink driven by a [`VirtualSinkProbe`]
pub struct VirtualSink {
    state: Arc<Mutex<VirtualState>>,
}

/// Opens [`VirtualSink`]s sharing one probe
pub struct VirtualOpener {
    state: Arc<Mutex<VirtualState>>,
}

/// Test and simulation handle onto a [`VirtualSink`]
#[derive(Clone)]
pub struct VirtualSinkProbe {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualSink {
    /// Opener plus the probe that controls whatever it opens.
    pub fn opener() -> (VirtualOpener, VirtualSinkProbe) {
        let state = Arc::new(Mutex::new(VirtualState::default()));
        (
            VirtualOpener {
                state: Arc::clone(&state),
            },
            VirtualSinkProbe { state },
        )
    }
}

impl SinkOpener for VirtualOpener {
    fn open(&mut self, format: SinkFormat) -> Result<Box<dyn AudioSink>> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(ToneError::AudioDeviceError(
                "virtual device refused to open".into(),
            ));
        }
        state.format = Some(format);
        state.open = true;
        state.playing = false;
        state.queue.clear();
        state.processed.clear();
        state.front_consumed = 0;
        state.halted = true;
        state.open_count += 1;
        Ok(Box::new(VirtualSink {
            state: Arc::clone(&self.state),
        }))
    }
}

impl AudioSink for VirtualSink {
    fn submit(&mut self, slot: SlotId, block: &AudioBlock) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("submit")?;
        state.queue.push_back((slot, block.len()));
        if state.auto_resume && !state.halted {
            state.playing = true;
        }
        if state.capture {
            state.captured.push((slot, block.clone()));
        }
        Ok(())
    }

    fn processed_count(&mut self) -> Result<usize> {
        let mut state = self.state.lock();
        state.check_failure("processed_count")?;
        Ok(state.processed.len())
    }

    fn reclaim(&mut self) -> Result<SlotId> {
        let mut state = self.state.lock();
        state.check_failure("reclaim")?;
        state
            .processed
            .pop_front()
            .ok_or_else(|| ToneError::SinkError("no processed block to reclaim".into()))
    }

    fn is_playing(&mut self) -> Result<bool> {
        let mut state = self.state.lock();
        state.check_failure("is_playing")?;
        Ok(state.playing)
    }

    fn play(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("play")?;
        state.play_calls += 1;
        state.halted = false;
        // Like a queue-based device, playing an empty queue stops at once
        state.playing = !state.queue.is_empty();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("stop")?;
        state.playing = false;
        state.halted = true;
        Ok(())
    }

    fn discard_queued(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure("discard_queued")?;
        state.queue.clear();
        state.processed.clear();
        state.front_consumed = 0;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.playing = false;
        state.queue.clear();
        state.processed.clear();
        state.front_consumed = 0;
    }
}

impl VirtualSinkProbe {
    /// Play up to `count` whole blocks; returns how many finished.
    ///
    /// A partially consumed front block counts as one.
    pub fn drain_blocks(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        let mut finished = 0;
        while finished < count && state.playing {
            let Some(&(_, len)) = state.queue.front() else {
                break;
            };
            let remaining = len - state.front_consumed;
            state.consume(remaining);
            finished += 1;
        }
        finished
    }

    /// Play `count` samples in queue order; returns samples actually played.
    pub fn drain_samples(&self, count: usize) -> usize {
        self.state.lock().consume(count)
    }

    /// Simulate the device running dry: every queued block is played out
    /// and playback stops.
    pub fn force_underrun(&self) {
        let mut state = self.state.lock();
        if !state.playing {
            state.playing = true;
        }
        let queued: usize = state
            .queue
            .iter()
            .map(|&(_, len)| len)
            .sum::<usize>()
            - state.front_consumed;
        state.consume(queued);
        state.playing = false;
    }

    /// Fail the next `count` sink calls.
    pub fn fail_next_calls(&self, count: usize) {
        self.state.lock().fail_calls = count;
    }

    /// Make subsequent opens fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Resume playback on submit after running dry, like a rodio sink.
    pub fn set_auto_resume(&self, auto_resume: bool) {
        self.state.lock().auto_resume = auto_resume;
    }

    /// Keep a copy of every submitted block.
    pub fn set_capture(&self, capture: bool) {
        self.state.lock().capture = capture;
    }

    /// Take the captured submissions, oldest first.
    pub fn take_submitted(&self) -> Vec<(SlotId, AudioBlock)> {
        std::mem::take(&mut self.state.lock().captured)
    }

    /// Blocks submitted and not fully played.
    pub fn queued_blocks(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Blocks played and not yet reclaimed.
    pub fn processed_blocks(&self) -> usize {
        self.state.lock().processed.len()
    }

    /// Whether the device is consuming samples.
    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// Whether a sink is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Format of the last open.
    pub fn format(&self) -> Option<SinkFormat> {
        self.state.lock().format
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Number of `play` calls received.
    pub fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    /// Times the device ran dry.
    pub fn underruns(&self) -> usize {
        self.state.lock().underruns
    }

    /// Total samples consumed.
    pub fn samples_played(&self) -> u64 {
        self.state.lock().samples_played
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (Box<dyn AudioSink>, VirtualSinkProbe) {
        let (mut opener, probe) = VirtualSink::opener();
        (opener.open(SinkFormat::mono16(8000)).unwrap(), probe)
    }

    #[test]
    fn test_nothing_plays_until_play() {
        let (mut sink, probe) = open();
        sink.submit(0, &AudioBlock::silent(10)).unwrap();
        assert_eq!(probe.drain_samples(10), 0);
        sink.play().unwrap();
        assert_eq!(probe.drain_samples(10), 10);
        assert_eq!(sink.processed_count().unwrap(), 1);
        assert_eq!(sink.reclaim().unwrap(), 0);
    }

    #[test]
    fn test_partial_consumption_spans_blocks() {
        let (mut sink, probe) = open();
        sink.submit(3, &AudioBlock::silent(10)).unwrap();
        sink.submit(1, &AudioBlock::silent(10)).unwrap();
        sink.play().unwrap();

        assert_eq!(probe.drain_samples(15), 15);
        assert_eq!(probe.processed_blocks(), 1);
        assert_eq!(probe.drain_blocks(1), 1);
        assert_eq!(sink.reclaim().unwrap(), 3);
        assert_eq!(sink.reclaim().unwrap(), 1);
        assert!(sink.reclaim().is_err());
    }

    #[test]
    fn test_running_dry_stops_playback() {
        let (mut sink, probe) = open();
        sink.submit(0, &AudioBlock::silent(4)).unwrap();
        sink.play().unwrap();
        assert_eq!(probe.drain_samples(100), 4);
        assert!(!sink.is_playing().unwrap());
        assert_eq!(probe.underruns(), 1);
    }

    #[test]
    fn test_play_on_empty_queue_stays_stopped() {
        let (mut sink, _probe) = open();
        sink.play().unwrap();
        assert!(!sink.is_playing().unwrap());
    }

    #[test]
    fn test_force_underrun_processes_queue() {
        let (mut sink, probe) = open();
        for slot in 0..3 {
            sink.submit(slot, &AudioBlock::silent(4)).unwrap();
        }
        sink.play().unwrap();
        probe.force_underrun();
        assert!(!probe.is_playing());
        assert_eq!(sink.processed_count().unwrap(), 3);
        assert_eq!(probe.queued_blocks(), 0);
    }

    #[test]
    fn test_open_failure_and_closed_calls() {
        let (mut opener, probe) = VirtualSink::opener();
        probe.set_fail_open(true);
        assert!(matches!(
            opener.open(SinkFormat::mono16(8000)),
            Err(ToneError::AudioDeviceError(_))
        ));

        probe.set_fail_open(false);
        let mut sink = opener.open(SinkFormat::mono16(8000)).unwrap();
        assert_eq!(probe.format(), Some(SinkFormat::mono16(8000)));
        sink.close();
        assert!(!probe.is_open());
        assert!(sink.play().is_err());
    }

    #[test]
    fn test_auto_resume_after_running_dry() {
        let (mut sink, probe) = open();
        probe.set_auto_resume(true);
        sink.submit(0, &AudioBlock::silent(4)).unwrap();
        assert!(!probe.is_playing());

        sink.play().unwrap();
        probe.drain_samples(4);
        assert!(!probe.is_playing());
        sink.submit(1, &AudioBlock::silent(4)).unwrap();
        assert!(probe.is_playing());

        // An explicit stop is not undone by a submit
        sink.stop().unwrap();
        sink.submit(2, &AudioBlock::silent(4)).unwrap();
        assert!(!probe.is_playing());
    }

    #[test]
    fn test_capture_records_submissions() {
        let (mut sink, probe) = open();
        probe.set_capture(true);
        sink.submit(2, &AudioBlock::from_samples(vec![1, 2, 3]))
            .unwrap();
        let captured = probe.take_submitted();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, 2);
        assert_eq!(captured[0].1.samples(), &[1, 2, 3]);
        assert!(probe.take_submitted().is_empty());
    }
}
