//! Audio device integration using rodio
//!
//! Maps the block-queue sink contract onto a `rodio::Sink`: every submitted
//! block is appended as one mono 16-bit [`SamplesBuffer`], and a block counts
//! as processed once rodio has dropped it from its queue.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};

use super::ring::SlotId;
use super::sink::{AudioSink, SinkFormat, SinkOpener};
use crate::waveform::AudioBlock;
use crate::{Result, ToneError};

/// Opens the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioOpener;

impl SinkOpener for RodioOpener {
    fn open(&mut self, format: SinkFormat) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(RodioSink::open(format)?))
    }
}

/// Audio playback device using rodio
pub struct RodioSink {
    handle: OutputStreamHandle,
    sink: Sink,
    format: SinkFormat,
    /// Slots in submission order, oldest first
    queued: VecDeque<SlotId>,
    /// Dropping this sender releases the output stream thread
    stream_keepalive: Option<mpsc::Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl RodioSink {
    /// Open the default output device for `format`.
    ///
    /// The `OutputStream` is not `Send`, so it lives on a parked helper thread
    /// for as long as this sink is open.
    pub fn open(format: SinkFormat) -> Result<Self> {
        if format.bits_per_sample != 16 {
            return Err(ToneError::AudioDeviceError(format!(
                "unsupported sample width {} bits",
                format.bits_per_sample
            )));
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        let (keepalive_tx, keepalive_rx) = mpsc::channel::<()>();
        let stream_thread = thread::Builder::new()
            .name("tonegen-output".into())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Blocks until the sink drops its sender
                    let _ = keepalive_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("Failed to create audio stream: {e}")));
                }
            })
            .map_err(|e| ToneError::AudioDeviceError(format!("Failed to spawn output thread: {e}")))?;

        let handle = ready_rx
            .recv()
            .map_err(|_| ToneError::AudioDeviceError("output thread exited early".into()))?
            .map_err(ToneError::AudioDeviceError)?;

        let sink = Self::new_paused_sink(&handle)?;
        debug!(
            "rodio output opened: {} Hz, {} channel(s)",
            format.sample_rate, format.channels
        );

        Ok(RodioSink {
            handle,
            sink,
            format,
            queued: VecDeque::new(),
            stream_keepalive: Some(keepalive_tx),
            stream_thread: Some(stream_thread),
            closed: false,
        })
    }

    fn new_paused_sink(handle: &OutputStreamHandle) -> Result<Sink> {
        let sink = Sink::try_new(handle)
            .map_err(|e| ToneError::AudioDeviceError(format!("Failed to create audio sink: {e}")))?;
        sink.pause();
        Ok(sink)
    }

    /// Format the device was opened with.
    pub fn format(&self) -> SinkFormat {
        self.format
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.closed {
            return Err(ToneError::SinkError(format!("{op} on a closed rodio sink")));
        }
        Ok(())
    }

    fn processed(&self) -> usize {
        self.queued.len().saturating_sub(self.sink.len())
    }
}

impl AudioSink for RodioSink {
    fn submit(&mut self, slot: SlotId, block: &AudioBlock) -> Result<()> {
        self.ensure_open("submit")?;
        let source = SamplesBuffer::new(
            self.format.channels,
            self.format.sample_rate,
            block.samples().to_vec(),
        );
        self.sink.append(source);
        self.queued.push_back(slot);
        Ok(())
    }

    fn processed_count(&mut self) -> Result<usize> {
        self.ensure_open("processed_count")?;
        Ok(self.processed())
    }

    fn reclaim(&mut self) -> Result<SlotId> {
        self.ensure_open("reclaim")?;
        if self.processed() == 0 {
            return Err(ToneError::SinkError("no processed block to reclaim".into()));
        }
        self.queued
            .pop_front()
            .ok_or_else(|| ToneError::SinkError("no processed block to reclaim".into()))
    }

    fn is_playing(&mut self) -> Result<bool> {
        self.ensure_open("is_playing")?;
        Ok(!self.sink.is_paused() && !self.sink.empty())
    }

    fn play(&mut self) -> Result<()> {
        self.ensure_open("play")?;
        self.sink.play();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.ensure_open("stop")?;
        self.sink.pause();
        Ok(())
    }

    fn discard_queued(&mut self) -> Result<()> {
        self.ensure_open("discard_queued")?;
        // A stopped rodio sink drops its queue; start over with a fresh one
        self.sink.stop();
        self.sink = Self::new_paused_sink(&self.handle)
            .map_err(|e| ToneError::SinkError(e.to_string()))?;
        self.queued.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sink.stop();
        self.queued.clear();
        self.stream_keepalive.take();
        if let Some(thread) = self.stream_thread.take() {
            if thread.join().is_err() {
                warn!("rodio output thread panicked during shutdown");
            }
        }
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_rodio_sink(sample_rate: u32) -> Option<RodioSink> {
        match RodioSink::open(SinkFormat::mono16(sample_rate)) {
            Ok(sink) => Some(sink),
            Err(err) => {
                eprintln!(
                    "Skipping streaming::audio_device test (audio backend unavailable): {}",
                    err
                );
                None
            }
        }
    }

    #[test]
    fn test_rejects_non_16_bit_format() {
        let format = SinkFormat {
            bits_per_sample: 8,
            ..SinkFormat::mono16(44100)
        };
        assert!(matches!(
            RodioSink::open(format),
            Err(ToneError::AudioDeviceError(_))
        ));
    }

    #[test]
    fn test_opens_paused_and_empty() {
        let Some(mut sink) = try_rodio_sink(44100) else {
            return;
        };
        assert!(!sink.is_playing().unwrap());
        assert_eq!(sink.processed_count().unwrap(), 0);
        assert!(sink.reclaim().is_err());
    }

    #[test]
    fn test_submit_queues_without_processing() {
        let Some(mut sink) = try_rodio_sink(44100) else {
            return;
        };
        sink.submit(0, &AudioBlock::silent(4410)).unwrap();
        sink.submit(1, &AudioBlock::silent(4410)).unwrap();
        // Paused: nothing consumed yet
        assert_eq!(sink.processed_count().unwrap(), 0);

        sink.discard_queued().unwrap();
        assert_eq!(sink.processed_count().unwrap(), 0);
        assert!(!sink.is_playing().unwrap());
    }

    #[test]
    fn test_close_is_idempotent() {
        let Some(mut sink) = try_rodio_sink(48000) else {
            return;
        };
        assert_eq!(sink.format().sample_rate, 48000);
        sink.close();
        sink.close();
        assert!(sink.play().is_err());
    }
}
