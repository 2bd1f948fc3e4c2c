//! End-to-end streaming through the scheduler and a virtual device.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tonegen::streaming::{SchedulerState, VirtualSinkProbe};
use tonegen::waveform::{binaural_sample, sine_sample, square_sample};
use tonegen::{
    generate, ChangePolicy, PhaseCursor, StreamConfig, StreamingScheduler, ToneError,
    VirtualSink, WaveKind, WaveformParameters,
};

const SAMPLE_RATE: u32 = 44100;
const BUFFER_SIZE: usize = 4096;
const NUM_BUFFERS: usize = 4;
const AMPLITUDE: i16 = 32760;

fn stream_config() -> StreamConfig {
    StreamConfig {
        sample_rate: SAMPLE_RATE,
        buffer_size: BUFFER_SIZE,
        num_buffers: NUM_BUFFERS,
        tick_interval_ms: 10,
    }
}

fn params(kind: WaveKind, frequency: f64, beat: f64) -> WaveformParameters {
    WaveformParameters::new(kind, frequency, beat, AMPLITUDE, SAMPLE_RATE).unwrap()
}

fn start(kind: WaveKind, frequency: f64, beat: f64) -> (StreamingScheduler, VirtualSinkProbe) {
    let (opener, probe) = VirtualSink::opener();
    probe.set_capture(true);
    let p = params(kind, frequency, beat);
    let mut scheduler = StreamingScheduler::new(stream_config(), p, Some(11), Box::new(opener))
        .expect("scheduler");
    scheduler.start(p).expect("start");
    (scheduler, probe)
}

fn assert_ring_accounted(scheduler: &StreamingScheduler) {
    let ring = scheduler.ring();
    assert_eq!(ring.free_count() + ring.in_flight_count(), NUM_BUFFERS);
}

#[test]
fn sine_refill_continues_phase_across_boundary() {
    let (mut scheduler, probe) = start(WaveKind::Sine, 440.0, 0.0);
    let initial = probe.take_submitted();
    assert_eq!(initial.len(), NUM_BUFFERS);

    // One tick interval of playback, then whatever blocks finished
    probe.drain_samples(stream_config().samples_per_tick() as usize);
    let played = probe.drain_blocks(2);
    assert_eq!(played, 2);
    let report = scheduler.tick().unwrap();
    assert_eq!(report.refilled, 2);
    assert_ring_accounted(&scheduler);

    let refilled = probe.take_submitted();
    assert_eq!(refilled.len(), 2);

    let boundary = (NUM_BUFFERS * BUFFER_SIZE) as u64;
    let last_initial = initial[NUM_BUFFERS - 1].1.last_sample();
    assert_eq!(
        last_initial,
        sine_sample(AMPLITUDE, 440.0, SAMPLE_RATE, boundary - 1)
    );
    assert_eq!(
        refilled[0].1.samples()[0],
        sine_sample(AMPLITUDE, 440.0, SAMPLE_RATE, boundary)
    );
    // Refilled slots are the reclaimed ones
    assert_eq!(refilled[0].0, initial[0].0);
    assert_eq!(refilled[1].0, initial[1].0);
    assert_eq!(scheduler.cursor().position(), boundary + 2 * BUFFER_SIZE as u64);
}

#[test]
fn streamed_blocks_equal_single_generation() {
    for kind in [WaveKind::Sine, WaveKind::Square, WaveKind::BinauralBeat] {
        let (mut scheduler, probe) = start(kind, 523.25, 6.0);
        for _ in 0..3 {
            probe.drain_blocks(NUM_BUFFERS);
            scheduler.tick().unwrap();
        }
        let streamed: Vec<i16> = probe
            .take_submitted()
            .into_iter()
            .flat_map(|(_, block)| block.into_samples())
            .collect();
        assert_eq!(streamed.len(), 4 * NUM_BUFFERS * BUFFER_SIZE);

        let mut rng = SmallRng::seed_from_u64(0);
        let whole = generate(
            &params(kind, 523.25, 6.0),
            PhaseCursor::START,
            streamed.len(),
            0,
            &mut rng,
        );
        assert_eq!(whole.block.samples(), &streamed[..], "{kind} diverged");
    }
}

#[test]
fn square_and_binaural_follow_formulas_after_refill() {
    let (mut scheduler, probe) = start(WaveKind::Square, 1000.0, 0.0);
    probe.take_submitted();
    probe.drain_blocks(1);
    scheduler.tick().unwrap();
    let block = probe.take_submitted().remove(0).1;
    let period = SAMPLE_RATE as f64 / 1000.0;
    let base = (NUM_BUFFERS * BUFFER_SIZE) as u64;
    for (i, &s) in block.samples().iter().enumerate().step_by(97) {
        assert_eq!(s, square_sample(AMPLITUDE, period, base + i as u64));
    }

    let (mut scheduler, probe) = start(WaveKind::BinauralBeat, 200.0, 10.0);
    probe.take_submitted();
    probe.drain_blocks(1);
    scheduler.tick().unwrap();
    let block = probe.take_submitted().remove(0).1;
    for (i, &s) in block.samples().iter().enumerate().step_by(101) {
        assert_eq!(
            s,
            binaural_sample(AMPLITUDE, 200.0, 210.0, SAMPLE_RATE, base + i as u64)
        );
    }
}

#[test]
fn underrun_recovers_without_intervention() {
    let (mut scheduler, probe) = start(WaveKind::PinkNoise, 440.0, 0.0);
    probe.force_underrun();
    assert!(!probe.is_playing());
    assert_eq!(scheduler.state(), SchedulerState::Playing);

    let report = scheduler.tick().unwrap();
    assert!(report.underrun);
    assert!(probe.is_playing());
    assert_eq!(probe.queued_blocks(), NUM_BUFFERS);
    assert_ring_accounted(&scheduler);

    // Playback carries on normally afterwards
    probe.drain_blocks(1);
    let report = scheduler.tick().unwrap();
    assert!(!report.underrun);
    assert_eq!(report.refilled, 1);
    assert_eq!(scheduler.stats().underruns, 1);
}

#[test]
fn missed_ticks_are_caught_up() {
    let (mut scheduler, probe) = start(WaveKind::Sine, 440.0, 0.0);
    // Several intervals pass without a tick; the device drains three blocks
    probe.drain_blocks(3);
    let report = scheduler.tick().unwrap();
    assert_eq!(report.refilled, 3);
    assert!(!report.underrun);
    assert_eq!(scheduler.ring().in_flight_count(), NUM_BUFFERS);
}

#[test]
fn stop_always_resets_cursor_and_frees_ring() {
    for kind in [
        WaveKind::Sine,
        WaveKind::Square,
        WaveKind::WhiteNoise,
        WaveKind::PinkNoise,
        WaveKind::BinauralBeat,
    ] {
        let (mut scheduler, probe) = start(kind, 440.0, 4.0);
        probe.drain_samples(BUFFER_SIZE + 17);
        scheduler.tick().unwrap();
        scheduler.stop().unwrap();

        assert_eq!(scheduler.cursor(), PhaseCursor::START);
        assert!(scheduler.ring().is_all_free());
        assert_eq!(probe.queued_blocks(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}

#[test]
fn ring_accounting_holds_through_many_ticks() {
    let (mut scheduler, probe) = start(WaveKind::WhiteNoise, 440.0, 0.0);
    for step in 0..50usize {
        assert_ring_accounted(&scheduler);
        probe.drain_samples(700 + (step * 131) % 3000);
        scheduler.tick().unwrap();
        assert_ring_accounted(&scheduler);
    }
    assert_eq!(scheduler.ring().in_flight_count(), NUM_BUFFERS);
}

#[test]
fn repeated_sink_failure_escalates_and_stops() {
    let (mut scheduler, probe) = start(WaveKind::Sine, 440.0, 0.0);
    probe.drain_blocks(1);
    probe.fail_next_calls(2);
    let err = scheduler.tick().unwrap_err();
    assert!(matches!(err, ToneError::SinkError(_)));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(scheduler.ring().is_all_free());

    // Later ticks are harmless no-ops
    assert_eq!(scheduler.tick().unwrap().refilled, 0);
}

#[test]
fn preserve_phase_change_joins_without_reset() {
    let (mut scheduler, probe) = start(WaveKind::Sine, 440.0, 0.0);
    probe.take_submitted();
    probe.drain_blocks(1);
    scheduler
        .apply_parameters(params(WaveKind::Sine, 1000.0, 0.0), ChangePolicy::PreservePhase)
        .unwrap();
    scheduler.tick().unwrap();

    let block = probe.take_submitted().remove(0).1;
    let boundary = (NUM_BUFFERS * BUFFER_SIZE) as u64;
    assert_eq!(
        block.samples()[0],
        sine_sample(AMPLITUDE, 1000.0, SAMPLE_RATE, boundary)
    );
}
