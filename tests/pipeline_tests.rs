use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dasp_sample::Sample;
use dasp_signal::{self as signal, Signal};
use pcmflow::{
    AudioPipeline, ChannelLayout, FilterRegistry, FilterSpec, PipelineConfig, PipelineError, PipelineStatus, RawFrame,
    SampleFormat, StreamInfo,
};

const RATE: u32 = 8000;
const FRAME_SAMPLES: usize = 160;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn stream() -> StreamInfo {
    StreamInfo::new(RATE, ChannelLayout::Stereo, SampleFormat::S16)
}

fn pipeline(config: PipelineConfig) -> AudioPipeline {
    init_tracing();
    AudioPipeline::new(config, Arc::new(FilterRegistry::default())).unwrap()
}

fn config(max_audio_frames: usize) -> PipelineConfig {
    PipelineConfig {
        max_audio_frames,
        poll_interval_ms: 1,
        ..PipelineConfig::default()
    }
}

/// Stereo s16 frames of a 440 Hz sine at half scale.
fn sine_frames(count: usize, nb_samples: usize) -> Vec<RawFrame> {
    let mut sine = signal::rate(RATE as f64).const_hz(440.0).sine();
    (0..count)
        .map(|i| {
            let mut data = Vec::with_capacity(nb_samples * 4);
            for _ in 0..nb_samples {
                let s = (sine.next() * 0.5).to_sample::<i16>().to_le_bytes();
                data.extend_from_slice(&s);
                data.extend_from_slice(&s);
            }
            RawFrame::packed(data, nb_samples, Some((i * nb_samples) as i64))
        })
        .collect()
}

fn decode_s16(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}

fn drain_all(pipeline: &AudioPipeline) -> Vec<Vec<u8>> {
    std::iter::from_fn(|| pipeline.pop_frame())
        .map(|frame| pipeline.read_frame(&frame).unwrap())
        .collect()
}

fn wait_for(pipeline: &AudioPipeline, status: PipelineStatus) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if pipeline.status() == status {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn build_then_dispose_twice() {
    let pipeline = pipeline(config(10));
    pipeline.open(stream()).unwrap();
    for frame in sine_frames(3, FRAME_SAMPLES) {
        pipeline.ingest(Some(frame));
    }
    assert!(pipeline.is_built());
    assert_eq!(pipeline.queued_frames(), 3);

    pipeline.dispose();
    assert!(!pipeline.is_built());
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    assert_eq!(pipeline.queued_frames(), 0);
    assert_eq!(pipeline.buffer_capacity(), 0);
    assert!(pipeline.chain().is_empty());

    pipeline.dispose();
    assert!(!pipeline.is_built());
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
}

#[test]
fn identity_round_trip() {
    let pipeline = pipeline(config(64));
    pipeline.open(stream()).unwrap();

    let input = sine_frames(20, FRAME_SAMPLES);
    let expected: Vec<i16> = input.iter().flat_map(|f| decode_s16(&f.planes[0])).collect();

    for frame in input {
        pipeline.ingest(Some(frame));
    }
    pipeline.ingest(None);
    assert_eq!(pipeline.status(), PipelineStatus::Ended);

    let mut timestamps = Vec::new();
    let mut output = Vec::new();
    while let Some(frame) = pipeline.pop_frame() {
        timestamps.push(frame.timestamp);
        output.extend(decode_s16(&pipeline.read_frame(&frame).unwrap()));
    }

    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(timestamps[1], 200_000); // 160 samples at 8 kHz = 20ms
    assert_eq!(output.len() * 2, 20 * FRAME_SAMPLES * 4);
    for (out, exp) in output.iter().zip(expected.iter()) {
        assert!((out - exp).abs() <= 1, "{} != {}", out, exp);
    }
}

#[test]
fn invalid_user_filter_is_skipped() {
    let reference = pipeline(config(64).with_filters(vec![FilterSpec::new("volume", "0.5")]));
    let skipping = pipeline(config(64).with_filters(vec![
        FilterSpec::new("reverb", "room=large"),
        FilterSpec::new("volume", "0.5"),
        FilterSpec::new("volume", "gain=2").with_id("broken"),
    ]));

    reference.open(stream()).unwrap();
    skipping.open(stream()).unwrap();
    assert_eq!(reference.chain(), skipping.chain());

    for (a, b) in sine_frames(5, FRAME_SAMPLES).into_iter().zip(sine_frames(5, FRAME_SAMPLES)) {
        reference.ingest(Some(a));
        skipping.ingest(Some(b));
    }
    assert_eq!(drain_all(&reference), drain_all(&skipping));
}

#[test]
fn speeding_up_rewrites_queued_frames() {
    let pipeline = pipeline(config(10));
    pipeline.open(stream()).unwrap();
    for frame in sine_frames(5, FRAME_SAMPLES) {
        pipeline.ingest(Some(frame));
    }

    pipeline.set_speed(2.0).unwrap();
    assert_eq!(pipeline.speed(), 2.0);

    let mut count = 0;
    while let Some(frame) = pipeline.pop_frame() {
        assert_eq!(frame.len, pcmflow::align(FRAME_SAMPLES * 4 / 2, 4));
        assert!(frame.offset + frame.len <= pipeline.buffer_capacity());
        assert!(pipeline.read_frame(&frame).is_ok());
        count += 1;
    }
    assert_eq!(count, 5);
}

#[test]
fn slowing_down_relocates_and_silences() {
    let pipeline = pipeline(PipelineConfig {
        buffer_slots: Some(2),
        ..config(10)
    });
    pipeline.open(stream()).unwrap();
    for frame in sine_frames(2, 100) {
        pipeline.ingest(Some(frame));
    }
    // 2 x (400 + 80)
    assert_eq!(pipeline.buffer_capacity(), 960);

    pipeline.set_speed(0.5).unwrap();

    let first = pipeline.pop_frame().unwrap();
    let second = pipeline.pop_frame().unwrap();
    assert_eq!((first.offset, first.len), (0, 800));
    // 400 + 800 would overrun the buffer
    assert_eq!((second.offset, second.len), (0, 800));
    assert!(pipeline.read_frame(&second).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn speed_change_reaches_new_output() {
    let pipeline = pipeline(config(64));
    pipeline.open(stream()).unwrap();
    pipeline.set_speed(2.0).unwrap();

    for frame in sine_frames(50, FRAME_SAMPLES) {
        pipeline.ingest(Some(frame));
    }
    pipeline.ingest(None);
    assert_eq!(pipeline.status(), PipelineStatus::Ended);

    let mut timestamps = Vec::new();
    let mut bytes = 0;
    while let Some(frame) = pipeline.pop_frame() {
        timestamps.push(frame.timestamp);
        bytes += frame.len;
    }
    // half the samples, same presentation span
    let samples = (bytes / 4) as i64;
    assert!((samples - 50 * FRAME_SAMPLES as i64 / 2).abs() <= 2, "{} samples", samples);
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn many_speed_changes_before_input() {
    let pipeline = pipeline(config(64));
    pipeline.open(stream()).unwrap();

    for i in 0..70 {
        let speed = if i % 2 == 0 { 1.5 } else { 1.25 };
        assert!(pipeline.set_speed(speed).is_ok(), "change {}", i);
    }
    pipeline.set_speed(2.0).unwrap();

    for frame in sine_frames(10, 800) {
        pipeline.ingest(Some(frame));
    }
    pipeline.ingest(None);
    assert_eq!(pipeline.status(), PipelineStatus::Ended);

    let bytes: usize = drain_all(&pipeline).iter().map(Vec::len).sum();
    let samples = (bytes / 4) as i64;
    assert!((samples - 4000).abs() <= 2, "{} samples", samples);
}

#[test]
fn speed_change_while_producer_waits() {
    let pipeline = Arc::new(pipeline(config(4)));
    pipeline.open(stream()).unwrap();

    let worker = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            for frame in sine_frames(40, FRAME_SAMPLES) {
                pipeline.ingest(Some(frame));
            }
            pipeline.ingest(None);
        })
    };

    assert!(wait_for(&pipeline, PipelineStatus::QueueFull));
    assert_eq!(pipeline.queued_frames(), 4);

    pipeline.set_speed(2.0).unwrap();
    for _ in 0..4 {
        let frame = pipeline.pop_frame().unwrap();
        assert_eq!(frame.len, pcmflow::align(FRAME_SAMPLES * 4 / 2, 4));
    }

    // The producer blocks again under the normal threshold
    let deadline = Instant::now() + Duration::from_secs(5);
    while !(pipeline.status() == PipelineStatus::QueueFull && pipeline.queued_frames() >= 4) {
        assert!(Instant::now() < deadline, "producer never blocked again");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(pipeline.queued_frames() < 4 * PipelineConfig::default().speed_transition_multiplier);

    let mut bytes = 4 * FRAME_SAMPLES * 2;
    loop {
        match pipeline.pop_frame() {
            Some(frame) => bytes += pipeline.read_frame(&frame).unwrap().len(),
            None if pipeline.status() == PipelineStatus::Ended => break,
            None => {
                assert!(Instant::now() < deadline, "producer never finished");
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
    worker.join().unwrap();

    // Every input sample played at double speed
    let samples = (bytes / 4) as i64;
    assert!((samples - 40 * FRAME_SAMPLES as i64 / 2).abs() <= 2, "{} samples", samples);
}

#[test]
fn backpressure_pauses_and_resumes() {
    let pipeline = Arc::new(pipeline(config(16)));
    pipeline.open(stream()).unwrap();

    let worker = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            for frame in sine_frames(16, FRAME_SAMPLES) {
                pipeline.ingest(Some(frame));
            }
        })
    };

    assert!(wait_for(&pipeline, PipelineStatus::QueueFull));
    assert_eq!(pipeline.queued_frames(), 16);

    let frame = pipeline.pop_frame().unwrap();
    assert!(pipeline.read_frame(&frame).is_ok());
    worker.join().unwrap();

    assert_eq!(pipeline.status(), PipelineStatus::Running);
    assert_eq!(pipeline.queued_frames(), 15);

    pipeline.ingest(None);
    assert_eq!(pipeline.status(), PipelineStatus::Ended);
}

#[test]
fn dispose_releases_a_blocked_producer() {
    let pipeline = Arc::new(pipeline(config(4)));
    pipeline.open(stream()).unwrap();

    let worker = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            for frame in sine_frames(8, FRAME_SAMPLES) {
                pipeline.ingest(Some(frame));
            }
        })
    };

    assert!(wait_for(&pipeline, PipelineStatus::QueueFull));
    pipeline.dispose();
    worker.join().unwrap();

    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    assert_eq!(pipeline.queued_frames(), 0);
}

#[test]
fn consumer_thread_drains_everything() {
    let pipeline = Arc::new(pipeline(config(4)));
    pipeline.open(stream()).unwrap();

    let consumer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            let mut bytes = 0;
            loop {
                match pipeline.pop_frame() {
                    Some(frame) => bytes += pipeline.read_frame(&frame).map(|d| d.len()).unwrap_or(0),
                    None if pipeline.status() == PipelineStatus::Ended => break bytes,
                    None => thread::sleep(Duration::from_millis(1)),
                }
            }
        })
    };

    for frame in sine_frames(40, FRAME_SAMPLES) {
        pipeline.ingest(Some(frame));
    }
    pipeline.ingest(None);

    assert_eq!(consumer.join().unwrap(), 40 * FRAME_SAMPLES * 4);
}

#[test]
fn rejected_input_stops_the_pipeline() {
    let pipeline = pipeline(config(10));
    pipeline.open(stream()).unwrap();

    // 10 samples announced, 2 delivered
    pipeline.ingest(Some(RawFrame::packed(vec![0; 8], 10, Some(0))));
    assert_eq!(pipeline.status(), PipelineStatus::Stopping);

    for frame in sine_frames(2, FRAME_SAMPLES) {
        pipeline.ingest(Some(frame));
    }
    assert_eq!(pipeline.queued_frames(), 0);

    pipeline.restart().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Running);
    for frame in sine_frames(2, FRAME_SAMPLES) {
        pipeline.ingest(Some(frame));
    }
    assert_eq!(pipeline.queued_frames(), 2);
}

#[test]
fn frames_overwritten_by_a_wrap_are_stale() {
    let pipeline = pipeline(PipelineConfig {
        buffer_slots: Some(2),
        ..config(10)
    });
    pipeline.open(stream()).unwrap();
    for frame in sine_frames(3, 100) {
        pipeline.ingest(Some(frame));
    }

    let a = pipeline.pop_frame().unwrap();
    let b = pipeline.pop_frame().unwrap();
    let c = pipeline.pop_frame().unwrap();
    assert_eq!((a.offset, b.offset, c.offset), (0, 400, 0));

    assert!(matches!(pipeline.read_frame(&a), Err(PipelineError::StaleFrame)));
    assert!(pipeline.read_frame(&b).is_ok());
    assert!(pipeline.read_frame(&c).is_ok());
}

#[test]
fn larger_frames_grow_the_buffer() {
    let pipeline = pipeline(config(10));
    pipeline.open(stream()).unwrap();

    let small = sine_frames(2, 100);
    let small_bytes = small[0].planes[0].clone();
    for frame in small {
        pipeline.ingest(Some(frame));
    }
    let capacity = pipeline.buffer_capacity();

    pipeline.ingest(Some(RawFrame::packed(vec![0; 4000], 1000, Some(200))));
    assert!(pipeline.buffer_capacity() > capacity);
    assert!(pipeline.buffer_capacity() >= 4000);

    let first = pipeline.pop_frame().unwrap();
    assert_eq!(first.offset, 0);
    let data = pipeline.read_frame(&first).unwrap();
    assert_eq!(decode_s16(&data).len(), decode_s16(&small_bytes).len());

    let second = pipeline.pop_frame().unwrap();
    let third = pipeline.pop_frame().unwrap();
    assert!(pipeline.read_frame(&second).is_ok());
    assert_eq!(third.offset, 800);
    assert_eq!(third.len, 4000);
}

#[test]
fn reload_replaces_user_filters() {
    let pipeline = pipeline(config(10));
    pipeline.open(stream()).unwrap();
    for frame in sine_frames(2, FRAME_SAMPLES) {
        pipeline.ingest(Some(frame));
    }

    pipeline
        .reload_filters(vec![FilterSpec::new("lowpass", "f=1000").with_id("lp")])
        .unwrap();
    assert_eq!(pipeline.chain(), vec!["abuffer", "lp", "atempo", "abuffersink"]);
    assert_eq!(pipeline.queued_frames(), 2);

    assert!(pipeline.update_filter("lp", "f", "1500").is_ok());
    assert!(pipeline.update_filter("lp", "f", "9000").is_err());
}

#[test]
fn reload_needs_filter_support() {
    init_tracing();
    let pipeline = AudioPipeline::new(config(10), Arc::new(FilterRegistry::empty())).unwrap();
    assert!(pipeline.open(stream()).is_err());
    assert!(matches!(
        pipeline.reload_filters(vec![]),
        Err(PipelineError::FiltersUnavailable)
    ));
}
