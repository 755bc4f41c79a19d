//! Playback of a pipeline's frame queue on the default CPAL output device

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use dasp_sample::FromSample;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::AudioPipeline;
use crate::status::PipelineStatus;

/// How long the feeder sleeps when the queue is empty or the ring is full
const FEED_INTERVAL: Duration = Duration::from_millis(5);

/// Drains an [`AudioPipeline`] into the default output device.
///
/// Two threads run while playing: the CPAL stream lives on its own thread
/// (streams are not `Send` on every platform), and a feeder thread pops
/// frames, converts them to f32 and pushes them into a ring buffer the
/// stream callback reads from.
pub struct CpalPlayback {
    running: Arc<AtomicBool>,
    samples_consumed: Arc<AtomicUsize>,
    had_underrun: Arc<AtomicBool>,
    stream_thread: Option<JoinHandle<()>>,
    feeder: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    /// Start playing `pipeline` at `sample_rate` on the default output device.
    pub fn start(pipeline: Arc<AudioPipeline>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PipelineError::Device("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| PipelineError::Device(e.to_string()))?;

        let sample_format = supported.sample_format();
        let mut stream_config = supported.config();
        stream_config.sample_rate = cpal::SampleRate(sample_rate);
        let channels = stream_config.channels as usize;

        info!(
            "Playing on {} ({} Hz, {} channels, {:?})",
            device.name().unwrap_or_else(|_| "Unknown".into()),
            sample_rate,
            channels,
            sample_format
        );

        // Ring buffer sized for ~100ms of audio to handle scheduling jitter
        let buffer_samples = ((sample_rate as f32 * 0.1) as usize) * channels;
        let (producer, consumer) = RingBuffer::<f32>::new(buffer_samples.next_power_of_two().max(8192));

        let running = Arc::new(AtomicBool::new(true));
        let samples_consumed = Arc::new(AtomicUsize::new(0));
        let had_underrun = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel();
        let stream_thread = {
            let running = running.clone();
            let samples_consumed = samples_consumed.clone();
            let had_underrun = had_underrun.clone();
            thread::spawn(move || {
                let stream = match build_stream(
                    &device,
                    sample_format,
                    &stream_config,
                    consumer,
                    samples_consumed,
                    had_underrun,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until stopped
                while running.load(Ordering::Acquire) {
                    thread::park_timeout(Duration::from_millis(100));
                }
                debug!("Output stream closed");
            })
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PipelineError::Device(e)),
            Err(_) => return Err(PipelineError::Device("output stream thread exited".into())),
        }

        let feeder = {
            let running = running.clone();
            thread::spawn(move || feed(pipeline, producer, channels, running))
        };

        Ok(Self {
            running,
            samples_consumed,
            had_underrun,
            stream_thread: Some(stream_thread),
            feeder: Some(feeder),
        })
    }

    /// Returns how many samples have been played
    #[inline]
    pub fn samples_consumed(&self) -> usize {
        self.samples_consumed.load(Ordering::Relaxed)
    }

    /// Check and clear the underrun flag
    pub fn check_underrun(&self) -> bool {
        self.had_underrun.swap(false, Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop playback and join both threads.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                error!("Playback feeder panicked");
            }
        }
        if let Some(stream) = self.stream_thread.take() {
            stream.thread().unpark();
            if stream.join().is_err() {
                error!("Output stream thread panicked");
            }
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pop frames, convert them to f32 and push them to the device ring.
fn feed(pipeline: Arc<AudioPipeline>, mut producer: Producer<f32>, channels: usize, running: Arc<AtomicBool>) {
    let format = pipeline.config().output_sample_format;
    let bytes_per_sample = format.bytes_per_sample();
    let mut samples = Vec::new();

    while running.load(Ordering::Acquire) {
        let frame = match pipeline.pop_frame() {
            Some(frame) => frame,
            None => {
                if pipeline.status() == PipelineStatus::Ended {
                    debug!("Pipeline ended, playback feeder done");
                    break;
                }
                thread::sleep(FEED_INTERVAL);
                continue;
            }
        };

        samples.clear();
        let read = pipeline.with_frame_data(&frame, |data| {
            for stereo in data.chunks_exact(bytes_per_sample * 2) {
                let left = format.read_sample(stereo);
                let right = format.read_sample(&stereo[bytes_per_sample..]);
                samples.extend((0..channels).map(|ch| if ch % 2 == 0 { left } else { right }));
            }
        });
        if let Err(e) = read {
            warn!("Skipping frame at {}: {}", frame.timestamp, e);
            continue;
        }

        let mut pending = &samples[..];
        while !pending.is_empty() && running.load(Ordering::Acquire) {
            let n = producer.slots().min(pending.len());
            if n == 0 {
                thread::sleep(FEED_INTERVAL);
                continue;
            }
            for &s in &pending[..n] {
                let _ = producer.push(s);
            }
            pending = &pending[n..];
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    consumer: Consumer<f32>,
    samples_consumed: Arc<AtomicUsize>,
    had_underrun: Arc<AtomicBool>,
) -> std::result::Result<cpal::Stream, String> {
    let counters = (samples_consumed, had_underrun);
    match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, stream_config, consumer, counters),
        SampleFormat::F64 => build_typed::<f64>(device, stream_config, consumer, counters),
        SampleFormat::I8 => build_typed::<i8>(device, stream_config, consumer, counters),
        SampleFormat::I16 => build_typed::<i16>(device, stream_config, consumer, counters),
        SampleFormat::I32 => build_typed::<i32>(device, stream_config, consumer, counters),
        SampleFormat::U8 => build_typed::<u8>(device, stream_config, consumer, counters),
        SampleFormat::U16 => build_typed::<u16>(device, stream_config, consumer, counters),
        SampleFormat::U32 => build_typed::<u32>(device, stream_config, consumer, counters),
        other => Err(format!("unsupported device sample format {:?}", other)),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    (samples_consumed, had_underrun): (Arc<AtomicUsize>, Arc<AtomicBool>),
) -> std::result::Result<cpal::Stream, String>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _| {
                if fill(data, &mut consumer) {
                    had_underrun.store(true, Ordering::Relaxed);
                }
                samples_consumed.fetch_add(data.len(), Ordering::Relaxed);
            },
            |err: cpal::StreamError| error!("CPAL stream error: {:?}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Fill a device buffer from the ring, padding with silence.
///
/// Returns whether the ring ran dry.
fn fill<T: FromSample<f32>>(data: &mut [T], consumer: &mut Consumer<f32>) -> bool {
    let mut underrun = false;
    for sample in data.iter_mut() {
        let s = consumer.pop().unwrap_or_else(|_| {
            underrun = true;
            0.0
        });
        *sample = T::from_sample_(s.clamp(-1.0, 1.0));
    }
    underrun
}
