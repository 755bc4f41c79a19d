//! Change playback speed while a sine tone is streaming
//!
//! Run with: cargo run --example speed_change
//! Or, to hear it: cargo run --example speed_change --features cpal_sink

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dasp_sample::Sample;
use dasp_signal::{self as signal, Signal};
use tracing_subscriber::EnvFilter;

use pcmflow::{
    AudioPipeline, ChannelLayout, FilterRegistry, FilterSpec, PipelineConfig, PipelineStatus, RawFrame, SampleFormat,
    StreamInfo,
};

const RATE: u32 = 48000;
const FRAME: usize = 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PipelineConfig::default().with_filters(vec![
        FilterSpec::new("volume", "-6dB"),
        FilterSpec::new("lowpass", "f=4000").with_id("lp"),
    ]);
    let pipeline = Arc::new(AudioPipeline::new(config, Arc::new(FilterRegistry::default()))?);
    pipeline.open(StreamInfo::new(RATE, ChannelLayout::Stereo, SampleFormat::S16))?;

    // decoder stand-in: 6 seconds of 440 Hz
    let worker = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            let mut sine = signal::rate(RATE as f64).const_hz(440.0).sine();
            for i in 0..(6 * RATE as usize / FRAME) {
                let mut data = Vec::with_capacity(FRAME * 4);
                for _ in 0..FRAME {
                    let s = (sine.next() * 0.5).to_sample::<i16>().to_le_bytes();
                    data.extend_from_slice(&s);
                    data.extend_from_slice(&s);
                }
                pipeline.ingest(Some(RawFrame::packed(data, FRAME, Some((i * FRAME) as i64))));
                if pipeline.status() == PipelineStatus::Stopping {
                    return;
                }
            }
            pipeline.ingest(None);
        })
    };

    #[cfg(feature = "cpal_sink")]
    let mut playback = pcmflow::CpalPlayback::start(pipeline.clone(), RATE)?;
    #[cfg(not(feature = "cpal_sink"))]
    let consumer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || consume(&pipeline))
    };

    thread::sleep(Duration::from_secs(1));
    println!("speed -> 1.5");
    pipeline.set_speed(1.5)?;

    thread::sleep(Duration::from_secs(1));
    println!("speed -> 0.75, lowpass at 1 kHz");
    pipeline.set_speed(0.75)?;
    pipeline.update_filter("lp", "f", "1000")?;

    worker.join().map_err(|_| "worker panicked")?;

    #[cfg(feature = "cpal_sink")]
    {
        while pipeline.queued_frames() > 0 {
            thread::sleep(Duration::from_millis(50));
        }
        if playback.check_underrun() {
            println!("(underruns occurred)");
        }
        println!("played {} samples", playback.samples_consumed());
        playback.stop();
    }
    #[cfg(not(feature = "cpal_sink"))]
    consumer.join().map_err(|_| "consumer panicked")?;

    println!("final status: {}", pipeline.status());
    pipeline.dispose();
    Ok(())
}

/// Pop frames at roughly real time and print their timestamps.
#[cfg(not(feature = "cpal_sink"))]
fn consume(pipeline: &AudioPipeline) {
    loop {
        match pipeline.pop_frame() {
            Some(frame) => {
                println!(
                    "{:>9.3}s  {:>5} bytes  [{}]",
                    frame.timestamp as f64 / pcmflow::TICKS_PER_SECOND as f64,
                    frame.len,
                    pipeline.status()
                );
                let millis = (frame.len / pipeline.frame_bytes()) as u64 * 1000 / RATE as u64;
                thread::sleep(Duration::from_millis(millis));
            }
            None if pipeline.status() == PipelineStatus::Ended => break,
            None => thread::sleep(Duration::from_millis(5)),
        }
    }
}
