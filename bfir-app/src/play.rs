//! Real-time playback through the filter
//!
//! The main thread filters blocks and feeds a lock-free ring; the audio
//! thread owns the cpal stream and drains the ring in its callback.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};

use bfir_engine::SampleFormat;
use bfir_io::{resample, sound, Settings};

use crate::{plan_filter, ChainArgs, CHUNK_FRAMES};

/// Samples buffered between the filter and the device
const RING_CAPACITY: usize = 1 << 17;

enum PlayerCommand {
    Stop,
}

enum PlayerEvent {
    Ready { sample_rate: u32, channels: usize },
    Error(String),
}

pub fn run(settings: &Settings, args: &ChainArgs, input: &Path) -> anyhow::Result<()> {
    let buffer = sound::load(input).with_context(|| format!("failed to load {}", input.display()))?;

    let (cmd_tx, cmd_rx) = bounded(16);
    let (evt_tx, evt_rx) = bounded(16);
    let (mut producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_audio = shutdown.clone();
    let underruns = Arc::new(AtomicU64::new(0));
    let underruns_audio = underruns.clone();

    let audio_handle = thread::spawn(move || {
        run_audio_thread(consumer, cmd_rx, evt_tx, shutdown_audio, underruns_audio);
    });

    let result = feed(settings, args, &buffer, &mut producer, &evt_rx);

    // Let the device drain what is already queued
    while result.is_ok() && !producer.is_empty() && !shutdown.load(Ordering::Relaxed) {
        if let Ok(PlayerEvent::Error(e)) = evt_rx.try_recv() {
            tracing::error!("{}", e);
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    let _ = cmd_tx.send(PlayerCommand::Stop);
    shutdown.store(true, Ordering::SeqCst);
    let _ = audio_handle.join();

    let dropouts = underruns.load(Ordering::Relaxed);
    if dropouts > 0 {
        tracing::warn!("{} callbacks ran short of samples", dropouts);
    }
    result
}

fn feed(
    settings: &Settings,
    args: &ChainArgs,
    buffer: &sound::SoundBuffer,
    producer: &mut impl Producer<Item = f32>,
    evt_rx: &Receiver<PlayerEvent>,
) -> anyhow::Result<()> {
    let (device_rate, device_channels) = match evt_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(PlayerEvent::Ready {
            sample_rate,
            channels,
        }) => (sample_rate, channels),
        Ok(PlayerEvent::Error(e)) => return Err(anyhow!(e)),
        Err(_) => return Err(anyhow!("audio device did not start")),
    };

    let channels = buffer.channels;
    let samples = resample(&buffer.samples, channels, buffer.sample_rate, device_rate)?;
    let plan = plan_filter(settings, args, channels, device_rate)?;
    let config = plan.config(channels, SampleFormat::F32Le, device_rate);
    let mut stream = plan.stream(&config)?;

    tracing::info!(
        "Playing {} Hz input at {} Hz, {} -> {} channels",
        buffer.sample_rate,
        device_rate,
        channels,
        device_channels
    );

    let mut mapped = Vec::new();
    for chunk in samples.chunks(CHUNK_FRAMES * channels) {
        let raw = stream.process(chunk)?;
        push_frames(&raw, channels, device_channels, &mut mapped, producer, evt_rx)?;
    }
    let raw = stream.finish(plan.tail_frames)?;
    push_frames(&raw, channels, device_channels, &mut mapped, producer, evt_rx)?;

    println!("{}", stream.report());
    Ok(())
}

/// Map filter output onto the device channels and queue it, waiting for room
fn push_frames(
    raw: &[u8],
    channels: usize,
    device_channels: usize,
    mapped: &mut Vec<f32>,
    producer: &mut impl Producer<Item = f32>,
    evt_rx: &Receiver<PlayerEvent>,
) -> anyhow::Result<()> {
    mapped.clear();
    for frame in raw.chunks_exact(4 * channels) {
        for ch in 0..device_channels {
            let at = (ch % channels) * 4;
            mapped.push(f32::from_le_bytes([
                frame[at],
                frame[at + 1],
                frame[at + 2],
                frame[at + 3],
            ]));
        }
    }

    let mut pending = mapped.as_slice();
    while !pending.is_empty() {
        let pushed = producer.push_slice(pending);
        pending = &pending[pushed..];
        if pushed == 0 {
            if let Ok(PlayerEvent::Error(e)) = evt_rx.try_recv() {
                return Err(anyhow!(e));
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
    Ok(())
}

fn run_audio_thread(
    mut consumer: HeapCons<f32>,
    cmd_rx: Receiver<PlayerCommand>,
    evt_tx: Sender<PlayerEvent>,
    shutdown: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = evt_tx.send(PlayerEvent::Error("No audio output device found".into()));
            return;
        }
    };

    let config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = evt_tx.send(PlayerEvent::Error(format!(
                "Failed to get audio config: {}",
                e
            )));
            return;
        }
    };

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    // Shortfalls before the first samples arrive are not dropouts
    let mut primed = false;
    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let read = consumer.pop_slice(data);
            primed |= read > 0;
            if read < data.len() {
                data[read..].fill(0.0);
                if primed {
                    underruns.fetch_add(1, Ordering::Relaxed);
                }
            }
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = evt_tx.send(PlayerEvent::Error(format!(
                "Failed to create audio stream: {}",
                e
            )));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = evt_tx.send(PlayerEvent::Error(format!("Failed to start audio: {}", e)));
        return;
    }
    let _ = evt_tx.send(PlayerEvent::Ready {
        sample_rate,
        channels,
    });

    while !shutdown.load(Ordering::Relaxed) {
        match cmd_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(PlayerCommand::Stop) => break,
            Err(_) => {}
        }
    }
}
