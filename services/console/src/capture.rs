//! Microphone capture pipeline.
//!
//! The cpal input callback runs on a realtime audio thread and must not
//! block or allocate more than necessary, so it only pushes raw samples into
//! a lock-free ring buffer. An async drain task pulls from the buffer,
//! downmixes to mono, resamples to the canonical 16 kHz rate, and ships
//! base64 PCM16 frames to the relay writer.

use crate::protocol::ClientCommand;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info};
use voicebridge_audio::{
    CANONICAL_SAMPLE_RATE, encode_i16_base64, float_to_i16, i16_to_float, resample_linear,
};

/// About four seconds of headroom at 48 kHz mono before samples are lost.
const RING_CAPACITY: usize = 1 << 18;
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

type Ready = Result<(u32, u16)>;

/// Handle over a running capture. Dropping it stops the pipeline; calling
/// [`CapturePipeline::stop`] additionally waits until the last frame is out,
/// so no audio is sent after `stop` returns.
pub struct CapturePipeline {
    active: Arc<AtomicBool>,
    drain: Option<tokio::task::JoinHandle<()>>,
    device_thread: Option<thread::JoinHandle<()>>,
}

impl CapturePipeline {
    /// Opens the default input device and starts streaming audio frames to
    /// `out`. Returns once the device is up, or the device error if it is
    /// not.
    pub fn start(out: Sender<String>) -> Result<Self> {
        let active = Arc::new(AtomicBool::new(true));
        let (prod, cons) = HeapRb::<f32>::new(RING_CAPACITY).split();

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Ready>();
        let thread_active = Arc::clone(&active);
        let device_thread = thread::spawn(move || run_device(prod, thread_active, ready_tx));
        let (sample_rate, channels) = ready_rx
            .recv()
            .context("capture thread exited before reporting readiness")??;
        info!(sample_rate, channels, "Microphone capture started");

        let drain = tokio::spawn(drain_loop(
            cons,
            Arc::clone(&active),
            out,
            sample_rate,
            channels,
        ));
        Ok(Self {
            active,
            drain: Some(drain),
            device_thread: Some(device_thread),
        })
    }

    /// Stops capture and waits for the drain task to finish, after which no
    /// further audio frames can be sent.
    pub async fn stop(mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(drain) = self.drain.take() {
            let _ = drain.await;
        }
        if let Some(handle) = self.device_thread.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = handle.join();
            })
            .await;
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

/// Owns the cpal stream for its whole lifetime. cpal streams are not `Send`,
/// so construction and teardown both happen here.
fn run_device(
    mut prod: HeapProd<f32>,
    active: Arc<AtomicBool>,
    ready: std::sync::mpsc::Sender<Ready>,
) {
    let built = (|| -> Result<(cpal::Stream, u32, u16)> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("no default input device")?;
        let config = device
            .default_input_config()
            .context("no default input config")?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let err_fn = |e| error!(error = %e, "Input stream error");

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &_| {
                    // On overflow the newest samples are lost; the drain
                    // task logs nothing here to keep the callback realtime.
                    let _ = prod.push_slice(data);
                },
                err_fn,
                None,
            )?,
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _: &_| {
                    let floats = i16_to_float(data);
                    let _ = prod.push_slice(&floats);
                },
                err_fn,
                None,
            )?,
            other => anyhow::bail!("unsupported input sample format {other:?}"),
        };
        stream.play()?;
        Ok((stream, sample_rate, channels))
    })();

    match built {
        Ok((stream, sample_rate, channels)) => {
            let _ = ready.send(Ok((sample_rate, channels)));
            while active.load(Ordering::SeqCst) {
                thread::park_timeout(Duration::from_millis(100));
            }
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

async fn drain_loop(
    mut cons: HeapCons<f32>,
    active: Arc<AtomicBool>,
    out: Sender<String>,
    device_rate: u32,
    channels: u16,
) {
    let mut interval = tokio::time::interval(DRAIN_INTERVAL);
    let mut scratch = vec![0.0f32; 8192];

    loop {
        interval.tick().await;
        let stopping = !active.load(Ordering::SeqCst);

        let mut frame: Vec<f32> = Vec::new();
        loop {
            let n = cons.pop_slice(&mut scratch);
            if n == 0 {
                break;
            }
            frame.extend_from_slice(&scratch[..n]);
        }

        // A tail caught after stop is discarded rather than raced out.
        if stopping {
            break;
        }
        if frame.is_empty() {
            continue;
        }

        let mono = downmix(&frame, channels);
        let resampled = resample_linear(&mono, device_rate, CANONICAL_SAMPLE_RATE);
        let pcm = float_to_i16(&resampled);
        let msg = ClientCommand::UserAudioChunk {
            data: encode_i16_base64(&pcm),
        }
        .to_json();
        if out.send(msg).await.is_err() {
            debug!("Relay writer gone; stopping capture drain");
            break;
        }
    }
}

/// Averages interleaved frames down to mono.
fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let ch = channels as usize;
    interleaved
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}
