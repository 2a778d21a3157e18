use std::sync::mpsc as std_mpsc;
use std::thread;

use anyhow::{Context, bail};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{AudioCapture, AudioSource, AudioSpec, CaptureHandle};

/// How many captured frames may queue before the audio callback starts
/// dropping them.
const FRAME_QUEUE: usize = 32;

/// Microphone capture through the system's default input device.
///
/// `cpal::Stream` is not `Send`, so each capture runs on a dedicated
/// thread that builds, owns, and finally drops the stream. Frames are
/// downmixed to mono PCM16 and handed over a bounded channel; the
/// reported sample rate is the device's actual rate, which may differ
/// from the requested one.
#[derive(Debug, Default)]
pub struct CpalAudioSource;

#[async_trait]
impl AudioSource for CpalAudioSource {
    async fn open(&self, spec: AudioSpec) -> anyhow::Result<AudioCapture> {
        let (rate_tx, rate_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("hearsay-capture".to_string())
            .spawn(move || run_capture(rate_tx, frame_tx, stop_rx))
            .context("spawning capture thread")?;

        let sample_rate = match rate_rx.await {
            Ok(result) => result?,
            Err(_) => bail!("capture thread exited before opening the device"),
        };
        if sample_rate != spec.sample_rate {
            debug!(
                requested = spec.sample_rate,
                actual = sample_rate,
                "Input device uses its own sample rate"
            );
        }

        Ok(AudioCapture {
            sample_rate,
            frames: frame_rx,
            handle: Box::new(CpalCaptureHandle {
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
        })
    }
}

struct CpalCaptureHandle {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle for CpalCaptureHandle {
    fn close(&mut self) {
        // Dropping the sender wakes the capture thread, which drops the
        // stream and releases the device. Joining makes the release
        // visible to the caller before a new capture starts.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

/// Runs on the dedicated capture thread: opens the stream, reports the
/// actual sample rate (or the failure), then holds the stream until the
/// handle is closed or dropped.
fn run_capture(
    rate_tx: oneshot::Sender<anyhow::Result<u32>>,
    frames: mpsc::Sender<Vec<i16>>,
    stop: std_mpsc::Receiver<()>,
) {
    match open_stream(frames) {
        Ok((stream, sample_rate)) => {
            if rate_tx.send(Ok(sample_rate)).is_err() {
                return;
            }
            let _ = stop.recv();
            drop(stream);
            debug!("Input stream closed");
        }
        Err(err) => {
            let _ = rate_tx.send(Err(err));
        }
    }
}

fn open_stream(frames: mpsc::Sender<Vec<i16>>) -> anyhow::Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .context("no default input device")?;
    let supported = device
        .default_input_config()
        .context("querying default input config")?;
    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    debug!(
        device = %device.name().unwrap_or_else(|_| "<unknown>".to_string()),
        sample_rate,
        channels,
        format = ?supported.sample_format(),
        "Opening input stream"
    );

    let config = supported.config();
    let stream = match supported.sample_format() {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, frames),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, frames),
        SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, frames),
        other => bail!("unsupported input sample format {other:?}"),
    }
    .context("building input stream")?;
    stream.play().context("starting input stream")?;
    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    frames: mpsc::Sender<Vec<i16>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Realtime callback: dropping a frame beats blocking the
            // device when the decoder falls behind.
            let _ = frames.try_send(downmix(data, channels));
        },
        |err| warn!(%err, "Input stream error"),
        None,
    )
}

/// Converts interleaved samples to mono PCM16 by averaging channels.
fn downmix<T>(data: &[T], channels: usize) -> Vec<i16>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|s| i16::from_sample(*s)).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| i16::from_sample(*s) as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
