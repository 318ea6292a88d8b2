//! Audio capture from microphone
//!
//! A [`CaptureTask`] opens an input stream, polls it for fixed-size blocks
//! and accumulates them until it is cancelled or the take times out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::DeviceTrait;
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::device::{StreamThread, covers_rate, select_input_device};
use crate::{Error, Result};

/// Default capture sample rate
pub const SAMPLE_RATE: u32 = 24000;

/// Seconds of audio the device-side buffer holds before dropping the oldest
const RING_SECONDS: usize = 2;

/// Parameters for one recording take
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Channels requested from the device (downmixed to mono)
    pub channels: u16,

    /// Samples per block read from the device
    pub block_frames: usize,

    /// Pause between opening and starting the stream
    pub warmup: Duration,

    /// Hard limit on the length of a take
    pub timeout: Duration,

    /// Sleep between availability polls
    pub poll_interval: Duration,

    /// Input device name; `None` uses the system default
    pub device: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            block_frames: SAMPLE_RATE as usize / 5,
            warmup: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            device: None,
        }
    }
}

/// One block read from an input stream
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Mono samples
    pub samples: Vec<i16>,

    /// Whether the device dropped input since the previous read
    pub overflowed: bool,
}

/// An open, pollable input stream
pub trait InputStream: Send {
    /// Start delivering samples
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be started
    fn start(&mut self) -> Result<()>;

    /// Samples ready to be read
    ///
    /// # Errors
    ///
    /// Returns error if the device reported a failure
    fn available(&self) -> Result<usize>;

    /// Read exactly `frames` samples
    ///
    /// # Errors
    ///
    /// Returns error if the device reported a failure
    fn read(&mut self, frames: usize) -> Result<Block>;

    /// Stop and release the device
    fn stop(&mut self);
}

/// Opens input streams; one call per recording take
pub trait InputSource: Send + Sync {
    /// Open the input device
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened at the requested format
    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn InputStream>>;
}

/// Why a take ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEnd {
    /// Cancelled by the caller
    Stopped,

    /// Hit the hard timeout
    TimedOut,

    /// The device failed to open or failed mid-take
    Failed(String),
}

/// Result of a recording take
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    /// Captured blocks in arrival order
    pub chunks: Vec<Vec<i16>>,

    /// Why the take ended
    pub end: CaptureEnd,

    /// Number of blocks that reported an overflow
    pub overflows: usize,

    /// Sample rate of `chunks`
    pub sample_rate: u32,
}

impl CaptureOutcome {
    /// Total captured samples
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Concatenate every captured block
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.chunks.concat()
    }
}

/// A cancellable recording take
pub struct CaptureTask {
    source: Arc<dyn InputSource>,
    settings: CaptureSettings,
}

impl CaptureTask {
    /// Create a take that reads from `source`
    #[must_use]
    pub fn new(source: Arc<dyn InputSource>, settings: CaptureSettings) -> Self {
        Self { source, settings }
    }

    /// Record until `cancel` fires, the timeout elapses or the device fails
    ///
    /// The device is always stopped before this returns.
    pub async fn run(self, cancel: CancellationToken) -> CaptureOutcome {
        let mut outcome = CaptureOutcome {
            chunks: Vec::new(),
            end: CaptureEnd::Stopped,
            overflows: 0,
            sample_rate: self.settings.sample_rate,
        };

        tracing::debug!(
            sample_rate = self.settings.sample_rate,
            block = self.settings.block_frames,
            "starting audio recording"
        );

        let source = Arc::clone(&self.source);
        let settings = self.settings.clone();
        let opened = tokio::task::spawn_blocking(move || source.open(&settings))
            .await
            .map_err(|e| Error::Audio(format!("input open task failed: {e}")))
            .and_then(|r| r);

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "failed to open input device");
                outcome.end = CaptureEnd::Failed(e.to_string());
                return outcome;
            }
        };

        outcome.end = self.record(stream.as_mut(), &cancel, &mut outcome).await;

        // Closing joins the device thread
        if let Err(e) = tokio::task::spawn_blocking(move || stream.stop()).await {
            tracing::error!(error = %e, "input close task failed");
        }

        tracing::debug!(
            chunks = outcome.chunks.len(),
            samples = outcome.sample_count(),
            end = ?outcome.end,
            "audio input stream stopped"
        );
        outcome
    }

    async fn record(
        &self,
        stream: &mut dyn InputStream,
        cancel: &CancellationToken,
        outcome: &mut CaptureOutcome,
    ) -> CaptureEnd {
        tokio::select! {
            () = cancel.cancelled() => return CaptureEnd::Stopped,
            () = tokio::time::sleep(self.settings.warmup) => {}
        }

        if let Err(e) = stream.start() {
            tracing::error!(error = %e, "failed to start input stream");
            return CaptureEnd::Failed(e.to_string());
        }
        tracing::debug!("audio input stream started");

        let deadline = Instant::now() + self.settings.timeout;
        let block = self.settings.block_frames;

        loop {
            if cancel.is_cancelled() {
                return CaptureEnd::Stopped;
            }
            if Instant::now() >= deadline {
                tracing::info!("recording timeout reached");
                return CaptureEnd::TimedOut;
            }

            match stream.available() {
                Ok(n) if n >= block => match stream.read(block) {
                    Ok(read) => {
                        if read.overflowed {
                            outcome.overflows += 1;
                            tracing::warn!("audio buffer overflow detected");
                        }
                        if read.samples.is_empty() {
                            tracing::debug!("no audio data captured in block");
                        } else {
                            tracing::trace!(
                                samples = read.samples.len(),
                                peak = peak_amplitude(&read.samples),
                                "recorded audio block"
                            );
                            outcome.chunks.push(read.samples);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "audio input error");
                        return CaptureEnd::Failed(e.to_string());
                    }
                },
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "audio input error");
                    return CaptureEnd::Failed(e.to_string());
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return CaptureEnd::Stopped,
                () = tokio::time::sleep_until(deadline.min(Instant::now() + self.settings.poll_interval)) => {}
            }
        }
    }
}

/// Largest absolute sample value
#[must_use]
pub fn peak_amplitude(samples: &[i16]) -> u16 {
    samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
}

/// Encode mono i16 samples as a 16-bit PCM WAV file for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Samples written by the device callback, read by the capture task
#[derive(Debug, Default)]
struct InputRing {
    samples: VecDeque<i16>,
    capacity: usize,
    overflowed: bool,
    error: Option<String>,
}

impl InputRing {
    fn push(&mut self, mono: impl Iterator<Item = i16>) {
        for sample in mono {
            if self.samples.len() >= self.capacity {
                self.samples.pop_front();
                self.overflowed = true;
            }
            self.samples.push_back(sample);
        }
    }
}

/// Captures from a cpal input device
#[derive(Debug, Clone, Default)]
pub struct CpalInput;

impl InputSource for CpalInput {
    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn InputStream>> {
        let ring = Arc::new(Mutex::new(InputRing {
            capacity: ring_capacity(settings),
            ..InputRing::default()
        }));

        let build_ring = Arc::clone(&ring);
        let build_settings = settings.clone();
        let stream = StreamThread::spawn("capture-stream", move || {
            build_input_stream(&build_settings, build_ring)
        })?;

        Ok(Box::new(CpalInputStream { stream, ring }))
    }
}

/// Device-side buffer size: `RING_SECONDS` of audio, and always room for
/// two blocks
fn ring_capacity(settings: &CaptureSettings) -> usize {
    (settings.sample_rate as usize)
        .saturating_mul(RING_SECONDS)
        .max(settings.block_frames.saturating_mul(2))
}

struct CpalInputStream {
    stream: StreamThread,
    ring: Arc<Mutex<InputRing>>,
}

impl CpalInputStream {
    fn ring(&self) -> std::sync::MutexGuard<'_, InputRing> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InputStream for CpalInputStream {
    fn start(&mut self) -> Result<()> {
        self.ring().samples.clear();
        self.stream.play()
    }

    fn available(&self) -> Result<usize> {
        let ring = self.ring();
        match &ring.error {
            Some(e) => Err(Error::Audio(e.clone())),
            None => Ok(ring.samples.len()),
        }
    }

    fn read(&mut self, frames: usize) -> Result<Block> {
        let mut ring = self.ring();
        if let Some(e) = &ring.error {
            return Err(Error::Audio(e.clone()));
        }
        let take = frames.min(ring.samples.len());
        let samples = ring.samples.drain(..take).collect();
        let overflowed = std::mem::take(&mut ring.overflowed);
        Ok(Block {
            samples,
            overflowed,
        })
    }

    fn stop(&mut self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "failed to pause input stream");
        }
        self.stream.close();
    }
}

fn build_input_stream(settings: &CaptureSettings, ring: Arc<Mutex<InputRing>>) -> Result<cpal::Stream> {
    let device = select_input_device(settings.device.as_deref())?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| covers_rate(c, settings.channels, settings.sample_rate))
        .max_by_key(|c| c.sample_format() == SampleFormat::I16)
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let supported_config = supported_config.with_sample_rate(SampleRate(settings.sample_rate));
    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.config();
    let channels = usize::from(config.channels.max(1));

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = settings.sample_rate,
        channels = config.channels,
        ?sample_format,
        "audio capture initialized"
    );

    let error_ring = Arc::clone(&ring);
    let error_callback = move |err: cpal::StreamError| {
        tracing::error!(error = %err, "audio capture error");
        if let Ok(mut ring) = error_ring.lock() {
            ring.error = Some(err.to_string());
        }
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = ring.lock() {
                    buf.push(downmix(data, channels, i32::from));
                }
            },
            error_callback,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = ring.lock() {
                    buf.push(downmix(data, channels, f32_to_i32));
                }
            },
            error_callback,
            None,
        ),
        other => {
            return Err(Error::Audio(format!("unsupported input sample format: {other:?}")));
        }
    };

    stream.map_err(|e| Error::Audio(e.to_string()))
}

#[allow(clippy::cast_possible_truncation)]
fn f32_to_i32(sample: f32) -> i32 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i32
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn downmix<'a, T: Copy>(
    data: &'a [T],
    channels: usize,
    to_i32: impl Fn(T) -> i32 + 'a,
) -> impl Iterator<Item = i16> + 'a {
    data.chunks(channels).map(move |frame| {
        let sum: i32 = frame.iter().map(|&s| to_i32(s)).sum();
        (sum / frame.len() as i32) as i16
    })
}
