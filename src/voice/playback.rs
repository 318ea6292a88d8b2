//! Audio playback to speakers
//!
//! The output device pulls from a shared [`PlaybackQueue`] at hardware
//! cadence. Producers enqueue from any thread; the first enqueue after a
//! stop starts the device again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};

use super::device::{StreamThread, covers_rate};
use super::queue::PlaybackQueue;
use crate::{Error, Result};

/// Sample rate for playback (matches TTS PCM output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Duration of one device block
pub const CHUNK_LENGTH_MS: u32 = 50;

/// Frames per device block (50ms at 24kHz)
pub const PLAYBACK_BLOCK_FRAMES: u32 = PLAYBACK_SAMPLE_RATE * CHUNK_LENGTH_MS / 1000;

/// Mono frames the device callback pulls at a time
const SCRATCH_FRAMES: usize = PLAYBACK_BLOCK_FRAMES as usize;

/// Queue shared between producers and the device callback
pub type SharedQueue = Arc<Mutex<PlaybackQueue>>;

/// Device side of the output engine
///
/// Implementations drive something that periodically calls
/// [`AudioPlayback::pull`] (or pulls from the shared queue directly).
pub trait OutputSink: Send {
    /// Start or resume the device
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be started
    fn start(&mut self) -> Result<()>;

    /// Halt the device
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be paused
    fn pause(&mut self) -> Result<()>;

    /// Release the device
    fn close(&mut self);
}

/// Plays queued PCM chunks to an output device
///
/// Lock order is `device` then `queue`. The device callback only takes
/// `queue`.
pub struct AudioPlayback {
    queue: SharedQueue,
    device: Mutex<Device>,
    terminated: AtomicBool,
}

/// The sink together with whether it is started
struct Device {
    sink: Box<dyn OutputSink>,
    playing: bool,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let queue = SharedQueue::default();
        let sink = CpalOutput::open(Arc::clone(&queue))?;
        Ok(Self::with_sink(queue, sink))
    }

    /// Build an engine around an existing queue and sink
    #[must_use]
    pub fn with_sink(queue: SharedQueue, sink: impl OutputSink + 'static) -> Self {
        Self {
            queue,
            device: Mutex::new(Device {
                sink: Box::new(sink),
                playing: false,
            }),
            terminated: AtomicBool::new(false),
        }
    }

    /// Append a chunk, starting the device if it is idle
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to start; the chunk stays queued
    pub fn enqueue(&self, chunk: Vec<i16>) -> Result<()> {
        let mut device = lock(&self.device);
        if self.terminated.load(Ordering::Acquire) {
            return Err(Error::Audio("playback terminated".to_string()));
        }

        let samples = chunk.len();
        lock(&self.queue).push(chunk);
        tracing::debug!(samples, "queued audio chunk");

        if !device.playing {
            device.sink.start()?;
            device.playing = true;
            tracing::debug!("playback started");
        }

        Ok(())
    }

    /// Fill `out` from the queue; called from the device callback
    ///
    /// Returns the number of real (non-silent) samples delivered.
    pub fn pull(&self, out: &mut [i16]) -> usize {
        lock(&self.queue).pull_into(out)
    }

    /// Halt the device and drop everything still queued
    pub fn stop(&self) {
        let mut device = lock(&self.device);
        device.playing = false;
        if let Err(e) = device.sink.pause() {
            tracing::warn!(error = %e, "failed to pause output device");
        }
        lock(&self.queue).clear();
    }

    /// Reset the delivered-frames counter
    pub fn reset_frame_count(&self) {
        lock(&self.queue).reset_frame_count();
    }

    /// Real frames delivered since the last reset
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        lock(&self.queue).frames_played()
    }

    /// Samples still waiting to be played
    #[must_use]
    pub fn pending_samples(&self) -> usize {
        lock(&self.queue).remaining()
    }

    /// Whether the device is currently started
    #[must_use]
    pub fn is_playing(&self) -> bool {
        lock(&self.device).playing
    }

    /// Release the device
    ///
    /// Only dropping the engine is valid afterwards.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut device = lock(&self.device);
        device.playing = false;
        device.sink.close();
        lock(&self.queue).clear();
        tracing::debug!("playback terminated");
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Lock ignoring poison: a panicked producer must not silence the callback
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// cpal-backed output sink
struct CpalOutput {
    stream: StreamThread,
}

impl CpalOutput {
    fn open(queue: SharedQueue) -> Result<Self> {
        let stream = StreamThread::spawn("playback-stream", move || build_output_stream(queue))?;
        Ok(Self { stream })
    }
}

impl OutputSink for CpalOutput {
    fn start(&mut self) -> Result<()> {
        self.stream.play()
    }

    fn pause(&mut self) -> Result<()> {
        self.stream.pause()
    }

    fn close(&mut self) {
        self.stream.close();
    }
}

fn build_output_stream(queue: SharedQueue) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| covers_rate(c, 1, PLAYBACK_SAMPLE_RATE))
        .max_by_key(|c| c.sample_format() == SampleFormat::I16)
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .filter(|c| covers_rate(c, 2, PLAYBACK_SAMPLE_RATE))
                .max_by_key(|c| c.sample_format() == SampleFormat::I16)
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let supported_config = supported_config.with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE));
    let sample_format = supported_config.sample_format();
    let mut config: StreamConfig = supported_config.config();
    config.buffer_size = BufferSize::Fixed(PLAYBACK_BLOCK_FRAMES);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels = config.channels,
        ?sample_format,
        "audio playback initialized"
    );

    match build_for_format(&device, &config, sample_format, &queue) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::debug!(error = %e, "fixed block size rejected, using device default");
            config.buffer_size = BufferSize::Default;
            build_for_format(&device, &config, sample_format, &queue)
        }
    }
}

fn build_for_format(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    queue: &SharedQueue,
) -> Result<cpal::Stream> {
    let channels = usize::from(config.channels);
    let error_callback = |err: cpal::StreamError| tracing::error!(error = %err, "audio playback error");

    let stream = match sample_format {
        SampleFormat::I16 => {
            let queue = Arc::clone(queue);
            let mut scratch = vec![0i16; SCRATCH_FRAMES];
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    fill_frames(&queue, &mut scratch, data, channels, |s| s);
                },
                error_callback,
                None,
            )
        }
        SampleFormat::F32 => {
            let queue = Arc::clone(queue);
            let mut scratch = vec![0i16; SCRATCH_FRAMES];
            device.build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_frames(&queue, &mut scratch, data, channels, |s| f32::from(s) / 32768.0);
                },
                error_callback,
                None,
            )
        }
        other => {
            return Err(Error::Audio(format!("unsupported output sample format: {other:?}")));
        }
    };

    stream.map_err(|e| Error::Audio(e.to_string()))
}

/// Pull mono frames and fan them out to every output channel
///
/// Buffers larger than `scratch` are filled in several pulls so the
/// callback never allocates.
fn fill_frames<T: Copy>(
    queue: &SharedQueue,
    scratch: &mut [i16],
    data: &mut [T],
    channels: usize,
    convert: impl Fn(i16) -> T,
) {
    let channels = channels.max(1);
    if scratch.is_empty() {
        return;
    }

    for part in data.chunks_mut(scratch.len() * channels) {
        let frames = part.len().div_ceil(channels);
        lock(queue).pull_into(&mut scratch[..frames]);

        for (frame, &sample) in part.chunks_mut(channels).zip(scratch.iter()) {
            let value = convert(sample);
            for out in frame.iter_mut() {
                *out = value;
            }
        }
    }
}
