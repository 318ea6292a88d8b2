//! Voice processing module
//!
//! Handles audio capture, playback and the HTTP speech backends. Device
//! callbacks run on cpal threads; everything else is driven from the
//! dialogue scheduler.

mod capture;
mod device;
mod playback;
mod queue;
mod stt;
mod tts;

pub use capture::{
    Block, CaptureEnd, CaptureOutcome, CaptureSettings, CaptureTask, CpalInput, InputSource,
    InputStream, SAMPLE_RATE, peak_amplitude, samples_to_wav,
};
pub use device::{InputDeviceInfo, list_input_devices};
pub use playback::{
    AudioPlayback, CHUNK_LENGTH_MS, OutputSink, PLAYBACK_BLOCK_FRAMES, PLAYBACK_SAMPLE_RATE,
    SharedQueue,
};
pub use queue::{PlaybackQueue, pcm_from_le_bytes};
pub use stt::SpeechToText;
pub use tts::{OPENAI_VOICES, TextToSpeech};
