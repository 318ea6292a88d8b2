//! Shared test utilities
//!
//! Fakes for the three remote services, the microphone and the speaker.
//! Nothing here touches audio hardware or the network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use office_dialogue::dialogue::{DialogueSystem, Message};
use office_dialogue::voice::{
    AudioPlayback, Block, CaptureSettings, InputSource, InputStream, OutputSink, SharedQueue,
};
use office_dialogue::{
    Error, Result, Scheduler, Services, SpeechSynthesisService, TextCompletionService,
    TranscriptionService,
};

/// Samples in every synthesized utterance
pub const SPEECH_SAMPLES: usize = 2400;

/// Value of every synthesized sample
pub const SPEECH_LEVEL: i16 = 1234;

/// Value of every captured sample
pub const MIC_LEVEL: i16 = 500;

/// Transcription fake with a fixed answer
pub struct FakeStt {
    reply: std::result::Result<String, String>,
    calls: AtomicUsize,
    wav_bytes: Mutex<Vec<usize>>,
}

impl FakeStt {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
            wav_bytes: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(reason.to_string()),
            calls: AtomicUsize::new(0),
            wav_bytes: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Size of every WAV file received
    pub fn wav_sizes(&self) -> Vec<usize> {
        self.wav_bytes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptionService for FakeStt {
    async fn transcribe(&self, wav: &[u8], _sample_rate: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.wav_bytes.lock().unwrap().push(wav.len());
        assert_eq!(&wav[..4], b"RIFF", "transcription input must be WAV");
        self.reply.clone().map_err(Error::Stt)
    }
}

/// Completion fake with a fixed answer and optional latency
pub struct FakeLlm {
    reply: std::result::Result<String, String>,
    delay: Duration,
    calls: AtomicUsize,
    transcripts: Mutex<Vec<Vec<Message>>>,
}

impl FakeLlm {
    pub fn replying(text: &str) -> Arc<Self> {
        Self::build(Ok(text.to_string()), Duration::ZERO)
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Self::build(Err(reason.to_string()), Duration::ZERO)
    }

    pub fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Self::build(Ok(text.to_string()), delay)
    }

    fn build(reply: std::result::Result<String, String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            calls: AtomicUsize::new(0),
            transcripts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Transcript passed to the most recent call
    pub fn last_transcript(&self) -> Option<Vec<Message>> {
        self.transcripts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextCompletionService for FakeLlm {
    async fn complete(&self, transcript: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts.lock().unwrap().push(transcript.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(Error::Llm)
    }
}

/// Synthesis fake producing [`SPEECH_SAMPLES`] samples of [`SPEECH_LEVEL`]
pub struct FakeTts {
    fail: bool,
    spoken: Mutex<Vec<(String, String)>>,
}

impl FakeTts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            spoken: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            spoken: Mutex::new(Vec::new()),
        })
    }

    /// Texts synthesized so far
    pub fn texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Voices used so far
    pub fn voices(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }
}

#[async_trait]
impl SpeechSynthesisService for FakeTts {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));
        if self.fail {
            return Err(Error::Tts("quota exceeded".to_string()));
        }
        Ok(SPEECH_LEVEL.to_le_bytes().repeat(SPEECH_SAMPLES))
    }
}

/// Microphone fake delivering a fixed number of blocks
pub struct ScriptedInput {
    blocks: usize,
    fail_open: bool,
    stopped: Arc<AtomicUsize>,
}

impl ScriptedInput {
    pub fn with_blocks(blocks: usize) -> Arc<Self> {
        Arc::new(Self {
            blocks,
            fail_open: false,
            stopped: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn unplugged() -> Arc<Self> {
        Arc::new(Self {
            blocks: 0,
            fail_open: true,
            stopped: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Streams stopped so far
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl InputSource for ScriptedInput {
    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn InputStream>> {
        if self.fail_open {
            return Err(Error::Audio("device unplugged".to_string()));
        }
        Ok(Box::new(ScriptedStream {
            remaining: self.blocks,
            block: settings.block_frames,
            started: false,
            stopped: Arc::clone(&self.stopped),
        }))
    }
}

struct ScriptedStream {
    remaining: usize,
    block: usize,
    started: bool,
    stopped: Arc<AtomicUsize>,
}

impl InputStream for ScriptedStream {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn available(&self) -> Result<usize> {
        Ok(if self.started && self.remaining > 0 {
            self.block
        } else {
            0
        })
    }

    fn read(&mut self, frames: usize) -> Result<Block> {
        self.remaining -= 1;
        Ok(Block {
            samples: vec![MIC_LEVEL; frames],
            overflowed: false,
        })
    }

    fn stop(&mut self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Output sink that never plays; tests drain the queue by hand
pub struct NullSink;

impl OutputSink for NullSink {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// A dialogue system wired to fakes
pub struct Harness {
    pub system: DialogueSystem,
    pub queue: SharedQueue,
    pub stt: Arc<FakeStt>,
    pub llm: Arc<FakeLlm>,
    pub tts: Arc<FakeTts>,
    pub input: Arc<ScriptedInput>,
}

impl Harness {
    /// Build on the current runtime; call from inside a Tokio test
    pub fn new(
        stt: Arc<FakeStt>,
        llm: Arc<FakeLlm>,
        tts: Arc<FakeTts>,
        input: Arc<ScriptedInput>,
    ) -> Self {
        let services = Services {
            stt: Arc::clone(&stt) as Arc<dyn TranscriptionService>,
            llm: Arc::clone(&llm) as Arc<dyn TextCompletionService>,
            tts: Arc::clone(&tts) as Arc<dyn SpeechSynthesisService>,
        };
        let queue = SharedQueue::default();
        let playback = AudioPlayback::with_sink(Arc::clone(&queue), NullSink);
        let scheduler = Scheduler::current().expect("tests run inside a runtime");
        let system = DialogueSystem::new(
            services,
            playback,
            Arc::clone(&input) as Arc<dyn InputSource>,
            scheduler,
        );

        Self {
            system,
            queue,
            stt,
            llm,
            tts,
            input,
        }
    }

    /// Fakes that answer every call successfully
    pub fn happy(transcript: &str, reply: &str, mic_blocks: usize) -> Self {
        Self::new(
            FakeStt::replying(transcript),
            FakeLlm::replying(reply),
            FakeTts::new(),
            ScriptedInput::with_blocks(mic_blocks),
        )
    }

    /// Samples waiting in the playback queue
    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().remaining()
    }

    /// Play everything queued, as the device callback would
    pub fn drain(&self) -> Vec<i16> {
        let mut queue = self.queue.lock().unwrap();
        let remaining = queue.remaining();
        queue.pull(remaining)
    }

    pub fn history_len(&self) -> usize {
        self.system.transcript().map_or(0, |t| t.len())
    }
}
