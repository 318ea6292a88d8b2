//! Dialogue orchestration
//!
//! Input events are handled synchronously and never wait on audio or the
//! network. Anything slow is submitted to the scheduler together with the
//! turn epoch it belongs to. Results are applied under `gate`, the same lock
//! barge-in holds while it advances the epoch and stops playback, so a
//! superseded turn can never write history or queue audio after the stop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::event::{DialogueCommand, DialogueView, InputEvent};
use super::session::{ConversationState, DEFAULT_PLAYER_POSITION, Message, Role};
use super::state::{TurnState, TurnTracker};
use super::{
    APOLOGY_MESSAGE, AUDIO_UNAVAILABLE_MESSAGE, NO_AUDIO_MESSAGE, NOT_CAUGHT_MESSAGE,
    audio_input_error_message, transcription_failed_message,
};
use crate::Result;
use crate::config::Config;
use crate::persona::{DEFAULT_VOICE, PersonaTable};
use crate::scheduler::Scheduler;
use crate::services::Services;
use crate::voice::{
    AudioPlayback, CaptureEnd, CaptureOutcome, CaptureSettings, CaptureTask, CpalInput,
    InputSource, pcm_from_le_bytes, peak_amplitude, samples_to_wav,
};

/// Voice conversation with one NPC at a time
pub struct DialogueSystem {
    shared: Arc<Shared>,
    scheduler: Scheduler,
    input_source: Arc<dyn InputSource>,
    capture: CaptureSettings,
    personas: PersonaTable,
    active: bool,
    input_active: bool,
    speech_mode: bool,
    input: String,
    pending: Option<PendingCapture>,
    session: CancellationToken,
}

/// State touched by background tasks
struct Shared {
    services: Services,
    playback: AudioPlayback,
    turn: TurnTracker,
    gate: Mutex<()>,
    conversation: Mutex<Option<ConversationState>>,
    npc_message: Mutex<String>,
}

/// A take that has not been handed to finalize yet
struct PendingCapture {
    epoch: u64,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<CaptureOutcome>,
}

impl DialogueSystem {
    /// Assemble a dialogue system from its collaborators
    #[must_use]
    pub fn new(
        services: Services,
        playback: AudioPlayback,
        input_source: Arc<dyn InputSource>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                services,
                playback,
                turn: TurnTracker::new(),
                gate: Mutex::new(()),
                conversation: Mutex::new(None),
                npc_message: Mutex::new(String::new()),
            }),
            scheduler,
            input_source,
            capture: CaptureSettings::default(),
            personas: PersonaTable::builtin(),
            active: false,
            input_active: false,
            speech_mode: false,
            input: String::new(),
            pending: None,
            session: CancellationToken::new(),
        }
    }

    /// Open the default audio devices and a dedicated scheduler
    ///
    /// # Errors
    ///
    /// Returns error if the output device or scheduler cannot be created
    pub fn from_config(config: &Config, services: Services) -> Result<Self> {
        let playback = AudioPlayback::new()?;
        let scheduler = Scheduler::dedicated()?;

        Ok(Self::new(services, playback, Arc::new(CpalInput), scheduler)
            .with_personas(config.personas.clone())
            .with_capture_settings(config.capture.clone()))
    }

    /// Replace the persona table
    #[must_use]
    pub fn with_personas(mut self, personas: PersonaTable) -> Self {
        self.personas = personas;
        self
    }

    /// Replace the recording parameters
    #[must_use]
    pub fn with_capture_settings(mut self, capture: CaptureSettings) -> Self {
        self.capture = capture;
        self
    }

    /// Begin a conversation, replacing any previous one
    ///
    /// The greeting is spoken in the background.
    ///
    /// # Errors
    ///
    /// Returns `PersonaNotFound` for unknown persona ids
    pub fn start_conversation(
        &mut self,
        persona_id: &str,
        player_position: Option<[f32; 3]>,
    ) -> Result<()> {
        let persona = self.personas.get(persona_id)?.clone();

        self.session.cancel();
        self.session = CancellationToken::new();
        self.pending = None;

        let epoch = {
            let _gate = lock(&self.shared.gate);
            let epoch = self.shared.turn.advance(TurnState::Idle);
            self.shared.playback.stop();
            self.shared.playback.reset_frame_count();
            *lock(&self.shared.conversation) =
                Some(ConversationState::new(&persona, player_position));
            persona.greeting.clone_into(&mut lock(&self.shared.npc_message));
            epoch
        };

        self.active = true;
        self.input_active = true;
        self.speech_mode = true;
        self.input.clear();

        tracing::info!(persona = %persona.id, name = %persona.name, "dialogue started");

        let shared = Arc::clone(&self.shared);
        let greeting = persona.greeting;
        self.scheduler.submit(async move { shared.speak(epoch, greeting).await });
        Ok(())
    }

    /// Apply one input event
    ///
    /// Returns a command for the caller when the conversation ends.
    pub fn handle_input(&mut self, event: InputEvent) -> Option<DialogueCommand> {
        if !self.active {
            return None;
        }

        match event {
            InputEvent::Exit => return Some(self.end_conversation()),
            InputEvent::ToggleMode => self.toggle_mode(),
            InputEvent::RecordStart => self.start_recording(),
            InputEvent::RecordStop => {
                if self.speech_mode {
                    self.stop_recording();
                }
            }
            InputEvent::Submit => self.submit_text(),
            InputEvent::Char(c) => {
                if self.input_active && !c.is_control() {
                    self.input.push(c);
                }
            }
            InputEvent::Backspace => {
                self.input.pop();
            }
        }

        None
    }

    /// Per-frame housekeeping; moves `Speaking` to `Idle` once playback drains
    pub fn tick(&self) {
        let (epoch, state) = self.shared.turn.snapshot();
        if state == TurnState::Speaking
            && self.shared.playback.frame_count() > 0
            && self.shared.playback.pending_samples() == 0
            && self
                .shared
                .turn
                .transition(epoch, TurnState::Speaking, TurnState::Idle)
        {
            tracing::debug!("NPC finished speaking");
        }
    }

    /// Snapshot for the dialogue box
    #[must_use]
    pub fn view(&self) -> DialogueView {
        let turn_state = self.shared.turn.state();
        DialogueView {
            active: self.active,
            npc_message: lock(&self.shared.npc_message).clone(),
            speech_mode: self.speech_mode,
            recording: turn_state == TurnState::Listening,
            input: self.input.clone(),
            turn_state,
        }
    }

    /// Copy of the active transcript
    #[must_use]
    pub fn transcript(&self) -> Option<Vec<Message>> {
        self.shared.transcript()
    }

    #[must_use]
    pub fn turn_state(&self) -> TurnState {
        self.shared.turn.state()
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Wait for every submitted background task to finish
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    fn end_conversation(&mut self) -> DialogueCommand {
        self.active = false;
        self.input_active = false;
        self.speech_mode = false;
        self.session.cancel();
        self.pending = None;

        let conversation = {
            let _gate = lock(&self.shared.gate);
            self.shared.turn.advance(TurnState::Idle);
            self.shared.playback.stop();
            lock(&self.shared.conversation).take()
        };

        tracing::info!("dialogue ended");
        DialogueCommand::MovePlayerBack {
            position: conversation.map_or(DEFAULT_PLAYER_POSITION, |c| c.player_position()),
        }
    }

    fn toggle_mode(&mut self) {
        self.speech_mode = !self.speech_mode;
        if !self.speech_mode {
            self.stop_recording();
        }
        tracing::info!(speech_mode = self.speech_mode, "speech mode toggled");
    }

    /// Barge in and start a take
    fn start_recording(&mut self) {
        if !self.speech_mode || self.shared.turn.state() == TurnState::Listening {
            return;
        }

        if let Some(stale) = self.pending.take() {
            stale.cancel.cancel();
        }

        let epoch = self.barge_in(TurnState::Listening);
        let cancel = self.session.child_token();
        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingCapture {
            epoch,
            cancel: cancel.clone(),
            outcome: rx,
        });

        let task = CaptureTask::new(Arc::clone(&self.input_source), self.capture.clone());
        let shared = Arc::clone(&self.shared);
        self.scheduler
            .submit(async move { shared.capture(epoch, task, cancel, tx).await });

        tracing::info!(epoch, "started recording");
    }

    /// End the take and hand it to finalize, unless the timeout got there first
    fn stop_recording(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let claimed = self.shared.turn.transition(
            pending.epoch,
            TurnState::Listening,
            TurnState::Transcribing,
        );
        pending.cancel.cancel();

        if !claimed {
            tracing::debug!(epoch = pending.epoch, "take already ended");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let epoch = pending.epoch;
        let outcome = pending.outcome;
        self.scheduler.submit(async move {
            if let Ok(outcome) = outcome.await {
                shared.finalize(epoch, outcome).await;
            }
        });

        tracing::info!(epoch, "stopped recording");
    }

    fn submit_text(&mut self) {
        if self.speech_mode {
            return;
        }

        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.input.clear();

        let epoch = self.barge_in(TurnState::Idle);
        if !self.shared.record_turn(epoch, Role::User, &text) {
            return;
        }
        tracing::info!(text = %text, "user said");

        let shared = Arc::clone(&self.shared);
        self.scheduler.submit(async move { shared.reply(epoch).await });
    }

    /// New epoch in `to`, with trailing NPC audio dropped
    fn barge_in(&self, to: TurnState) -> u64 {
        let _gate = lock(&self.shared.gate);
        let epoch = self.shared.turn.advance(to);
        self.shared.playback.stop();
        self.shared.playback.reset_frame_count();
        epoch
    }
}

impl Drop for DialogueSystem {
    fn drop(&mut self) {
        self.session.cancel();
        self.scheduler.shutdown();
        self.shared.playback.terminate();
    }
}

impl Shared {
    fn transcript(&self) -> Option<Vec<Message>> {
        lock(&self.conversation)
            .as_ref()
            .map(|c| c.history().to_vec())
    }

    fn voice(&self) -> String {
        lock(&self.conversation)
            .as_ref()
            .map_or_else(|| DEFAULT_VOICE.to_string(), |c| c.voice().to_string())
    }

    /// Append a turn if `epoch` is still current
    fn record_turn(&self, epoch: u64, role: Role, text: &str) -> bool {
        let _gate = lock(&self.gate);
        if !self.turn.is_current(epoch) {
            return false;
        }
        match lock(&self.conversation).as_mut() {
            Some(conversation) => {
                conversation.push(role, text);
                true
            }
            None => false,
        }
    }

    /// Show an NPC line if `epoch` is still current
    fn show(&self, epoch: u64, text: &str) -> bool {
        let _gate = lock(&self.gate);
        if !self.turn.is_current(epoch) {
            return false;
        }
        text.clone_into(&mut lock(&self.npc_message));
        true
    }

    /// Run one take and route its outcome
    async fn capture(
        &self,
        epoch: u64,
        task: CaptureTask,
        cancel: CancellationToken,
        tx: oneshot::Sender<CaptureOutcome>,
    ) {
        let outcome = task.run(cancel).await;

        if let CaptureEnd::Failed(reason) = &outcome.end {
            let released = self
                .turn
                .transition(epoch, TurnState::Listening, TurnState::Idle)
                || self
                    .turn
                    .transition(epoch, TurnState::Transcribing, TurnState::Idle);
            drop(tx);
            if released {
                self.speak(epoch, audio_input_error_message(reason)).await;
            }
            return;
        }

        if outcome.end == CaptureEnd::TimedOut
            && self
                .turn
                .transition(epoch, TurnState::Listening, TurnState::Transcribing)
        {
            self.finalize(epoch, outcome).await;
            return;
        }

        // The releasing side owns finalize
        let _ = tx.send(outcome);
    }

    /// Transcribe a finished take and answer it
    async fn finalize(&self, epoch: u64, outcome: CaptureOutcome) {
        if outcome.chunks.is_empty() {
            tracing::info!("no audio data to process");
            self.speak(epoch, NO_AUDIO_MESSAGE.to_string()).await;
            return;
        }

        let sample_rate = outcome.sample_rate;
        let samples = outcome.samples();
        drop(outcome);
        tracing::info!(
            samples = samples.len(),
            peak = peak_amplitude(&samples),
            "processing audio input"
        );

        let transcript = match samples_to_wav(&samples, sample_rate) {
            Ok(wav) => self.services.stt.transcribe(&wav, sample_rate).await,
            Err(e) => Err(e),
        };

        match transcript {
            Err(e) => {
                tracing::error!(error = %e, "audio transcription error");
                self.speak(epoch, transcription_failed_message(&e.to_string()))
                    .await;
            }
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    tracing::info!("no speech detected in audio");
                    self.speak(epoch, NOT_CAUGHT_MESSAGE.to_string()).await;
                } else if self.record_turn(epoch, Role::User, text) {
                    tracing::info!(transcript = %text, "transcribed audio");
                    self.reply(epoch).await;
                } else {
                    tracing::debug!("discarding stale transcript");
                }
            }
        }
    }

    /// Generate and speak the NPC's answer to the transcript
    async fn reply(&self, epoch: u64) {
        if !self.turn.is_current(epoch) {
            return;
        }
        let Some(transcript) = self.transcript() else {
            return;
        };

        match self.services.llm.complete(&transcript).await {
            Ok(text) => {
                if !self.record_turn(epoch, Role::Assistant, &text) {
                    tracing::debug!("discarding stale reply");
                    return;
                }
                tracing::info!(reply = %text, "NPC says");
                self.speak(epoch, text).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "text completion error");
                self.speak(epoch, APOLOGY_MESSAGE.to_string()).await;
            }
        }
    }

    /// Show `text`, synthesize it and queue the audio
    async fn speak(&self, epoch: u64, text: String) {
        if !self.show(epoch, &text) {
            return;
        }

        let voice = self.voice();
        match self.services.tts.synthesize(&text, &voice).await {
            Ok(bytes) => {
                let pcm = pcm_from_le_bytes(&bytes);
                tracing::debug!(samples = pcm.len(), voice = %voice, "generated speech");
                self.enqueue_speech(epoch, pcm);
            }
            Err(e) => {
                tracing::error!(error = %e, "TTS error");
                self.fall_back_to_text(epoch);
            }
        }
    }

    fn fall_back_to_text(&self, epoch: u64) {
        let _gate = lock(&self.gate);
        if self.turn.is_current(epoch) {
            AUDIO_UNAVAILABLE_MESSAGE.clone_into(&mut lock(&self.npc_message));
            self.turn.settle(epoch, TurnState::Idle);
        }
    }

    fn enqueue_speech(&self, epoch: u64, pcm: Vec<i16>) {
        let _gate = lock(&self.gate);
        if !self.turn.is_current(epoch) {
            tracing::debug!("discarding stale speech");
            return;
        }

        if pcm.is_empty() {
            tracing::warn!("synthesized speech was empty");
            self.turn.settle(epoch, TurnState::Idle);
            return;
        }

        self.playback.reset_frame_count();
        match self.playback.enqueue(pcm) {
            Ok(()) => {
                self.turn.settle(epoch, TurnState::Speaking);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to queue speech");
                self.turn.settle(epoch, TurnState::Idle);
            }
        }
    }
}

/// Lock ignoring poison; a panicked task must not wedge the input thread
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
