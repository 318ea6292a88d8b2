use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use office_dialogue::dialogue::{DialogueCommand, DialogueSystem, INSTRUCTIONS, InputEvent};
use office_dialogue::voice::{
    AudioPlayback, CaptureTask, CpalInput, PLAYBACK_SAMPLE_RATE, list_input_devices,
    pcm_from_le_bytes, peak_amplitude,
};
use office_dialogue::{Config, Services};

/// Office dialogue - talk to the NPCs of Venture Builder AI
#[derive(Parser)]
#[command(name = "office-dialogue", version, about)]
struct Cli {
    /// Persona to talk to ("hr" or "ceo")
    #[arg(short, long, env = "OFFICE_DIALOGUE_PERSONA", default_value = "hr")]
    persona: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List audio input devices
    Devices,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,office_dialogue=info",
        1 => "info,office_dialogue=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Devices => list_devices(),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&cli.persona, &text).await,
        };
    }

    let config = Config::load()?;
    tracing::debug!(llm = ?config.llm, voice = ?config.voice, "loaded configuration");

    let services = Services::from_config(&config)?;
    let mut system = DialogueSystem::from_config(&config, services)?;
    system.start_conversation(&cli.persona, None)?;

    converse(&mut system).await
}

/// Drive a conversation from stdin
///
/// A blank line starts or stops recording, `/mode` switches between speech
/// and text, `/quit` leaves. Any other line is typed and sent in text mode.
async fn converse(system: &mut DialogueSystem) -> anyhow::Result<()> {
    println!("{INSTRUCTIONS}");
    println!("(terminal: Enter = SPACE, /mode = M, /quit = Shift+Q)\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut frame = tokio::time::interval(Duration::from_millis(50));
    let mut shown = String::new();
    let mut prompt = String::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    system.handle_input(InputEvent::Exit);
                    break;
                };
                if let Some(DialogueCommand::MovePlayerBack { position }) = apply_line(system, &line) {
                    println!("Chat ended; player returns to {position:?}");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                system.handle_input(InputEvent::Exit);
                break;
            }
            _ = frame.tick() => {
                system.tick();
                let view = system.view();
                if view.npc_message != shown {
                    println!("NPC: {}", view.npc_message);
                    shown = view.npc_message.clone();
                }
                let line = view.prompt_line();
                if line != prompt {
                    println!("{line}");
                    prompt = line;
                }
            }
        }
    }

    Ok(())
}

fn apply_line(system: &mut DialogueSystem, line: &str) -> Option<DialogueCommand> {
    match line.trim() {
        "/quit" => system.handle_input(InputEvent::Exit),
        "/mode" => system.handle_input(InputEvent::ToggleMode),
        "" if system.view().speech_mode => {
            let event = if system.view().recording {
                InputEvent::RecordStop
            } else {
                InputEvent::RecordStart
            };
            system.handle_input(event)
        }
        text => {
            if system.view().speech_mode {
                println!("(speech mode: press Enter to record, /mode to type)");
                return None;
            }
            for c in text.chars() {
                system.handle_input(InputEvent::Char(c));
            }
            system.handle_input(InputEvent::Submit)
        }
    }
}

/// List input devices
fn list_devices() -> anyhow::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{marker} {}", device.name);
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::load()?;
    let mut settings = config.capture.clone();
    settings.timeout = Duration::from_secs(duration);

    let task = CaptureTask::new(Arc::new(CpalInput), settings);
    let outcome = task.run(CancellationToken::new()).await;

    println!("Sample rate: {} Hz", outcome.sample_rate);
    println!("Ended: {:?} ({} overflows)", outcome.end, outcome.overflows);
    println!("---");

    for (i, chunk) in outcome.chunks.iter().enumerate() {
        let energy = calculate_rms(chunk);
        let peak = f32::from(peak_amplitude(chunk)) / 32768.0;

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{i:3}] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: office-dialogue devices");
    println!("  3. Set capture.device in the config file");

    Ok(())
}

/// Calculate RMS energy of i16 samples, normalized to 0..1
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Play PCM to completion on a fresh output engine
async fn play_to_end(samples: Vec<i16>) -> anyhow::Result<()> {
    let playback = AudioPlayback::new()?;
    playback.enqueue(samples)?;

    while playback.pending_samples() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // Let the last device block drain
    tokio::time::sleep(Duration::from_millis(200)).await;

    playback.terminate();
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * 32767.0) as i16
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), PLAYBACK_SAMPLE_RATE);
    play_to_end(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output
async fn test_tts(persona: &str, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let services = Services::from_config(&config)?;
    let voice = config.personas.voice_for(persona);

    println!("Synthesizing speech with voice {voice}...");
    let pcm = services.tts.synthesize(text, voice).await?;
    println!("Got {} bytes of audio data", pcm.len());

    println!("Playing audio...");
    play_to_end(pcm_from_le_bytes(&pcm)).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
