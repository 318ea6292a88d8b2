//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use office_dialogue::voice::{
    AudioPlayback, CaptureEnd, CaptureSettings, CaptureTask, InputSource, SAMPLE_RATE,
    SharedQueue, pcm_from_le_bytes, peak_amplitude, samples_to_wav,
};

mod common;

use common::{MIC_LEVEL, NullSink, ScriptedInput};

fn engine() -> AudioPlayback {
    AudioPlayback::with_sink(SharedQueue::default(), NullSink)
}

/// Settings with no warmup so takes start reading immediately
fn quick_settings() -> CaptureSettings {
    CaptureSettings {
        warmup: Duration::ZERO,
        ..CaptureSettings::default()
    }
}

#[test]
fn test_playback_spans_chunk_boundaries() {
    let playback = engine();
    playback.enqueue(vec![1; 1200]).unwrap();
    playback.enqueue(vec![2; 1000]).unwrap();

    let mut block = [0i16; 500];
    let mut delivered = Vec::new();
    for i in 0..5 {
        block.fill(-1);
        delivered.push(playback.pull(&mut block));
        if i == 2 {
            // Third block straddles both chunks
            assert!(block[..200].iter().all(|&s| s == 1));
            assert!(block[200..].iter().all(|&s| s == 2));
        }
    }

    assert_eq!(delivered, vec![500, 500, 500, 500, 200]);
    assert!(block[200..].iter().all(|&s| s == 0), "tail is silence");
    assert_eq!(playback.frame_count(), 2200);
    assert_eq!(playback.pending_samples(), 0);
}

#[test]
fn test_playback_stop_yields_silence() {
    let playback = engine();
    playback.enqueue(vec![9; 4800]).unwrap();

    playback.stop();

    let mut block = [5i16; 1200];
    assert_eq!(playback.pull(&mut block), 0);
    assert!(block.iter().all(|&s| s == 0));
    assert!(!playback.is_playing());
}

#[test]
fn test_tts_bytes_decode_little_endian() {
    let bytes = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80, 0x7f];
    assert_eq!(pcm_from_le_bytes(&bytes), vec![1, -1, i16::MIN]);
}

#[test]
fn test_wav_readable_by_hound() {
    let samples: Vec<i16> = (0..2400i16).map(|i| (i % 200) * 100 - 10_000).collect();
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    assert_eq!(&wav[..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);

    let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(decoded, samples);
}

#[test]
fn test_peak_amplitude_handles_min() {
    assert_eq!(peak_amplitude(&[]), 0);
    assert_eq!(peak_amplitude(&[3, -7, 5]), 7);
    assert_eq!(peak_amplitude(&[i16::MIN]), 32768);
}

#[tokio::test(start_paused = true)]
async fn test_capture_collects_blocks_until_cancelled() {
    let input = ScriptedInput::with_blocks(4);
    let settings = quick_settings();
    let block = settings.block_frames;
    let task = CaptureTask::new(Arc::clone(&input) as Arc<dyn InputSource>, settings);

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        stopper.cancel();
    });

    let outcome = task.run(cancel).await;

    assert_eq!(outcome.end, CaptureEnd::Stopped);
    assert_eq!(outcome.chunks.len(), 4);
    assert_eq!(outcome.sample_count(), 4 * block);
    assert!(outcome.samples().iter().all(|&s| s == MIC_LEVEL));
    assert_eq!(outcome.sample_rate, SAMPLE_RATE);
    assert_eq!(input.stopped(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capture_times_out() {
    let input = ScriptedInput::with_blocks(2);
    let settings = CaptureSettings {
        timeout: Duration::from_secs(3),
        ..quick_settings()
    };
    let task = CaptureTask::new(Arc::clone(&input) as Arc<dyn InputSource>, settings);

    let started = tokio::time::Instant::now();
    let outcome = task.run(CancellationToken::new()).await;

    assert_eq!(outcome.end, CaptureEnd::TimedOut);
    assert_eq!(outcome.chunks.len(), 2);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(input.stopped(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capture_cancelled_during_warmup() {
    let input = ScriptedInput::with_blocks(3);
    let task = CaptureTask::new(
        Arc::clone(&input) as Arc<dyn InputSource>,
        CaptureSettings::default(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = task.run(cancel).await;

    assert_eq!(outcome.end, CaptureEnd::Stopped);
    assert!(outcome.chunks.is_empty());
    assert_eq!(input.stopped(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capture_reports_open_failure() {
    let input = ScriptedInput::unplugged();
    let task = CaptureTask::new(Arc::clone(&input) as Arc<dyn InputSource>, quick_settings());

    let outcome = task.run(CancellationToken::new()).await;

    match outcome.end {
        CaptureEnd::Failed(reason) => assert!(reason.contains("device unplugged")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(outcome.chunks.is_empty());
    assert_eq!(input.stopped(), 0);
}
