//! Pending output audio, drained by the output device callback

use std::collections::VecDeque;

/// Ordered queue of PCM chunks waiting to be played
///
/// Insertion order is playback order. A chunk that over-satisfies a pull is
/// split: the consumed prefix is skipped via `head_offset` and the remainder
/// stays at the front, so the callback path never allocates.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    chunks: VecDeque<Vec<i16>>,
    head_offset: usize,
    frames_played: u64,
}

impl PlaybackQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the tail
    pub fn push(&mut self, chunk: Vec<i16>) {
        if !chunk.is_empty() {
            self.chunks.push_back(chunk);
        }
    }

    /// Fill `out` from the head of the queue
    ///
    /// Short fills are padded with silence. Returns the number of real
    /// samples written, which is also added to the frame counter.
    pub fn pull_into(&mut self, out: &mut [i16]) -> usize {
        let mut written = 0;

        while written < out.len() {
            let Some(head) = self.chunks.front() else {
                break;
            };

            let available = &head[self.head_offset..];
            let take = available.len().min(out.len() - written);
            out[written..written + take].copy_from_slice(&available[..take]);
            written += take;

            if take == available.len() {
                self.chunks.pop_front();
                self.head_offset = 0;
            } else {
                self.head_offset += take;
            }
        }

        out[written..].fill(0);
        self.frames_played += written as u64;
        written
    }

    /// Pull exactly `frames` samples, padding with silence
    #[must_use]
    pub fn pull(&mut self, frames: usize) -> Vec<i16> {
        let mut out = vec![0; frames];
        self.pull_into(&mut out);
        out
    }

    /// Drop every pending chunk
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.head_offset = 0;
    }

    /// Samples still waiting to be played
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() - self.head_offset
    }

    /// Whether nothing is waiting to be played
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Real frames delivered since the last reset
    #[must_use]
    pub const fn frames_played(&self) -> u64 {
        self.frames_played
    }

    /// Reset the delivered-frames counter
    pub const fn reset_frame_count(&mut self) {
        self.frames_played = 0;
    }
}

/// Decode little-endian signed 16-bit PCM bytes
///
/// A trailing odd byte is dropped.
#[must_use]
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
