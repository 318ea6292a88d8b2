//! Conversational turn state
//!
//! The state and an epoch share one atomic word. Every barge-in, start and
//! exit advances the epoch; background work carries the epoch it was
//! started under and can only move the state while that epoch is current,
//! so late results from a superseded turn are dropped.

use std::sync::atomic::{AtomicU64, Ordering};

const STATE_BITS: u32 = 8;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

/// Where the current turn is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TurnState {
    /// Nothing in progress
    Idle = 0,

    /// Capturing the microphone
    Listening = 1,

    /// Take finished, waiting on transcription or the reply
    Transcribing = 2,

    /// Reply audio queued or playing
    Speaking = 3,
}

impl TurnState {
    const fn from_bits(bits: u64) -> Self {
        match bits {
            1 => Self::Listening,
            2 => Self::Transcribing,
            3 => Self::Speaking,
            _ => Self::Idle,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn pack(epoch: u64, state: TurnState) -> u64 {
    (epoch << STATE_BITS) | state as u64
}

const fn unpack(word: u64) -> (u64, TurnState) {
    (word >> STATE_BITS, TurnState::from_bits(word & STATE_MASK))
}

/// Epoch-stamped turn state
#[derive(Debug, Default)]
pub struct TurnTracker(AtomicU64);

impl TurnTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Current epoch and state
    #[must_use]
    pub fn snapshot(&self) -> (u64, TurnState) {
        unpack(self.0.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn state(&self) -> TurnState {
        self.snapshot().1
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.snapshot().0
    }

    /// Whether `epoch` has not been superseded
    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Start a new epoch in state `to`, returning the new epoch
    pub fn advance(&self, to: TurnState) -> u64 {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (epoch, _) = unpack(word);
                Some(pack(epoch.wrapping_add(1) & (u64::MAX >> STATE_BITS), to))
            })
            .unwrap_or_else(|word| word);
        let (epoch, _) = unpack(previous);
        epoch.wrapping_add(1) & (u64::MAX >> STATE_BITS)
    }

    /// Move `from -> to` only if both the epoch and the state match
    pub fn transition(&self, epoch: u64, from: TurnState, to: TurnState) -> bool {
        self.0
            .compare_exchange(pack(epoch, from), pack(epoch, to), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Set the state if `epoch` is still current, whatever it was
    pub fn settle(&self, epoch: u64, to: TurnState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                (unpack(word).0 == epoch).then(|| pack(epoch, to))
            })
            .is_ok()
    }
}
