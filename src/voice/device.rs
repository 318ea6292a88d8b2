//! Audio device discovery and stream ownership
//!
//! `cpal::Stream` is not `Send` on every host, so each stream lives on a
//! dedicated thread and is driven through a command channel. The handles
//! returned here are `Send` and can be held by background tasks.

use std::sync::mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate};

use crate::{Error, Result};

/// An input device as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    /// Device name
    pub name: String,

    /// Whether this is the system default input device
    pub is_default: bool,
}

/// List input devices, marking the system default
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .map(|name| InputDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect();

    Ok(devices)
}

/// Resolve the input device to record from
///
/// Prefers the named device, then the system default, then the first device
/// that exposes input channels.
pub(crate) fn select_input_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(wanted) = name {
        let found = host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted));
        match found {
            Some(device) => return Ok(device),
            None => tracing::warn!(device = wanted, "configured input device not found, using default"),
        }
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }

    host.input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|d| d.supported_input_configs().is_ok_and(|mut c| c.next().is_some()))
        .ok_or_else(|| Error::Audio("no input device available".to_string()))
}

/// Whether a supported config range covers the requested mono-or-better rate
pub(crate) fn covers_rate(range: &cpal::SupportedStreamConfigRange, channels: u16, rate: u32) -> bool {
    range.channels() == channels
        && range.min_sample_rate() <= SampleRate(rate)
        && range.max_sample_rate() >= SampleRate(rate)
}

/// Commands accepted by a stream thread
#[derive(Debug, Clone, Copy)]
enum StreamCommand {
    Play,
    Pause,
}

/// A cpal stream owned by its own thread
pub(crate) struct StreamThread {
    commands: Option<mpsc::Sender<StreamCommand>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    /// Build a stream on a new thread and wait until it is ready
    ///
    /// The stream is created paused; call [`Self::play`] to start it.
    pub(crate) fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (commands, command_rx) = mpsc::channel::<StreamCommand>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.pause() {
                    tracing::debug!(error = %e, "stream does not support pausing");
                }
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = command_rx.recv() {
                    let outcome = match command {
                        StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
                        StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
                    };
                    if let Err(e) = outcome {
                        tracing::error!(error = %e, ?command, "stream command failed");
                    }
                }

                drop(stream);
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("stream thread exited before the stream was built".to_string()))??;

        Ok(Self {
            commands: Some(commands),
            handle: Some(handle),
        })
    }

    /// Start or resume the stream
    pub(crate) fn play(&self) -> Result<()> {
        self.send(StreamCommand::Play)
    }

    /// Pause the stream
    pub(crate) fn pause(&self) -> Result<()> {
        self.send(StreamCommand::Pause)
    }

    fn send(&self, command: StreamCommand) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or_else(|| Error::Audio("stream closed".to_string()))?
            .send(command)
            .map_err(|_| Error::Audio("stream thread is gone".to_string()))
    }

    /// Drop the stream and join its thread
    pub(crate) fn close(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.close();
    }
}
