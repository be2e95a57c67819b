//! Ordered playback of agent audio clips.
//!
//! Clips are played strictly in arrival order, one at a time. The queue is
//! bounded: when it is full the newest clip is dropped with a warning, so a
//! slow output device degrades into skipped audio rather than unbounded
//! memory growth. A clip whose playback fails is skipped and never retried.

use anyhow::Result;
use std::io::Cursor;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

/// Something that can synchronously play one decoded-or-encoded audio clip
/// to completion. The production implementation is [`RodioPlayer`].
pub trait AudioPlayer {
    fn play(&mut self, clip: &[u8]) -> Result<()>;
}

/// Bounded FIFO of pending clips with a dedicated playback thread.
///
/// The player is constructed on the playback thread because audio output
/// handles (cpal streams underneath rodio) are not `Send`.
pub struct PlaybackQueue {
    tx: Option<SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackQueue {
    pub fn spawn<P, F>(make_player: F, capacity: usize) -> Self
    where
        P: AudioPlayer,
        F: FnOnce() -> Result<P> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(capacity);
        let worker = thread::spawn(move || {
            let mut player = match make_player() {
                Ok(player) => player,
                Err(e) => {
                    error!(error = ?e, "Audio output unavailable; discarding all clips");
                    while rx.recv().is_ok() {}
                    return;
                }
            };
            while let Ok(clip) = rx.recv() {
                if let Err(e) = player.play(&clip) {
                    warn!(error = ?e, "Skipping clip that failed to play");
                }
            }
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queues a clip for playback. Never blocks: a full queue drops this
    /// newest clip.
    pub fn enqueue(&self, clip: Vec<u8>) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(clip) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Playback queue full; dropping newest clip");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Playback thread gone; dropping clip");
            }
        }
    }

    /// Plays out everything already queued, then stops the worker.
    pub fn close(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Plays encoded clips (WAV or MP3) through the default output device.
pub struct RodioPlayer {
    _stream: rodio::OutputStream,
    sink: rodio::Sink,
}

impl RodioPlayer {
    pub fn new() -> Result<Self> {
        let (stream, handle) = rodio::OutputStream::try_default()?;
        let sink = rodio::Sink::try_new(&handle)?;
        Ok(Self {
            _stream: stream,
            sink,
        })
    }
}

impl AudioPlayer for RodioPlayer {
    fn play(&mut self, clip: &[u8]) -> Result<()> {
        let source = rodio::Decoder::new(Cursor::new(clip.to_vec()))?;
        self.sink.append(source);
        self.sink.sleep_until_end();
        Ok(())
    }
}
