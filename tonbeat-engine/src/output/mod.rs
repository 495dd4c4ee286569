//! Audio output abstraction
//!
//! The playback controller is decoupled from any concrete playback
//! primitive: commands flow one-to-one over an mpsc channel and the
//! output reports back through a small set of named broadcast events
//! (`MetadataReady`, `Started`, `Ended`, `Failed`). Playback position is
//! published through shared atomics and is the engine's single
//! authoritative time source.

pub mod simulated;

pub use simulated::SimulatedOutput;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tonbeat_common::track::SourceHandle;
use tracing::warn;

/// Commands accepted by an audio output backend
#[derive(Debug, Clone)]
pub enum OutputCommand {
    /// Bind a source; playback starts on a subsequent `Play`
    Load {
        handle: SourceHandle,
        /// Seconds, when known ahead of decoding
        duration_hint: Option<f64>,
    },
    Play,
    Pause,
    /// Absolute position in seconds, clamped to the bound duration
    Seek(f64),
    SetVolume(f32),
    SetMuted(bool),
    /// Unbind the source and reset; the backend task stays alive
    Close,
}

/// Events emitted by an audio output backend
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// Duration became known for the bound source
    MetadataReady { duration: f64 },
    /// Audible playback began (also after resume)
    Started,
    /// The bound source played to its end
    Ended,
    /// The backend could not bind or continue playback
    Failed { message: String },
}

/// Clone-able façade over an audio output backend
#[derive(Debug, Clone)]
pub struct OutputHandle {
    cmd_tx: mpsc::UnboundedSender<OutputCommand>,
    events: broadcast::Sender<OutputEvent>,
    position_ms: Arc<AtomicU64>,
    duration_ms: Arc<AtomicU64>,
}

impl OutputHandle {
    pub fn send(&self, command: OutputCommand) {
        if self.cmd_tx.send(command).is_err() {
            warn!("audio output command dropped: backend task gone");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.events.subscribe()
    }

    /// Reported playback position in seconds
    pub fn position(&self) -> f64 {
        self.position_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Reported duration in seconds (0.0 while unknown)
    pub fn duration(&self) -> f64 {
        self.duration_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Backend half of the output channel pair
pub struct OutputDriver {
    pub cmd_rx: mpsc::UnboundedReceiver<OutputCommand>,
    events: broadcast::Sender<OutputEvent>,
    position_ms: Arc<AtomicU64>,
    duration_ms: Arc<AtomicU64>,
}

impl OutputDriver {
    pub fn emit(&self, event: OutputEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn position(&self) -> f64 {
        self.position_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn set_position(&self, seconds: f64) {
        self.position_ms
            .store((seconds.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn duration(&self) -> f64 {
        self.duration_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn set_duration(&self, seconds: f64) {
        self.duration_ms
            .store((seconds.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
    }
}

/// Create a connected handle/driver pair for an output backend
pub fn output_channel() -> (OutputHandle, OutputDriver) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(64);
    let position_ms = Arc::new(AtomicU64::new(0));
    let duration_ms = Arc::new(AtomicU64::new(0));

    let handle = OutputHandle {
        cmd_tx,
        events: events.clone(),
        position_ms: Arc::clone(&position_ms),
        duration_ms: Arc::clone(&duration_ms),
    };
    let driver = OutputDriver {
        cmd_rx,
        events,
        position_ms,
        duration_ms,
    };
    (handle, driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_position_is_shared() {
        let (handle, driver) = output_channel();
        driver.set_position(12.5);
        driver.set_duration(180.0);
        assert_eq!(handle.position(), 12.5);
        assert_eq!(handle.duration(), 180.0);
    }

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let (handle, driver) = output_channel();
        let mut rx = handle.subscribe();
        driver.emit(OutputEvent::Started);
        assert!(matches!(rx.recv().await.unwrap(), OutputEvent::Started));
    }

    #[tokio::test]
    async fn test_commands_reach_driver() {
        let (handle, mut driver) = output_channel();
        handle.send(OutputCommand::Play);
        assert!(matches!(
            driver.cmd_rx.recv().await.unwrap(),
            OutputCommand::Play
        ));
    }
}
