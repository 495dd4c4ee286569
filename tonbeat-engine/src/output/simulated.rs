//! Simulated audio output backend
//!
//! Tokio-task driver that models a real audio element: `Load` reports
//! metadata, `Play` starts the position clock, and `Ended` fires when the
//! position reaches the bound duration. Serves as the engine's headless
//! backend and as the test double for the playback controller.

use super::{output_channel, OutputCommand, OutputDriver, OutputEvent, OutputHandle};
use std::time::Duration;
use tonbeat_common::track::SourceHandle;
use tracing::debug;

const TICK: Duration = Duration::from_millis(50);

/// Headless, timer-driven audio output
pub struct SimulatedOutput;

impl SimulatedOutput {
    /// Real-time playback simulation
    pub fn spawn() -> OutputHandle {
        Self::spawn_with_rate(1.0)
    }

    /// Position advances at `rate` × wall clock (tests use a high rate)
    pub fn spawn_with_rate(rate: f64) -> OutputHandle {
        let (handle, driver) = output_channel();
        tokio::spawn(run(driver, rate));
        handle
    }
}

async fn run(mut driver: OutputDriver, rate: f64) {
    let mut loaded: Option<SourceHandle> = None;
    let mut playing = false;
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = driver.cmd_rx.recv() => {
                let Some(command) = command else {
                    // All handles dropped
                    break;
                };
                match command {
                    OutputCommand::Load { handle, duration_hint } => {
                        if handle.is_released() {
                            driver.emit(OutputEvent::Failed {
                                message: "source handle was released".to_string(),
                            });
                            continue;
                        }
                        let duration = duration_hint
                            .or_else(|| handle.duration_hint())
                            .unwrap_or(0.0);
                        driver.set_position(0.0);
                        driver.set_duration(duration);
                        debug!(duration, bytes = handle.byte_len(), "source bound");
                        loaded = Some(handle);
                        playing = false;
                        driver.emit(OutputEvent::MetadataReady { duration });
                    }
                    OutputCommand::Play => {
                        if loaded.is_some() {
                            playing = true;
                            driver.emit(OutputEvent::Started);
                        } else {
                            driver.emit(OutputEvent::Failed {
                                message: "no source bound".to_string(),
                            });
                        }
                    }
                    OutputCommand::Pause => playing = false,
                    OutputCommand::Seek(seconds) => {
                        let duration = driver.duration();
                        let target = if duration > 0.0 {
                            seconds.clamp(0.0, duration)
                        } else {
                            seconds.max(0.0)
                        };
                        driver.set_position(target);
                    }
                    // Audibility is out of scope for the simulation
                    OutputCommand::SetVolume(_) | OutputCommand::SetMuted(_) => {}
                    OutputCommand::Close => {
                        loaded = None;
                        playing = false;
                        driver.set_position(0.0);
                        driver.set_duration(0.0);
                    }
                }
            }
            _ = ticker.tick() => {
                if !playing {
                    continue;
                }
                let duration = driver.duration();
                let next = driver.position() + TICK.as_secs_f64() * rate;
                if duration > 0.0 && next >= duration {
                    driver.set_position(duration);
                    playing = false;
                    driver.emit(OutputEvent::Ended);
                } else {
                    driver.set_position(next);
                }
            }
        }
    }
}
