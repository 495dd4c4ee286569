//! # Tonbeat Common Library
//!
//! Shared code for the Tonbeat playback & session engine including:
//! - Track and collection data model
//! - Session / legacy API key credential types
//! - Backend API request/response types
//! - Player events and the read-only state snapshot
//! - Configuration loading
//! - Utility functions

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod time;
pub mod track;

pub use auth::{LegacyApiKey, MusicAuth, SessionData};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{Direction, EventBus, PlaybackPhase, PlayerEvent, PlayerSnapshot};
pub use track::{Collection, SourceHandle, Track, TrackKey};
