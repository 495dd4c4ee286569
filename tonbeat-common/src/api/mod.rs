//! Backend API module
//!
//! Request/response types for the HTTP endpoints consumed by the engine:
//! music generation, session and legacy listen recording, and API key
//! provisioning.

pub mod types;

pub use types::{
    ApiKeyResponse, GenerateStreamRequest, LegacyListenRequest, SessionListenRequest,
    SessionListenResponse,
};
