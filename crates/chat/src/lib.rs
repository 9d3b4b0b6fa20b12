//! The TrailVerse chat pipeline.
//!
//! [`ModelRelay`] turns a conversation plus gathered facts into one upstream
//! model call (with the Claude fallback ladder) and a uniform response.
//! [`ChatService`] drives a whole request: the anonymous session gate, fact
//! gathering, the relay, and usage recording.

pub mod error;
pub mod prompt;
pub mod relay;
pub mod service;

pub use error::{ChatError, RelayError};
pub use relay::{ModelRelay, RelayRequest, RelayResponse};
pub use service::{
    AnonymousChatResponse, CONVERSION_MESSAGE, ChatMetadata, ChatReply, ChatRequest, ChatService,
    SessionStatus,
};
