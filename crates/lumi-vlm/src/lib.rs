//! # Lumi multimodal inference sessions
//!
//! On-device inference sessions for vision-language models: images and text are
//! appended to a session as ordered fragments, then folded into the model context
//! and decoded one token at a time.
//!
//! - Images go through [`lumi_image::ingest`] and the [`VisionEncoder`] before they
//!   are queued, so a queued image is always a ready-made embedding sequence.
//! - A [`Session`] enforces its lifecycle on every call and fails fast without
//!   partial work.
//! - The [`Engine`] keeps sessions behind opaque [`SessionId`] handles and reports
//!   failures as stable [`Status`] codes.
//! - [`Conversation`] renders chat turns with a jinja [`ChatTemplate`].
//!
//! The transformer itself is supplied by the caller through [`LanguageModel`],
//! [`VisionTower`] and [`TextTokenizer`].

/// Engine configuration and its JSON loading.
pub mod config;

/// Multi-turn chats on top of a session.
pub mod conversation;

/// Pixel buffer to embedding adapter.
pub mod encoder;

/// Session registry with handle based boundary operations.
pub mod engine;

/// Error taxonomy and status codes.
pub mod error;

/// Ordered session input.
pub mod fragment;

/// Token generation over the session context.
pub mod generation;

/// Language model and tokenizer interfaces.
pub mod model;

/// A deterministic patch projecting vision tower.
pub mod projector;

/// Chat templates, personas and history windows.
pub mod prompt;

/// FIFO queue of pending fragments.
pub mod queue;

/// Inference sessions.
pub mod session;

/// Session lifecycle.
pub mod state;

pub use crate::config::{ConfigError, EngineConfig, GenerationConfig, SamplingConfig};
pub use crate::conversation::Conversation;
pub use crate::encoder::{
    EmbeddingSequence, EncodeError, VisionEncoder, VisionEncoderConfig, VisionTower,
};
pub use crate::engine::{Engine, SessionId};
pub use crate::error::{ErrorKind, Status, VlmError};
pub use crate::fragment::{Fragment, FragmentKind};
pub use crate::generation::{DoneReason, GenerationError, Step};
pub use crate::model::{LanguageModel, TextTokenizer, TokenizerError};
pub use crate::projector::PatchProjector;
pub use crate::prompt::{
    ChatTemplate, HistoryWindow, Line, Message, Persona, PromptConfig, PromptError, Role,
};
pub use crate::queue::InputQueue;
pub use crate::session::Session;
pub use crate::state::{Operation, SessionError, SessionState};
