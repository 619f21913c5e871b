use lumi_image::ImageError;

use crate::config::ConfigError;
use crate::encoder::EncodeError;
use crate::engine::SessionId;
use crate::generation::GenerationError;
use crate::model::TokenizerError;
use crate::prompt::PromptError;
use crate::state::SessionError;

/// Any error surfaced by the engine.
#[derive(thiserror::Error, Debug)]
pub enum VlmError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid session: {0} does not exist")]
    InvalidSession(SessionId),
}

/// Coarse error classes with stable status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidHandle,
    Decode,
    Encode,
    SessionState,
    SessionClosed,
    Allocation,
    Generation,
    InvalidSession,
    Tokenizer,
    Template,
    Config,
    InvalidInput,
}

impl ErrorKind {
    /// Non-zero status code reported at the boundary. `0` is reserved for success.
    pub fn status_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidHandle => 1,
            ErrorKind::Decode => 2,
            ErrorKind::Encode => 3,
            ErrorKind::SessionState => 4,
            ErrorKind::SessionClosed => 5,
            ErrorKind::Allocation => 6,
            ErrorKind::Generation => 7,
            ErrorKind::InvalidSession => 8,
            ErrorKind::Tokenizer => 9,
            ErrorKind::Template => 10,
            ErrorKind::Config => 11,
            ErrorKind::InvalidInput => 12,
        }
    }
}

fn image_kind(err: &ImageError) -> ErrorKind {
    match err {
        ImageError::InvalidHandle(_) => ErrorKind::InvalidHandle,
        ImageError::Allocation { .. } => ErrorKind::Allocation,
        _ => ErrorKind::Decode,
    }
}

impl VlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VlmError::Image(e) => image_kind(e),
            VlmError::Encode(EncodeError::Image(e)) => image_kind(e),
            VlmError::Encode(_) => ErrorKind::Encode,
            VlmError::Session(e) => match e {
                SessionError::InvalidState { .. } => ErrorKind::SessionState,
                SessionError::Closed { .. } => ErrorKind::SessionClosed,
                SessionError::EmptyFragment(_) => ErrorKind::InvalidInput,
                SessionError::Allocation(_) => ErrorKind::Allocation,
            },
            VlmError::Generation(GenerationError::Detokenize { .. }) => ErrorKind::Tokenizer,
            VlmError::Generation(_) => ErrorKind::Generation,
            VlmError::Tokenizer(_) => ErrorKind::Tokenizer,
            VlmError::Prompt(e) => match e {
                PromptError::Template(_) => ErrorKind::Template,
                PromptError::ImageCountMismatch { .. } => ErrorKind::InvalidInput,
                PromptError::HistoryMismatch(_) => ErrorKind::SessionState,
            },
            VlmError::Config(_) => ErrorKind::Config,
            VlmError::InvalidSession(_) => ErrorKind::InvalidSession,
        }
    }

    pub fn status_code(&self) -> i32 {
        self.kind().status_code()
    }
}

/// Status code plus message, the shape expected by foreign callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub code: i32,
    pub message: Option<String>,
}

impl Status {
    pub const OK: Status = Status {
        code: 0,
        message: None,
    };

    /// Fold an engine result into a status.
    ///
    /// ```
    /// use lumi_vlm::{Status, VlmError};
    ///
    /// let ok: Result<(), VlmError> = Ok(());
    /// assert_eq!(Status::from_result(&ok), Status::OK);
    /// ```
    pub fn from_result<T>(result: &Result<T, VlmError>) -> Self {
        match result {
            Ok(_) => Self::OK,
            Err(e) => e.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<&VlmError> for Status {
    fn from(err: &VlmError) -> Self {
        Self {
            code: err.status_code(),
            message: Some(err.to_string()),
        }
    }
}
