use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use candle_core::Device;
use log::info;
use lumi_image::{ImageError, PlatformImage};

use crate::config::EngineConfig;
use crate::encoder::{VisionEncoder, VisionTower};
use crate::error::VlmError;
use crate::generation::Step;
use crate::model::{LanguageModel, TextTokenizer};
use crate::session::Session;
use crate::state::{Operation, SessionError, SessionState};

/// Opaque handle of a session owned by an [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session #{}", self.0)
    }
}

/// Registry of sessions sharing one vision encoder and one tokenizer.
///
/// Exposes the boundary operations by session handle. Handles of closed sessions are
/// remembered so that using them reports a closed session rather than an unknown one.
pub struct Engine<M: LanguageModel> {
    encoder: VisionEncoder,
    tokenizer: Arc<dyn TextTokenizer>,
    config: EngineConfig,

    sessions: HashMap<SessionId, Session<M>>,
    closed: HashSet<SessionId>,
    next_id: u64,
}

impl<M: LanguageModel> Engine<M> {
    pub fn new(
        tower: Arc<dyn VisionTower>,
        tokenizer: Arc<dyn TextTokenizer>,
        config: EngineConfig,
        device: &Device,
    ) -> Result<Self, VlmError> {
        config.validate()?;
        let encoder = VisionEncoder::new(tower, config.encoder.clone(), device)?;

        Ok(Self {
            encoder,
            tokenizer,
            config,
            sessions: HashMap::new(),
            closed: HashSet::new(),
            next_id: 1,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn encoder(&self) -> &VisionEncoder {
        &self.encoder
    }

    pub fn tokenizer(&self) -> &Arc<dyn TextTokenizer> {
        &self.tokenizer
    }

    /// Number of open sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Create and open a session running `model`.
    pub fn open_session(&mut self, model: M) -> Result<SessionId, VlmError> {
        let mut session = Session::new(
            model,
            self.encoder.clone(),
            self.tokenizer.clone(),
            self.config.ingest.clone(),
            self.config.generation.clone(),
        )?;
        session.open()?;

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, session);

        info!("Opened {id}, {} live sessions", self.sessions.len());
        Ok(id)
    }

    pub fn state(&self, id: SessionId) -> Result<SessionState, VlmError> {
        if self.closed.contains(&id) {
            return Ok(SessionState::Closed);
        }
        self.sessions
            .get(&id)
            .map(Session::state)
            .ok_or(VlmError::InvalidSession(id))
    }

    pub fn session(&self, id: SessionId) -> Result<&Session<M>, VlmError> {
        if self.closed.contains(&id) {
            return Err(closed(Operation::Append));
        }
        self.sessions.get(&id).ok_or(VlmError::InvalidSession(id))
    }

    pub fn session_mut(&mut self, id: SessionId) -> Result<&mut Session<M>, VlmError> {
        self.live_mut(id, Operation::Append)
    }

    /// Add an image to a session. `None` stands for a null platform handle.
    pub fn add_image(
        &mut self,
        id: SessionId,
        handle: Option<&dyn PlatformImage>,
    ) -> Result<(), VlmError> {
        let session = self.live_mut(id, Operation::AddImage)?;
        session.state().check(Operation::AddImage)?;

        let handle =
            handle.ok_or_else(|| ImageError::InvalidHandle("null image handle".to_string()))?;
        session.add_image(handle)
    }

    pub fn add_text(&mut self, id: SessionId, text: &str) -> Result<(), VlmError> {
        self.live_mut(id, Operation::AddText)?.add_text(text)
    }

    pub fn start_generation(&mut self, id: SessionId) -> Result<(), VlmError> {
        self.live_mut(id, Operation::StartGeneration)?
            .start_generation()
    }

    pub fn next_token(&mut self, id: SessionId) -> Result<Step, VlmError> {
        self.live_mut(id, Operation::Step)?.step()
    }

    pub fn stop_generation(&mut self, id: SessionId) -> Result<(), VlmError> {
        Ok(self
            .live_mut(id, Operation::StopGeneration)?
            .stop_generation()?)
    }

    /// Close a session and release everything it owns.
    ///
    /// The handle is released even when the session had already failed.
    pub fn close_session(&mut self, id: SessionId) -> Result<(), VlmError> {
        if self.closed.contains(&id) {
            return Err(closed(Operation::Close));
        }
        let mut session = self
            .sessions
            .remove(&id)
            .ok_or(VlmError::InvalidSession(id))?;

        let result = session.close();
        drop(session);
        self.closed.insert(id);

        info!("Closed {id}, {} live sessions", self.sessions.len());
        Ok(result?)
    }

    fn live_mut(&mut self, id: SessionId, op: Operation) -> Result<&mut Session<M>, VlmError> {
        if self.closed.contains(&id) {
            return Err(closed(op));
        }
        self.sessions
            .get_mut(&id)
            .ok_or(VlmError::InvalidSession(id))
    }
}

fn closed(op: Operation) -> VlmError {
    SessionError::Closed {
        op,
        state: SessionState::Closed,
    }
    .into()
}

impl<M: LanguageModel> fmt::Debug for Engine<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("encoder", &self.encoder)
            .field("live_sessions", &self.sessions.len())
            .field("closed_sessions", &self.closed.len())
            .finish()
    }
}
