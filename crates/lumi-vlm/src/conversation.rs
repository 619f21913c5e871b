use log::debug;
use lumi_image::PlatformImage;

use crate::error::VlmError;
use crate::fragment::Fragment;
use crate::model::LanguageModel;
use crate::prompt::{ChatTemplate, Line, Message, PromptConfig, PromptError, PromptSegment, Role};
use crate::session::Session;
use crate::state::Operation;

/// A chat on top of a [`Session`].
///
/// Keeps the transcript and the prompt text already handed to the session, so every
/// user turn only appends the newly rendered part of the history.
#[derive(Debug, Clone)]
pub struct Conversation {
    config: PromptConfig,
    template: ChatTemplate,
    transcript: Vec<Message>,
    system_prompt: Option<String>,
    clock: Option<String>,
    consumed: String, // rendered prompt text already in the session context
}

impl Conversation {
    pub fn new(config: PromptConfig, template: ChatTemplate) -> Self {
        Self {
            config,
            template,
            transcript: Vec::new(),
            system_prompt: None,
            clock: None,
            consumed: String::new(),
        }
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// The system prompt, once the first turn was submitted.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Stamp the system prompt of the next chat with a preformatted date and time.
    pub fn set_clock(&mut self, clock: impl Into<String>) {
        self.clock = Some(clock.into());
    }

    /// Append one user turn, with its images, to the session.
    ///
    /// Every image is ingested and encoded before anything is enqueued; on failure the
    /// session queue and the transcript are left unchanged.
    pub fn submit<M: LanguageModel>(
        &mut self,
        session: &mut Session<M>,
        text: &str,
        images: &[&dyn PlatformImage],
    ) -> Result<(), VlmError> {
        session.state().check(Operation::Append)?;
        if matches!(self.transcript.last(), Some(message) if message.role == Role::User) {
            return Err(PromptError::HistoryMismatch(
                "the previous user turn has no recorded response".to_string(),
            )
            .into());
        }

        let system_prompt = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.config.system_prompt(self.clock.as_deref()));

        let mut content = vec![Line::Image; images.len()];
        content.push(Line::Text {
            text: text.to_string(),
        });
        self.transcript.push(Message::user(content));

        match self.append_turn(session, &system_prompt, images) {
            Ok(rendered) => {
                self.consumed = rendered;
                self.system_prompt = Some(system_prompt);
                Ok(())
            }
            Err(e) => {
                self.transcript.pop();
                Err(e)
            }
        }
    }

    /// Record the assistant answer to the last user turn.
    pub fn record_response(&mut self, text: &str) -> Result<(), PromptError> {
        if !matches!(self.transcript.last(), Some(message) if message.role == Role::User) {
            return Err(PromptError::HistoryMismatch(
                "a response needs a preceding user turn".to_string(),
            ));
        }
        self.transcript.push(Message::assistant(text));
        self.consumed.push_str(text);
        Ok(())
    }

    /// Start a new chat. The session used so far should be closed by the caller.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.system_prompt = None;
        self.consumed.clear();
    }

    /// Replay the recent text history into a fresh session.
    ///
    /// Only the turns within the history window are kept and images are dropped; the
    /// transcript is trimmed to what the new session holds.
    pub fn resume_into<M: LanguageModel>(
        &mut self,
        session: &mut Session<M>,
    ) -> Result<(), VlmError> {
        session.state().check(Operation::Append)?;

        let mut history = self
            .config
            .history
            .select(&self.transcript)
            .iter()
            .map(Message::text_only)
            .collect::<Vec<_>>();
        if matches!(history.last(), Some(message) if message.role == Role::User) {
            history.pop();
        }

        let system_prompt = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.config.system_prompt(self.clock.as_deref()));

        let rendered = self.template.render(&history, Some(&system_prompt), false)?;
        let tokens = session.tokenizer().tokenize(&rendered)?;
        session.append_all(vec![Fragment::text(tokens)?])?;

        debug!(
            "Resumed {} of {} messages into a new session",
            history.len(),
            self.transcript.len()
        );

        self.transcript = history;
        self.system_prompt = Some(system_prompt);
        self.consumed = rendered;
        Ok(())
    }

    fn append_turn<M: LanguageModel>(
        &self,
        session: &mut Session<M>,
        system_prompt: &str,
        images: &[&dyn PlatformImage],
    ) -> Result<String, VlmError> {
        let rendered = self
            .template
            .render(&self.transcript, Some(system_prompt), true)?;
        let delta = rendered.strip_prefix(self.consumed.as_str()).ok_or_else(|| {
            PromptError::HistoryMismatch(
                "the rendered history diverged from the session context".to_string(),
            )
        })?;

        let segments = self.template.segments(delta);
        let markers = segments
            .iter()
            .filter(|segment| matches!(segment, PromptSegment::Image))
            .count();
        if markers != images.len() {
            return Err(PromptError::ImageCountMismatch {
                markers,
                images: images.len(),
            }
            .into());
        }

        let mut images = images.iter();
        let mut fragments = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                PromptSegment::Text(text) => {
                    let tokens = session.tokenizer().tokenize(&text)?;
                    if !tokens.is_empty() {
                        fragments.push(Fragment::text(tokens)?);
                    }
                }
                PromptSegment::Image => {
                    if let Some(handle) = images.next() {
                        fragments.push(session.prepare_image(*handle)?);
                    }
                }
            }
        }

        session.append_all(fragments)?;
        Ok(rendered)
    }
}
