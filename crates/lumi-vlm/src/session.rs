use std::sync::Arc;

use log::{debug, warn};
use lumi_image::{ingest, IngestConfig, PlatformImage};

use crate::config::{ConfigError, GenerationConfig};
use crate::encoder::{EncodeError, VisionEncoder};
use crate::error::VlmError;
use crate::fragment::Fragment;
use crate::generation::{GenerationError, Generator, Step};
use crate::model::{LanguageModel, TextTokenizer};
use crate::queue::InputQueue;
use crate::state::{Operation, SessionError, SessionState};

/// A single inference session.
///
/// Owns its input queue, its generation cursor and its language model (with the
/// model's key/value cache). Mutating calls take `&mut self`, so a session has at
/// most one in-flight operation; independent sessions can live on different threads.
///
/// Every operation checks the state first and fails without side effects when the
/// operation is not legal. Only failures after the context was mutated move the
/// session to [`SessionState::Error`].
pub struct Session<M: LanguageModel> {
    state: SessionState,
    queue: InputQueue,
    generator: Generator,

    model: M,
    encoder: VisionEncoder,
    tokenizer: Arc<dyn TextTokenizer>,
    ingest_config: IngestConfig,
}

impl<M: LanguageModel> Session<M> {
    /// Create an uninitialized session around `model`.
    ///
    /// Fails when the encoder and the model disagree on the embedding width.
    pub fn new(
        model: M,
        encoder: VisionEncoder,
        tokenizer: Arc<dyn TextTokenizer>,
        ingest_config: IngestConfig,
        generation_config: GenerationConfig,
    ) -> Result<Self, VlmError> {
        if encoder.hidden_size() != model.hidden_size() {
            return Err(ConfigError::Invalid(format!(
                "vision encoder produces {}-wide embeddings but the model expects {}",
                encoder.hidden_size(),
                model.hidden_size()
            ))
            .into());
        }

        Ok(Self {
            state: SessionState::Uninitialized,
            queue: InputQueue::new(),
            generator: Generator::new(generation_config),
            model,
            encoder,
            tokenizer,
            ingest_config,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn queue(&self) -> &InputQueue {
        &self.queue
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn encoder(&self) -> &VisionEncoder {
        &self.encoder
    }

    pub fn tokenizer(&self) -> &Arc<dyn TextTokenizer> {
        &self.tokenizer
    }

    pub fn open(&mut self) -> Result<(), SessionError> {
        self.state.check(Operation::Open)?;
        self.transition(SessionState::AcceptingInput);
        Ok(())
    }

    /// Ingest, encode and enqueue an image.
    ///
    /// The state is checked before the handle is read. On failure nothing is enqueued.
    pub fn add_image<H: PlatformImage + ?Sized>(&mut self, handle: &H) -> Result<(), VlmError> {
        self.state.check(Operation::AddImage)?;
        let fragment = self.prepare_image(handle)?;
        self.queue.push(fragment)?;
        Ok(())
    }

    /// Ingest and encode an image without enqueueing it.
    pub fn prepare_image<H: PlatformImage + ?Sized>(
        &self,
        handle: &H,
    ) -> Result<Fragment, VlmError> {
        let buffer = ingest(handle, &self.ingest_config)?;
        let embeddings = self.encoder.encode(&buffer)?;
        debug!(
            "Prepared image {}x{} as {} embeddings",
            buffer.width(),
            buffer.height(),
            embeddings.len()
        );
        Ok(Fragment::image(embeddings))
    }

    /// Tokenize and enqueue a text run.
    pub fn add_text(&mut self, text: &str) -> Result<(), VlmError> {
        self.state.check(Operation::AddText)?;
        let tokens = self.tokenizer.tokenize(text)?;
        self.queue.push(Fragment::text(tokens)?)?;
        Ok(())
    }

    /// Enqueue already tokenized text.
    pub fn add_tokens(&mut self, tokens: Vec<u32>) -> Result<(), VlmError> {
        self.state.check(Operation::AddText)?;
        self.queue.push(Fragment::text(tokens)?)?;
        Ok(())
    }

    pub fn append(&mut self, fragment: Fragment) -> Result<(), VlmError> {
        self.state.check(Operation::Append)?;
        self.check_fragment(&fragment)?;
        self.queue.push(fragment)?;
        Ok(())
    }

    /// Enqueue several fragments at once, either all of them or none.
    pub fn append_all(&mut self, fragments: Vec<Fragment>) -> Result<(), VlmError> {
        self.state.check(Operation::Append)?;
        for fragment in &fragments {
            self.check_fragment(fragment)?;
        }
        self.queue.extend(fragments)?;
        Ok(())
    }

    pub fn start_generation(&mut self) -> Result<(), VlmError> {
        self.state.check(Operation::StartGeneration)?;
        if self.queue.is_empty() && self.generator.pending_token().is_none() {
            return Err(GenerationError::EmptyContext.into());
        }

        self.generator.begin();
        self.transition(SessionState::Generating);
        Ok(())
    }

    /// Produce the next token, or report why generation ended.
    ///
    /// Once done the session accepts input again.
    pub fn step(&mut self) -> Result<Step, VlmError> {
        self.state.check(Operation::Step)?;

        let result = self
            .generator
            .step(&mut self.queue, &mut self.model, self.tokenizer.as_ref());

        match result {
            Ok(Step::Done(reason)) => {
                debug!("Generation done: {reason:?}");
                self.generator.finish();
                self.transition(SessionState::AcceptingInput);
                Ok(Step::Done(reason))
            }
            Ok(step) => Ok(step),
            Err(e) if e.is_recoverable() => Err(e.into()),
            Err(e) => {
                self.fail(&e);
                Err(e.into())
            }
        }
    }

    /// End the current generation early. The context keeps what was generated.
    pub fn stop_generation(&mut self) -> Result<(), SessionError> {
        self.state.check(Operation::StopGeneration)?;
        self.generator.finish();
        self.transition(SessionState::AcceptingInput);
        Ok(())
    }

    /// Release the queue and the model cache. The session cannot be reused.
    pub fn close(&mut self) -> Result<(), SessionError> {
        self.state.check(Operation::Close)?;
        self.teardown();
        self.transition(SessionState::Closed);
        Ok(())
    }

    fn check_fragment(&self, fragment: &Fragment) -> Result<(), VlmError> {
        if let Fragment::Image(run) = fragment {
            let embeddings = run.embeddings();
            if embeddings.hidden_size() != self.model.hidden_size() {
                return Err(EncodeError::OutputShape {
                    actual: embeddings.tensor().dims().to_vec(),
                    vectors: embeddings.len(),
                    hidden: self.model.hidden_size(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: &GenerationError) {
        warn!("Session failed and cannot continue: {err}");
        self.teardown();
        self.state = SessionState::Error;
    }

    fn teardown(&mut self) {
        self.queue.clear();
        self.generator.reset();
        self.model.clear_kv_cache();
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {} -> {}", self.state, next);
        self.state = next;
    }
}

impl<M: LanguageModel + std::fmt::Debug> std::fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("queue", &self.queue.kinds())
            .field("generator", &self.generator)
            .field("model", &self.model)
            .finish()
    }
}
