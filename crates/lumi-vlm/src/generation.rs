use std::time::Instant;

use candle_core::{DType, IndexOp, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use log::{debug, info};

use crate::config::GenerationConfig;
use crate::encoder::has_non_finite;
use crate::fragment::Fragment;
use crate::model::{LanguageModel, TextTokenizer, TokenizerError};
use crate::queue::InputQueue;

/// Outcome of a single generation step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Token { id: u32, text: String },
    Done(DoneReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoneReason {
    /// The model sampled a stop token.
    EndOfSequence,
    /// `max_new_tokens` were produced.
    TokenBudget,
    /// The context cannot hold another position.
    ContextFull,
}

#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("generation error: folding {needed} positions at {used} exceeds the context capacity of {capacity}")]
    ContextOverflow {
        needed: usize,
        used: usize,
        capacity: usize,
    },

    #[error("generation error: nothing to generate from, the input queue is empty")]
    EmptyContext,

    #[error("generation error: invalid logits detected: {0}")]
    InvalidLogits(String),

    #[error("generation error: embedding width {actual} does not match the model hidden size {expected}")]
    HiddenSizeMismatch { expected: usize, actual: usize },

    #[error("generation error: {0}")]
    Model(#[from] candle_core::Error),

    /// The token is part of the context already; only its text is missing.
    #[error("tokenizer error: generated token {token} could not be decoded: {}", .source.0)]
    Detokenize { token: u32, source: TokenizerError },
}

impl GenerationError {
    /// Whether the session context is still consistent after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GenerationError::ContextOverflow { .. }
                | GenerationError::EmptyContext
                | GenerationError::Detokenize { .. }
        )
    }

    /// The token that was generated and folded into the context despite this error.
    pub fn generated_token(&self) -> Option<u32> {
        match self {
            GenerationError::Detokenize { token, .. } => Some(*token),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
    Text,
    Image,
    Generated,
}

/// One run of positions folded into the model context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextEntry {
    pub kind: ContextKind,
    pub positions: usize,
}

/// Folds queued input into the model and samples tokens.
pub struct Generator {
    config: GenerationConfig,
    logits_processor: LogitsProcessor,

    index_pos: usize, // index of the next position to be processed
    pending_token: Option<u32>,
    generated: usize,
    token_history: Vec<u32>,
    context_log: Vec<ContextEntry>,
    started: Option<Instant>,
}

impl Generator {
    pub fn new(config: GenerationConfig) -> Self {
        let sampling = &config.sampling;
        let logits_processor = if sampling.do_sample {
            LogitsProcessor::new(
                sampling.seed,
                Some(sampling.temperature),
                Some(sampling.top_p),
            )
        } else {
            LogitsProcessor::from_sampling(sampling.seed, Sampling::ArgMax)
        };

        Self {
            config,
            logits_processor,
            index_pos: 0,
            pending_token: None,
            generated: 0,
            token_history: Vec::new(),
            context_log: Vec::new(),
            started: None,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Positions already folded into the model context.
    pub fn index_pos(&self) -> usize {
        self.index_pos
    }

    /// The last emitted token, not yet fed back to the model.
    pub fn pending_token(&self) -> Option<u32> {
        self.pending_token
    }

    /// Tokens emitted by the current generation.
    pub fn generated(&self) -> usize {
        self.generated
    }

    /// Every run folded so far, in context order.
    pub fn context_log(&self) -> &[ContextEntry] {
        &self.context_log
    }

    /// Start counting a new generation.
    pub fn begin(&mut self) {
        self.generated = 0;
        self.started = Some(Instant::now());
    }

    /// Close the current generation and log its throughput.
    pub fn finish(&mut self) {
        if let Some(started) = self.started.take() {
            let dt = started.elapsed();
            info!(
                "{} tokens generated ({:.2} token/s), context at {}/{}",
                self.generated,
                self.generated as f64 / dt.as_secs_f64().max(f64::EPSILON),
                self.index_pos,
                self.config.max_context_positions,
            );
        }
    }

    /// Forget the whole context.
    pub fn reset(&mut self) {
        self.index_pos = 0;
        self.pending_token = None;
        self.generated = 0;
        self.token_history.clear();
        self.context_log.clear();
        self.started = None;
    }

    /// Fold everything queued into the context and produce the next token.
    ///
    /// Fails before touching the queue when the input cannot fit the context.
    pub fn step<M: LanguageModel + ?Sized>(
        &mut self,
        queue: &mut InputQueue,
        model: &mut M,
        tokenizer: &dyn TextTokenizer,
    ) -> Result<Step, GenerationError> {
        if self.generated >= self.config.max_new_tokens {
            return Ok(Step::Done(DoneReason::TokenBudget));
        }

        let needed = queue.pending_positions() + usize::from(self.pending_token.is_some());
        if needed == 0 {
            return Err(GenerationError::EmptyContext);
        }

        let capacity = self.config.max_context_positions;
        if self.index_pos + needed > capacity {
            if queue.is_empty() {
                return Ok(Step::Done(DoneReason::ContextFull));
            }
            return Err(GenerationError::ContextOverflow {
                needed,
                used: self.index_pos,
                capacity,
            });
        }

        let embeds = self.fold(queue, model)?;
        let logits = model.forward(&embeds, self.index_pos)?;
        self.index_pos += needed;

        let token = self.sample(&logits)?;

        let is_eos = model.eos_token_ids().contains(&token)
            || self.config.extra_stop_tokens.contains(&token);
        if is_eos {
            return Ok(Step::Done(DoneReason::EndOfSequence));
        }

        self.pending_token = Some(token);
        self.token_history.push(token);
        self.generated += 1;

        let text = tokenizer
            .detokenize(&[token])
            .map_err(|source| GenerationError::Detokenize { token, source })?;
        Ok(Step::Token { id: token, text })
    }

    /// Drain the queue and build the `(positions, hidden)` input for the model.
    fn fold<M: LanguageModel + ?Sized>(
        &mut self,
        queue: &mut InputQueue,
        model: &mut M,
    ) -> Result<Tensor, GenerationError> {
        let fragments = queue.drain_all();
        debug!(
            "Folding {} fragments at position {}",
            fragments.len(),
            self.index_pos
        );

        let mut parts = Vec::with_capacity(fragments.len() + 1);
        if let Some(token) = self.pending_token.take() {
            parts.push(model.embed_tokens(&[token])?);
            self.context_log.push(ContextEntry {
                kind: ContextKind::Generated,
                positions: 1,
            });
        }

        for fragment in &fragments {
            match fragment {
                Fragment::Text(run) => {
                    parts.push(model.embed_tokens(run.tokens())?);
                    self.token_history.extend_from_slice(run.tokens());
                    self.context_log.push(ContextEntry {
                        kind: ContextKind::Text,
                        positions: run.tokens().len(),
                    });
                }
                Fragment::Image(run) => {
                    parts.push(run.embeddings().tensor().clone());
                    self.context_log.push(ContextEntry {
                        kind: ContextKind::Image,
                        positions: run.embeddings().len(),
                    });
                }
            }
        }

        let expected = model.hidden_size();
        let dtype = parts.first().map(|t| t.dtype()).unwrap_or(DType::F32);
        let parts = parts
            .into_iter()
            .map(|part| {
                let (_, actual) = part.dims2()?;
                if actual != expected {
                    return Err(GenerationError::HiddenSizeMismatch { expected, actual });
                }
                Ok(part.to_dtype(dtype)?)
            })
            .collect::<Result<Vec<_>, GenerationError>>()?;

        Ok(Tensor::cat(&parts, 0)?)
    }

    fn sample(&mut self, raw_logits: &Tensor) -> Result<u32, GenerationError> {
        let last_logit = match raw_logits.rank() {
            1 => raw_logits.clone(),
            2 => {
                let (s, _vocab) = raw_logits.dims2()?;
                if s == 0 {
                    return Err(GenerationError::InvalidLogits(
                        "model returned logits for no position".to_string(),
                    ));
                }
                raw_logits.i((s - 1, ..))?
            }
            _ => {
                return Err(GenerationError::InvalidLogits(format!(
                    "unexpected logits shape {:?}",
                    raw_logits.dims()
                )))
            }
        };
        let last_logit = last_logit.to_dtype(DType::F32)?;

        let sampling = &self.config.sampling;
        let output_logit = if sampling.do_sample {
            let start_at = self
                .token_history
                .len()
                .saturating_sub(sampling.repeat_last_n);
            candle_transformers::utils::apply_repeat_penalty(
                &last_logit,
                sampling.repeat_penalty,
                &self.token_history[start_at..],
            )?
        } else {
            last_logit
        };

        if has_non_finite(&output_logit)? {
            return Err(GenerationError::InvalidLogits(
                "Non-finite values (NaN or +/-Inf) found in logits".to_string(),
            ));
        }

        Ok(self.logits_processor.sample(&output_logit)?)
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("config", &self.config)
            .field("index_pos", &self.index_pos)
            .field("pending_token", &self.pending_token)
            .field("generated", &self.generated)
            .finish()
    }
}
