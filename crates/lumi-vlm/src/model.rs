//! Collaborator interfaces for the numerical side of the engine.
//!
//! Weight loading and the transformer math live outside this crate; sessions only
//! talk to a language model and a tokenizer through these traits.

use candle_core::Tensor;

/// A causal language model with an internal key/value cache.
pub trait LanguageModel {
    /// Width of the token embedding space.
    fn hidden_size(&self) -> usize;

    /// Token ids that end a generation.
    fn eos_token_ids(&self) -> &[u32];

    /// Look up the embeddings of `tokens`, returning a `(tokens.len(), hidden_size)` tensor.
    fn embed_tokens(&self, tokens: &[u32]) -> candle_core::Result<Tensor>;

    /// Feed `embeds` of shape `(n, hidden_size)` starting at context position `index_pos`.
    ///
    /// Returns the logits for the fed positions, either `(n, vocab)` or only the
    /// last row `(vocab)`.
    fn forward(&mut self, embeds: &Tensor, index_pos: usize) -> candle_core::Result<Tensor>;

    /// Drop every cached position.
    fn clear_kv_cache(&mut self);
}

/// Error reported by a tokenizer.
#[derive(thiserror::Error, Debug)]
#[error("tokenizer error: {0}")]
pub struct TokenizerError(pub String);

/// Conversion between text and token ids.
pub trait TextTokenizer: Send + Sync {
    /// Split `text` into token ids without adding special tokens.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;

    /// Turn token ids back into text.
    fn detokenize(&self, tokens: &[u32]) -> Result<String, TokenizerError>;
}

impl TextTokenizer for tokenizers::Tokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let encoding = self
            .encode(text, false)
            .map_err(|e| TokenizerError(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        self.decode(tokens, false)
            .map_err(|e| TokenizerError(e.to_string()))
    }
}
