use std::fmt;

use crate::encoder::EmbeddingSequence;
use crate::state::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Text,
    Image,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKind::Text => f.write_str("text"),
            FragmentKind::Image => f.write_str("image"),
        }
    }
}

/// A non-empty run of token ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextRun {
    tokens: Vec<u32>,
}

impl TextRun {
    pub fn new(tokens: Vec<u32>) -> Result<Self, SessionError> {
        if tokens.is_empty() {
            return Err(SessionError::EmptyFragment(FragmentKind::Text));
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }
}

/// The embeddings of one image, already in the language model space.
#[derive(Clone, Debug)]
pub struct ImageRun {
    embeddings: EmbeddingSequence,
}

impl ImageRun {
    pub fn embeddings(&self) -> &EmbeddingSequence {
        &self.embeddings
    }
}

impl From<EmbeddingSequence> for ImageRun {
    fn from(embeddings: EmbeddingSequence) -> Self {
        Self { embeddings }
    }
}

/// One ordered unit of session input.
///
/// Fragments are immutable once appended; their order reconstructs the prompt.
#[derive(Clone, Debug)]
pub enum Fragment {
    Text(TextRun),
    Image(ImageRun),
}

impl Fragment {
    /// Build a text fragment from token ids.
    pub fn text(tokens: Vec<u32>) -> Result<Self, SessionError> {
        Ok(Fragment::Text(TextRun::new(tokens)?))
    }

    /// Build an image fragment from encoded embeddings.
    pub fn image(embeddings: EmbeddingSequence) -> Self {
        Fragment::Image(embeddings.into())
    }

    pub fn kind(&self) -> FragmentKind {
        match self {
            Fragment::Text(_) => FragmentKind::Text,
            Fragment::Image(_) => FragmentKind::Image,
        }
    }

    /// Number of context positions the fragment occupies once folded.
    pub fn positions(&self) -> usize {
        match self {
            Fragment::Text(run) => run.tokens().len(),
            Fragment::Image(run) => run.embeddings().len(),
        }
    }
}
