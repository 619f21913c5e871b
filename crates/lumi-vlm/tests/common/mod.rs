#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use lumi_image::{ImageSize, PixelLayout, RasterImage};
use lumi_vlm::{
    DoneReason, EngineConfig, GenerationConfig, LanguageModel, PatchProjector, SamplingConfig,
    Session, Step, TextTokenizer, TokenizerError, VisionEncoder, VisionTower, VlmError,
};

pub const HIDDEN: usize = 8;
pub const INPUT_SIZE: usize = 32;
pub const GRID: usize = 2;
pub const IMAGE_VECTORS: usize = GRID * GRID;

pub const EOS: u32 = 1;
const OFFSET: u32 = 3;
const VOCAB: usize = 256 + OFFSET as usize;

/// One token per byte, ids below `OFFSET` are special.
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        Ok(text.bytes().map(|b| b as u32 + OFFSET).collect())
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let bytes = tokens
            .iter()
            .filter(|t| **t >= OFFSET)
            .map(|t| (t - OFFSET) as u8)
            .collect::<Vec<_>>();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// A single forward call seen by [`ScriptedModel`].
#[derive(Debug, Clone)]
pub struct ForwardCall {
    pub index_pos: usize,
    /// First component of every fed embedding row.
    pub rows: Vec<f32>,
}

/// Replies with scripted text, one reply per generation, each followed by EOS.
///
/// Token embeddings are rows filled with the token id, so folded text can be
/// recognized in [`ForwardCall::rows`]. Fails when fed a non contiguous position.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: VecDeque<u32>,
    pub calls: Vec<ForwardCall>,
    pub cache_len: usize,
    pub cache_clears: usize,
    pub fail_at_call: Option<usize>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        let mut script = VecDeque::new();
        for reply in replies {
            script.extend(reply.bytes().map(|b| b as u32 + OFFSET));
            script.push_back(EOS);
        }
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at_call = Some(call);
        self
    }
}

impl LanguageModel for ScriptedModel {
    fn hidden_size(&self) -> usize {
        HIDDEN
    }

    fn eos_token_ids(&self) -> &[u32] {
        &[EOS]
    }

    fn embed_tokens(&self, tokens: &[u32]) -> candle_core::Result<Tensor> {
        let data = tokens
            .iter()
            .flat_map(|t| std::iter::repeat(*t as f32).take(HIDDEN))
            .collect::<Vec<_>>();
        Tensor::from_vec(data, (tokens.len(), HIDDEN), &Device::Cpu)
    }

    fn forward(&mut self, embeds: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        if self.fail_at_call == Some(self.calls.len()) {
            candle_core::bail!("scripted failure at call {}", self.calls.len());
        }
        if index_pos != self.cache_len {
            candle_core::bail!("expected position {}, got {index_pos}", self.cache_len);
        }

        let (n, _) = embeds.dims2()?;
        let rows = embeds
            .to_vec2::<f32>()?
            .into_iter()
            .map(|row| row[0])
            .collect();
        self.calls.push(ForwardCall { index_pos, rows });
        self.cache_len += n;

        let next = self.script.pop_front().unwrap_or(EOS);
        let mut logits = vec![0f32; VOCAB];
        logits[next as usize] = 10.0;
        Tensor::from_vec(logits, VOCAB, &Device::Cpu)
    }

    fn clear_kv_cache(&mut self) {
        self.cache_len = 0;
        self.cache_clears += 1;
    }
}

/// How [`FlakyTower`] misbehaves while it still has failures left.
#[derive(Debug, Clone, Copy)]
pub enum TowerFault {
    /// `forward` returns an error.
    Error,
    /// `forward` returns one vector too few.
    Truncated,
    /// `forward` returns NaN embeddings.
    NonFinite,
}

/// The test tower, broken for its first `failures` calls.
pub struct FlakyTower {
    inner: PatchProjector,
    fault: TowerFault,
    failures: AtomicUsize,
}

impl FlakyTower {
    pub fn new(fault: TowerFault, failures: usize) -> Self {
        Self {
            inner: PatchProjector::new(INPUT_SIZE, GRID, HIDDEN, 0, &Device::Cpu).unwrap(),
            fault,
            failures: AtomicUsize::new(failures),
        }
    }
}

impl VisionTower for FlakyTower {
    fn input_size(&self) -> usize {
        self.inner.input_size()
    }

    fn num_vectors(&self) -> usize {
        self.inner.num_vectors()
    }

    fn hidden_size(&self) -> usize {
        self.inner.hidden_size()
    }

    fn forward(&self, pixel_values: &Tensor) -> candle_core::Result<Tensor> {
        let out = self.inner.forward(pixel_values)?;
        let left = self.failures.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(out);
        }
        self.failures.store(left - 1, Ordering::SeqCst);

        match self.fault {
            TowerFault::Error => candle_core::bail!("tower out of memory"),
            TowerFault::Truncated => out.narrow(0, 0, IMAGE_VECTORS - 1),
            TowerFault::NonFinite => out.affine(f64::NAN, 0.0),
        }
    }
}

pub fn flaky_encoder(fault: TowerFault, failures: usize) -> VisionEncoder {
    VisionEncoder::new(
        Arc::new(FlakyTower::new(fault, failures)),
        Default::default(),
        &Device::Cpu,
    )
    .unwrap()
}

/// [`ByteTokenizer`] that cannot decode its first `failures` tokens.
pub struct FlakyTokenizer {
    failures: AtomicUsize,
}

impl FlakyTokenizer {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
        }
    }
}

impl TextTokenizer for FlakyTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        ByteTokenizer.tokenize(text)
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(TokenizerError("boom".to_string()));
        }
        ByteTokenizer.detokenize(tokens)
    }
}

pub fn tower() -> Arc<dyn VisionTower> {
    Arc::new(PatchProjector::new(INPUT_SIZE, GRID, HIDDEN, 0, &Device::Cpu).unwrap())
}

pub fn encoder() -> VisionEncoder {
    VisionEncoder::new(tower(), Default::default(), &Device::Cpu).unwrap()
}

pub fn tokenizer() -> Arc<dyn TextTokenizer> {
    Arc::new(ByteTokenizer)
}

/// Greedy decoding with generous limits.
pub fn config() -> EngineConfig {
    EngineConfig {
        generation: GenerationConfig {
            max_new_tokens: 64,
            max_context_positions: 2048,
            sampling: SamplingConfig {
                do_sample: false,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn session_with(model: ScriptedModel, config: &EngineConfig) -> Session<ScriptedModel> {
    build_session(model, encoder(), tokenizer(), config)
}

pub fn build_session(
    model: ScriptedModel,
    encoder: VisionEncoder,
    tokenizer: Arc<dyn TextTokenizer>,
    config: &EngineConfig,
) -> Session<ScriptedModel> {
    let mut session = Session::new(
        model,
        encoder,
        tokenizer,
        config.ingest.clone(),
        config.generation.clone(),
    )
    .unwrap();
    session.open().unwrap();
    session
}

pub fn open_session(model: ScriptedModel) -> Session<ScriptedModel> {
    session_with(model, &config())
}

/// A 48x24 RGBA image, left half red, right half blue.
pub fn two_tone() -> RasterImage {
    let size = ImageSize {
        width: 48,
        height: 24,
    };
    let mut data = Vec::with_capacity(size.area() * 4);
    for _y in 0..size.height {
        for x in 0..size.width {
            if x < size.width / 2 {
                data.extend_from_slice(&[255, 0, 0, 255]);
            } else {
                data.extend_from_slice(&[0, 0, 255, 255]);
            }
        }
    }
    RasterImage::new(size, PixelLayout::Rgba8, data)
}

/// Step until the generation ends, returning the text and the reason.
pub fn generate(session: &mut Session<ScriptedModel>) -> Result<(String, DoneReason), VlmError> {
    let mut text = String::new();
    for _ in 0..1024 {
        match session.step()? {
            Step::Token { text: piece, .. } => text.push_str(&piece),
            Step::Done(reason) => return Ok((text, reason)),
        }
    }
    panic!("generation did not terminate");
}
