//! Prompt tokenization and CLIP text embedding.

use ndarray::{Array2, Array3, Ix3};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use crate::error::{Error, Result};

use super::tensor::{extract_array, missing_output};

/// CLIP context length.
pub const MAX_TOKENS: usize = 77;

/// `<|endoftext|>` in the CLIP vocabulary, also used for padding.
const END_OF_TEXT_ID: u32 = 49_407;

/// Embeddings of shape `(batch, 77, hidden)`.
pub type TextEmbeddings = Array3<f32>;

/// Tokenizer plus the CLIP text encoder session.
pub struct TextEncoder {
    tokenizer: Tokenizer,
    session: Session,
    end_id: u32,
}

impl TextEncoder {
    /// Pair a tokenizer with its text encoder.
    #[must_use]
    pub fn new(tokenizer: Tokenizer, session: Session) -> Self {
        let end_id = tokenizer
            .token_to_id("<|endoftext|>")
            .unwrap_or(END_OF_TEXT_ID);

        Self {
            tokenizer,
            session,
            end_id,
        }
    }

    /// Embed a prompt as `(1, 77, hidden)`.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or inference fails.
    pub fn encode(&mut self, prompt: &str) -> Result<TextEmbeddings> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|err| Error::Tokenizer {
                reason: err.to_string(),
            })?;

        if encoding.get_ids().len() > MAX_TOKENS {
            tracing::warn!(
                "Prompt is {} tokens; truncating to {MAX_TOKENS}",
                encoding.get_ids().len()
            );
        }

        let ids = fit_to_context(encoding.get_ids(), self.end_id);
        let input_ids = Array2::from_shape_vec((1, MAX_TOKENS), ids).map_err(|_| {
            Error::ShapeMismatch {
                expected: format!("{MAX_TOKENS} token ids"),
                actual: "reshape failed".to_string(),
            }
        })?;

        let input_value =
            Tensor::from_array(input_ids).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("last_hidden_state"))?;

        extract_array::<Ix3>(&output)
    }
}

/// Truncate or pad token ids to exactly [`MAX_TOKENS`].
///
/// A truncated sequence keeps `end_id` as its last token; padding also uses
/// `end_id`, as SD 1.x was trained that way.
#[allow(clippy::cast_possible_wrap)]
fn fit_to_context(ids: &[u32], end_id: u32) -> Vec<i32> {
    let mut fitted: Vec<u32> = ids.iter().copied().take(MAX_TOKENS).collect();
    if ids.len() > MAX_TOKENS {
        fitted[MAX_TOKENS - 1] = end_id;
    }
    fitted.resize(MAX_TOKENS, end_id);

    // Safe: CLIP ids are below 49_408
    fitted.into_iter().map(|id| id as i32).collect()
}
