//! Classifier-free guidance for steering generation towards the prompt.

use ndarray::{s, Array4};

use super::vae::LatentTensor;

/// Whether a guidance scale needs the unconditional pass at all.
///
/// At 1.0 or below the guided prediction equals (or undershoots) the
/// text-conditioned one, so only the conditioned pass is run.
#[must_use]
pub fn uses_guidance(guidance_scale: f32) -> bool {
    guidance_scale > 1.0
}

/// Split a batch-of-two noise prediction into `(unconditional, text)` halves.
#[must_use]
pub fn split_batch(noise_pred: &LatentTensor) -> (LatentTensor, LatentTensor) {
    let uncond = noise_pred.slice(s![0..1, .., .., ..]).to_owned();
    let text = noise_pred.slice(s![1..2, .., .., ..]).to_owned();
    (uncond, text)
}

/// Combine the two predictions: `uncond + scale * (text - uncond)`.
#[must_use]
pub fn apply_guidance(
    uncond: &LatentTensor,
    text: &LatentTensor,
    guidance_scale: f32,
) -> Array4<f32> {
    let delta = text - uncond;
    uncond + &(delta * guidance_scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::concatenate;
    use ndarray::Axis;

    #[test]
    fn test_guidance_extrapolates_towards_text() {
        let uncond = Array4::from_elem((1, 4, 2, 2), 1.0f32);
        let text = Array4::from_elem((1, 4, 2, 2), 2.0f32);

        let guided = apply_guidance(&uncond, &text, 7.5);
        assert!(guided.iter().all(|&v| (v - 8.5).abs() < 1e-6));

        let plain = apply_guidance(&uncond, &text, 1.0);
        assert_eq!(plain, text);
    }

    #[test]
    fn test_split_batch() {
        let uncond = Array4::from_elem((1, 4, 3, 3), -1.0f32);
        let text = Array4::from_elem((1, 4, 3, 3), 3.0f32);
        let batch = concatenate(Axis(0), &[uncond.view(), text.view()]).unwrap();

        let (a, b) = split_batch(&batch);
        assert_eq!(a, uncond);
        assert_eq!(b, text);
    }

    #[test]
    fn test_uses_guidance() {
        assert!(uses_guidance(7.5));
        assert!(!uses_guidance(1.0));
        assert!(!uses_guidance(0.0));
    }
}
