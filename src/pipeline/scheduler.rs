//! DDIM noise scheduler with the Stable Diffusion 1.x beta schedule.

use ndarray::Array4;

/// Number of diffusion steps the model was trained with.
const NUM_TRAIN_TIMESTEPS: usize = 1000;
const BETA_START: f32 = 0.000_85;
const BETA_END: f32 = 0.012;
/// Offset added to every inference timestep.
const STEPS_OFFSET: usize = 1;

/// Deterministic DDIM (eta = 0) scheduler.
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    alphas_cumprod: Vec<f32>,
    final_alpha_cumprod: f32,
    timesteps: Vec<usize>,
    step_ratio: usize,
}

impl DdimScheduler {
    /// Build a scheduler for `num_inference_steps` (clamped to 1..=1000).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(num_inference_steps: usize) -> Self {
        let steps = num_inference_steps.clamp(1, NUM_TRAIN_TIMESTEPS);

        // Scaled-linear: linear in sqrt(beta), then squared
        let (start, end) = (BETA_START.sqrt(), BETA_END.sqrt());
        let last = (NUM_TRAIN_TIMESTEPS - 1) as f32;
        let mut cum = 1.0f32;
        let alphas_cumprod: Vec<f32> = (0..NUM_TRAIN_TIMESTEPS)
            .map(|i| {
                let beta = (end - start).mul_add(i as f32 / last, start).powi(2);
                cum *= 1.0 - beta;
                cum
            })
            .collect();

        // SD 1.x does not force the final alpha to one
        let final_alpha_cumprod = alphas_cumprod[0];

        let step_ratio = NUM_TRAIN_TIMESTEPS / steps;
        let timesteps = (0..steps).rev().map(|i| i * step_ratio + STEPS_OFFSET).collect();

        Self {
            alphas_cumprod,
            final_alpha_cumprod,
            timesteps,
            step_ratio,
        }
    }

    /// All inference timesteps, descending.
    #[must_use]
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// Timesteps left after skipping the first `1 - strength` of the schedule.
    ///
    /// `strength` 1.0 keeps every step, 0.0 keeps none.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn img2img_timesteps(&self, strength: f32) -> &[usize] {
        let steps = self.timesteps.len();
        // Safe: strength is clamped to [0, 1] so the product fits in usize
        let init_timestep = ((steps as f32 * strength.clamp(0.0, 1.0)) as usize).min(steps);
        &self.timesteps[steps - init_timestep..]
    }

    /// Cumulative alpha product at `timestep`.
    #[must_use]
    pub fn alpha_cumprod(&self, timestep: usize) -> f32 {
        self.alphas_cumprod[timestep.min(NUM_TRAIN_TIMESTEPS - 1)]
    }

    /// Noise a clean sample to `timestep`.
    #[must_use]
    pub fn add_noise(
        &self,
        original: &Array4<f32>,
        noise: &Array4<f32>,
        timestep: usize,
    ) -> Array4<f32> {
        let alpha_prod = self.alpha_cumprod(timestep);
        original * alpha_prod.sqrt() + noise * (1.0 - alpha_prod).sqrt()
    }

    /// One DDIM step from `timestep` to the previous inference timestep.
    #[must_use]
    pub fn step(&self, noise_pred: &Array4<f32>, timestep: usize, sample: &Array4<f32>) -> Array4<f32> {
        let alpha_prod_t = self.alpha_cumprod(timestep);
        let alpha_prod_prev = timestep
            .checked_sub(self.step_ratio)
            .map_or(self.final_alpha_cumprod, |prev| self.alpha_cumprod(prev));

        let scaled_noise = noise_pred * (1.0 - alpha_prod_t).sqrt();
        let pred_original = (sample - &scaled_noise) / alpha_prod_t.sqrt();
        let direction = noise_pred * (1.0 - alpha_prod_prev).sqrt();

        pred_original * alpha_prod_prev.sqrt() + direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timesteps_descend_with_offset() {
        let scheduler = DdimScheduler::new(50);
        let timesteps = scheduler.timesteps();

        assert_eq!(timesteps.len(), 50);
        assert_eq!(timesteps[0], 981);
        assert_eq!(timesteps[49], 1);
        assert!(timesteps.windows(2).all(|w| w[0] - w[1] == 20));
    }

    #[test]
    fn test_img2img_timesteps() {
        let scheduler = DdimScheduler::new(50);

        let kept = scheduler.img2img_timesteps(0.75);
        assert_eq!(kept.len(), 37);
        assert_eq!(kept[0], 721);

        assert_eq!(scheduler.img2img_timesteps(1.0).len(), 50);
        assert!(scheduler.img2img_timesteps(0.0).is_empty());
    }

    #[test]
    fn test_alphas_decrease() {
        let scheduler = DdimScheduler::new(10);
        assert!(scheduler.alpha_cumprod(0) < 1.0);
        assert!(scheduler.alpha_cumprod(0) > scheduler.alpha_cumprod(500));
        assert!(scheduler.alpha_cumprod(500) > scheduler.alpha_cumprod(999));
        assert!(scheduler.alpha_cumprod(999) > 0.0);
    }

    #[test]
    fn test_exact_noise_prediction_recovers_sample() {
        let scheduler = DdimScheduler::new(50);
        let clean = Array4::from_elem((1, 4, 2, 2), 0.5f32);
        let noise = Array4::from_elem((1, 4, 2, 2), -0.3f32);

        let mut sample = scheduler.add_noise(&clean, &noise, 981);
        for &t in scheduler.timesteps() {
            sample = scheduler.step(&noise, t, &sample);
        }

        // Ends at the final alpha, which is just below one
        let alpha = scheduler.alpha_cumprod(0);
        let expected = 0.5 * alpha.sqrt() - 0.3 * (1.0 - alpha).sqrt();
        assert!(sample.iter().all(|v| (v - expected).abs() < 1e-3));
    }
}
