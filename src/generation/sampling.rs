//! Token selection
//!
//! Softmax over processed scores, greedy argmax, and seeded multinomial
//! sampling.

use anyhow::{Context, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Convert scores to a probability distribution
///
/// Fails when no score is finite (every token masked) or when any score
/// is NaN.
pub fn softmax(scores: &[f32]) -> Result<Vec<f32>> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        anyhow::bail!("No token has a finite score after logits processing");
    }

    let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exp.iter().sum();
    if !total.is_finite() {
        anyhow::bail!("Scores contain NaN, cannot build a distribution");
    }
    Ok(exp.into_iter().map(|e| e / total).collect())
}

/// Index of the highest probability, lowest index among ties
pub fn argmax(probs: &[f32]) -> Result<u32> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &p) in probs.iter().enumerate() {
        match best {
            Some((_, best_p)) if p <= best_p => {}
            _ => best = Some((idx, p)),
        }
    }
    let (idx, _) = best.context("Cannot pick a token from an empty distribution")?;
    Ok(idx as u32)
}

/// Multinomial sampler with an optional fixed seed
pub struct TokenSampler {
    rng: StdRng,
}

impl TokenSampler {
    /// A seeded sampler is reproducible; without a seed it draws from entropy
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Draw one token id proportionally to `probs`
    pub fn sample(&mut self, probs: &[f32]) -> Result<u32> {
        let distribution =
            WeightedIndex::new(probs).context("Invalid probability distribution for sampling")?;
        Ok(distribution.sample(&mut self.rng) as u32)
    }
}

/// Mark rows finished whose latest token is an end-of-sequence id
///
/// A finished row stays finished.
pub fn update_unfinished(unfinished: &mut [bool], last_tokens: &[u32], eos_token_ids: &[u32]) {
    for (row, &token) in unfinished.iter_mut().zip(last_tokens) {
        if eos_token_ids.contains(&token) {
            *row = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_normalises() {
        let probs = softmax(&[1.0, 2.0, f32::NEG_INFINITY]).unwrap();

        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(probs[2], 0.0);
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_all_masked_is_error() {
        assert!(softmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY]).is_err());
        assert!(softmax(&[]).is_err());
    }

    #[test]
    fn test_softmax_nan_is_error() {
        assert!(softmax(&[1.0, f32::NAN, 0.5]).is_err());
        assert!(softmax(&[f32::NAN, f32::NAN]).is_err());
    }

    #[test]
    fn test_argmax_lowest_id_tie_break() {
        assert_eq!(argmax(&[0.1, 0.45, 0.45]).unwrap(), 1);
        assert_eq!(argmax(&[0.25, 0.25, 0.25, 0.25]).unwrap(), 0);
        assert!(argmax(&[]).is_err());
    }

    #[test]
    fn test_seeded_sampling_reproducible() {
        let probs = vec![0.1, 0.2, 0.3, 0.4];

        let mut a = TokenSampler::new(Some(42));
        let mut b = TokenSampler::new(Some(42));
        let draws_a: Vec<u32> = (0..32).map(|_| a.sample(&probs).unwrap()).collect();
        let draws_b: Vec<u32> = (0..32).map(|_| b.sample(&probs).unwrap()).collect();

        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn test_sampling_respects_zero_probability() {
        let mut sampler = TokenSampler::new(Some(7));
        for _ in 0..100 {
            assert_eq!(sampler.sample(&[0.0, 1.0, 0.0]).unwrap(), 1);
        }
    }

    #[test]
    fn test_update_unfinished_per_row() {
        let mut unfinished = vec![true, true, false];

        update_unfinished(&mut unfinished, &[2, 5, 9], &[2, 3]);
        assert_eq!(unfinished, vec![false, true, false]);

        update_unfinished(&mut unfinished, &[7, 3, 1], &[2, 3]);
        assert_eq!(unfinished, vec![false, false, false]);
    }
}
