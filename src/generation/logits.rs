//! Logits processors, warpers and stopping criteria
//!
//! Processors reshape raw next-token scores (repetition penalty, constrained
//! prefixes). Warpers reshape them before sampling (temperature, top-k,
//! top-p). Both share the [`LogitsProcessor`] trait; a list applies its
//! members in insertion order, in place.

use anyhow::Result;

/// Callback returning the token ids allowed after the current sequence
pub type PrefixAllowedTokensFn = Box<dyn Fn(&[u32]) -> Vec<u32> + Send>;

/// A transformation of next-token scores
pub trait LogitsProcessor: Send {
    /// Modify `scores` in place given the sequence so far
    fn process(&self, input_ids: &[u32], scores: &mut [f32]) -> Result<()>;

    /// Name for tracing
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Predicate deciding whether generation should halt
pub trait StoppingCriteria: Send {
    fn should_stop(&self, input_ids: &[u32], scores: &[f32]) -> bool;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Ordered list of processors or warpers
#[derive(Default)]
pub struct LogitsProcessorList {
    processors: Vec<Box<dyn LogitsProcessor>>,
}

impl LogitsProcessorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, processor: Box<dyn LogitsProcessor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Names in application order
    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn apply(&self, input_ids: &[u32], scores: &mut [f32]) -> Result<()> {
        for processor in &self.processors {
            processor.process(input_ids, scores)?;
        }
        Ok(())
    }
}

impl Extend<Box<dyn LogitsProcessor>> for LogitsProcessorList {
    fn extend<I: IntoIterator<Item = Box<dyn LogitsProcessor>>>(&mut self, iter: I) {
        self.processors.extend(iter);
    }
}

/// Stopping criteria combined with OR
#[derive(Default)]
pub struct StoppingCriteriaList {
    criteria: Vec<Box<dyn StoppingCriteria>>,
}

impl StoppingCriteriaList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, criteria: Box<dyn StoppingCriteria>) {
        self.criteria.push(criteria);
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// True when any member fires
    pub fn is_done(&self, input_ids: &[u32], scores: &[f32]) -> bool {
        self.criteria.iter().any(|c| {
            let stop = c.should_stop(input_ids, scores);
            if stop {
                tracing::debug!("Stopping criteria '{}' fired", c.name());
            }
            stop
        })
    }
}

impl Extend<Box<dyn StoppingCriteria>> for StoppingCriteriaList {
    fn extend<I: IntoIterator<Item = Box<dyn StoppingCriteria>>>(&mut self, iter: I) {
        self.criteria.extend(iter);
    }
}

/// Penalise every token already present in the sequence
///
/// Positive scores are divided by the penalty, negative ones multiplied, so
/// a penalty above 1.0 always makes a repeat less likely. Each distinct id is
/// penalised once.
pub struct RepetitionPenaltyLogitsProcessor {
    penalty: f32,
}

impl RepetitionPenaltyLogitsProcessor {
    pub fn new(penalty: f32) -> Self {
        Self { penalty }
    }
}

impl LogitsProcessor for RepetitionPenaltyLogitsProcessor {
    fn process(&self, input_ids: &[u32], scores: &mut [f32]) -> Result<()> {
        let mut seen = vec![false; scores.len()];
        for &token in input_ids {
            let idx = token as usize;
            if idx >= scores.len() || seen[idx] {
                continue;
            }
            seen[idx] = true;
            if scores[idx] > 0.0 {
                scores[idx] /= self.penalty;
            } else {
                scores[idx] *= self.penalty;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "repetition_penalty"
    }
}

/// Mask every token the callback does not allow after the current sequence
pub struct PrefixConstrainedLogitsProcessor {
    allowed: PrefixAllowedTokensFn,
}

impl PrefixConstrainedLogitsProcessor {
    pub fn new(allowed: PrefixAllowedTokensFn) -> Self {
        Self { allowed }
    }
}

impl LogitsProcessor for PrefixConstrainedLogitsProcessor {
    fn process(&self, input_ids: &[u32], scores: &mut [f32]) -> Result<()> {
        let mut mask = vec![true; scores.len()];
        for token in (self.allowed)(input_ids) {
            if let Some(masked) = mask.get_mut(token as usize) {
                *masked = false;
            }
        }
        for (score, masked) in scores.iter_mut().zip(mask) {
            if masked {
                *score = f32::NEG_INFINITY;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "prefix_constrained"
    }
}

/// Divide scores by the temperature
pub struct TemperatureLogitsWarper {
    temperature: f32,
}

impl TemperatureLogitsWarper {
    pub fn new(temperature: f32) -> Result<Self> {
        if !(temperature > 0.0 && temperature.is_finite()) {
            anyhow::bail!("temperature has to be a strictly positive float, got {}", temperature);
        }
        Ok(Self { temperature })
    }
}

impl LogitsProcessor for TemperatureLogitsWarper {
    fn process(&self, _input_ids: &[u32], scores: &mut [f32]) -> Result<()> {
        for score in scores.iter_mut() {
            *score /= self.temperature;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "temperature"
    }
}

/// Keep the `top_k` highest scores (ties at the boundary are kept)
pub struct TopKLogitsWarper {
    top_k: usize,
}

impl TopKLogitsWarper {
    pub fn new(top_k: usize) -> Self {
        // At least one token always survives
        Self { top_k: top_k.max(1) }
    }
}

impl LogitsProcessor for TopKLogitsWarper {
    fn process(&self, _input_ids: &[u32], scores: &mut [f32]) -> Result<()> {
        if self.top_k >= scores.len() {
            return Ok(());
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let threshold = sorted[self.top_k - 1];

        for score in scores.iter_mut() {
            if *score < threshold {
                *score = f32::NEG_INFINITY;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "top_k"
    }
}

/// Keep the smallest set of most likely tokens whose probability reaches `top_p`
pub struct TopPLogitsWarper {
    top_p: f32,
}

impl TopPLogitsWarper {
    pub fn new(top_p: f32) -> Result<Self> {
        if !(top_p > 0.0 && top_p <= 1.0) {
            anyhow::bail!("top_p has to be a float in (0, 1], got {}", top_p);
        }
        Ok(Self { top_p })
    }
}

impl LogitsProcessor for TopPLogitsWarper {
    fn process(&self, _input_ids: &[u32], scores: &mut [f32]) -> Result<()> {
        if self.top_p >= 1.0 {
            return Ok(());
        }

        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return Ok(());
        }

        // Descending by score, lowest id first among equals
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f32 = exp.iter().sum();

        let mut cumulative = 0.0;
        let mut keep = order.len();
        for (i, &idx) in order.iter().enumerate() {
            cumulative += exp[idx] / total;
            if cumulative >= self.top_p {
                keep = i + 1;
                break;
            }
        }

        for &idx in &order[keep..] {
            scores[idx] = f32::NEG_INFINITY;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "top_p"
    }
}

/// Halt once the sequence reaches `max_length` tokens
pub struct MaxLengthCriteria {
    max_length: usize,
}

impl MaxLengthCriteria {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl StoppingCriteria for MaxLengthCriteria {
    fn should_stop(&self, input_ids: &[u32], _scores: &[f32]) -> bool {
        input_ids.len() >= self.max_length
    }

    fn name(&self) -> &str {
        "max_length"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetition_penalty_signs() {
        let processor = RepetitionPenaltyLogitsProcessor::new(2.0);
        let mut scores = vec![4.0, -4.0, 1.0];

        // Token 0 appears twice but is penalised once
        processor.process(&[0, 1, 0], &mut scores).unwrap();

        assert_eq!(scores, vec![2.0, -8.0, 1.0]);
    }

    #[test]
    fn test_prefix_constraint_masks_others() {
        let processor = PrefixConstrainedLogitsProcessor::new(Box::new(|ids: &[u32]| {
            if ids.len() < 2 {
                vec![1]
            } else {
                vec![0, 2, 99]
            }
        }));

        let mut scores = vec![1.0, 2.0, 3.0];
        processor.process(&[5], &mut scores).unwrap();
        assert_eq!(scores, vec![f32::NEG_INFINITY, 2.0, f32::NEG_INFINITY]);

        let mut scores = vec![1.0, 2.0, 3.0];
        processor.process(&[5, 6], &mut scores).unwrap();
        assert_eq!(scores, vec![1.0, f32::NEG_INFINITY, 3.0]);
    }

    #[test]
    fn test_temperature_warper() {
        let warper = TemperatureLogitsWarper::new(0.5).unwrap();
        let mut scores = vec![1.0, -2.0];
        warper.process(&[], &mut scores).unwrap();
        assert_eq!(scores, vec![2.0, -4.0]);

        assert!(TemperatureLogitsWarper::new(0.0).is_err());
    }

    #[test]
    fn test_top_k_keeps_ties() {
        let warper = TopKLogitsWarper::new(2);
        let mut scores = vec![1.0, 3.0, 2.0, 2.0, 0.5];
        warper.process(&[], &mut scores).unwrap();

        assert_eq!(
            scores,
            vec![f32::NEG_INFINITY, 3.0, 2.0, 2.0, f32::NEG_INFINITY]
        );
    }

    #[test]
    fn test_top_p_smallest_prefix() {
        // Probabilities roughly [0.665, 0.245, 0.090]
        let scores = vec![2.0, 1.0, 0.0];

        let mut narrow = scores.clone();
        TopPLogitsWarper::new(0.5).unwrap().process(&[], &mut narrow).unwrap();
        assert_eq!(narrow, vec![2.0, f32::NEG_INFINITY, f32::NEG_INFINITY]);

        let mut wider = scores.clone();
        TopPLogitsWarper::new(0.8).unwrap().process(&[], &mut wider).unwrap();
        assert_eq!(wider, vec![2.0, 1.0, f32::NEG_INFINITY]);

        let mut all = scores.clone();
        TopPLogitsWarper::new(1.0).unwrap().process(&[], &mut all).unwrap();
        assert_eq!(all, scores);
    }

    #[test]
    fn test_list_applies_in_order() {
        let mut list = LogitsProcessorList::new();
        list.push(Box::new(TemperatureLogitsWarper::new(2.0).unwrap()));
        list.push(Box::new(TopKLogitsWarper::new(1)));

        let mut scores = vec![4.0, 8.0];
        list.apply(&[], &mut scores).unwrap();

        assert_eq!(list.names(), vec!["temperature", "top_k"]);
        assert_eq!(scores, vec![f32::NEG_INFINITY, 4.0]);
    }

    #[test]
    fn test_max_length_criteria() {
        let mut criteria = StoppingCriteriaList::new();
        criteria.push(Box::new(MaxLengthCriteria::new(3)));

        assert!(!criteria.is_done(&[1, 2], &[]));
        assert!(criteria.is_done(&[1, 2, 3], &[]));
        assert!(!StoppingCriteriaList::new().is_done(&[1, 2, 3], &[]));
    }
}
