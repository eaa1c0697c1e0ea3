use crate::application::features::{
    MIN_WINDOW_RANGE, build_feature_sequence, normalize, price_bounds,
};
use crate::domain::types::TrainingExample;
use rayon::prelude::*;

/// Build overlapping training windows from a price series.
///
/// For each index `i >= sequence_length`, the preceding `sequence_length`
/// prices form a window whose normalized feature sequence predicts
/// `prices[i]` normalized to the same window bounds. Flat windows are
/// skipped. Output keeps chronological order.
pub fn build_training_examples(prices: &[f64], sequence_length: usize) -> Vec<TrainingExample> {
    if sequence_length == 0 || prices.len() <= sequence_length {
        return Vec::new();
    }

    (sequence_length..prices.len())
        .into_par_iter()
        .filter_map(|i| {
            let window = &prices[i - sequence_length..i];
            let (min_price, max_price) = price_bounds(window)?;
            if max_price - min_price < MIN_WINDOW_RANGE {
                return None;
            }

            Some(TrainingExample {
                sequence: build_feature_sequence(window, min_price, max_price),
                target: normalize(prices[i], min_price, max_price),
            })
        })
        .collect()
}

/// Hold out the trailing `validation_fraction` of examples.
pub fn split_validation(
    mut examples: Vec<TrainingExample>,
    validation_fraction: f64,
) -> (Vec<TrainingExample>, Vec<TrainingExample>) {
    let fraction = validation_fraction.clamp(0.0, 0.9);
    let train_len = ((examples.len() as f64) * (1.0 - fraction)).floor() as usize;
    let validation = examples.split_off(train_len.max(1).min(examples.len()));
    (examples, validation)
}
