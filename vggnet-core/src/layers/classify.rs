/// Predicted class and its softmax probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: usize,
    pub confidence: f32,
}

/// Numerically stable softmax in place: the maximum is subtracted before
/// exponentiating.
pub fn softmax(values: &mut [f32]) {
    let Some(max) = values.iter().copied().reduce(f32::max) else {
        return;
    };
    let mut sum = 0.0f32;
    for value in values.iter_mut() {
        *value = (*value - max).exp();
        sum += *value;
    }
    for value in values.iter_mut() {
        *value /= sum;
    }
}

/// Index and value of the largest element.
///
/// Starts from `(0, 0.0)` and only moves on a strict improvement, so ties keep
/// the lowest index. Probabilities are never negative, which makes the zero
/// seed safe for softmax output.
pub fn arg_max(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .enumerate()
        .fold((0, 0.0), |(best, best_value), (index, &value)| {
            if best_value < value {
                (index, value)
            } else {
                (best, best_value)
            }
        })
}

/// Softmax the logits in place and pick the most likely class.
pub fn classify(logits: &mut [f32]) -> Prediction {
    softmax(logits);
    let (label, _) = arg_max(logits);
    Prediction {
        label,
        confidence: logits.get(label).copied().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let mut values = [1.0, -2.5, 0.25, 3.0, 0.0, 10.0];
        softmax(&mut values);
        let sum: f32 = values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum = {sum}");
        assert!(values.iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn softmax_is_shift_invariant() {
        let base = [0.5, 1.5, -0.75, 2.0];
        let mut plain = base;
        let mut shifted = base.map(|v| v + 1000.0);
        softmax(&mut plain);
        softmax(&mut shifted);
        for (a, b) in plain.iter().zip(&shifted) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        assert_eq!(arg_max(&[0.1, 0.4, 0.4, 0.1]), (1, 0.4));
        let mut uniform = [0.0; 10];
        let prediction = classify(&mut uniform);
        assert_eq!(prediction.label, 0);
        assert!((prediction.confidence - 0.1).abs() < 1e-6);
    }

    #[test]
    fn classify_reports_probability_of_winner() {
        let mut logits = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let prediction = classify(&mut logits);
        let e = std::f32::consts::E;
        assert_eq!(prediction.label, 0);
        assert!((prediction.confidence - e / (e + 9.0)).abs() < 1e-6);
    }

    #[test]
    fn empty_input_is_left_alone() {
        let mut empty: [f32; 0] = [];
        softmax(&mut empty);
        assert_eq!(arg_max(&empty), (0, 0.0));
    }
}
