//! Numerical constants and small float helpers shared by the inference code.

/// Numerical safety constants.
pub mod constants {
    /// Smallest positive normal `f64`; floor added to denominators and
    /// probabilities before taking logarithms.
    pub const REALMIN: f64 = f64::MIN_POSITIVE;

    /// Largest finite `f64`; ceiling for rescaled backward variables.
    pub const REALMAX: f64 = f64::MAX;

    /// ln(2π)
    pub const LOG_2PI: f64 = 1.837_877_066_409_345_5;

    /// Tolerance used when checking that a vector sums to one.
    pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

    /// Diagonal jitter levels (relative to the mean diagonal magnitude) tried
    /// in order when a covariance fails to factorize as given.
    pub const REGULARIZATION_LEVELS: [f64; 5] = [1e-12, 1e-10, 1e-8, 1e-6, 1e-4];
}

/// Index and value of the first maximum.
///
/// Ties resolve to the lowest index. NaN entries never win. Returns
/// `(0, f64::NEG_INFINITY)` for an empty or all-NaN input.
pub fn argmax<I>(values: I) -> (usize, f64)
where
    I: IntoIterator<Item = f64>,
{
    let mut best_idx = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, v) in values.into_iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    (best_idx, best_val)
}

/// Numerically stable `ln(Σ exp(v))`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Scales `values` in place so they sum to one and returns the original sum.
///
/// A sum that is not strictly positive leaves the values untouched.
pub fn normalize_in_place(values: &mut [f64]) -> f64 {
    let sum: f64 = values.iter().sum();
    if sum > 0.0 {
        let inv = 1.0 / sum;
        values.iter_mut().for_each(|v| *v *= inv);
    }
    sum
}
