//! Reverse-discounted cumulative sums ("reward-to-go").
//!
//! The recurrence is the single-pole IIR filter `y[t] = x[t] + discount *
//! y[t+1]` applied once, back to front, which is exactly the time-reversed
//! `lfilter([1], [1, -discount])` formulation and is bit-for-bit reproducible
//! in f32.

/// Discounted suffix sums over a time-major `(steps, cols)` flat array.
///
/// For every column `n`, `y[t][n] = sum_k discount^k * x[t+k][n]`.
pub fn discounted_sum(x: &[f32], steps: usize, cols: usize, discount: f32) -> Vec<f32> {
    assert_eq!(x.len(), steps * cols, "input is not a (steps, cols) array");

    let mut y = vec![0.0f32; steps * cols];
    if steps == 0 {
        return y;
    }

    let last = (steps - 1) * cols;
    y[last..].copy_from_slice(&x[last..]);

    for t in (0..steps - 1).rev() {
        let row = t * cols;
        let next = row + cols;
        for n in 0..cols {
            y[row + n] = x[row + n] + discount * y[next + n];
        }
    }

    y
}
