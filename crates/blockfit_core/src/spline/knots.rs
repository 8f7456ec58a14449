//! Knot vector construction and blending.

use crate::error::{BlockError, Result};

/// Clamped uniform knot vector for `n_ctl` control points of the given order.
pub fn uniform_knots(n_ctl: usize, order: usize) -> Vec<f64> {
    let len = n_ctl + order;
    let mut knots = vec![0.0; len];
    for value in knots.iter_mut().skip(n_ctl) {
        *value = 1.0;
    }
    let n_interior = n_ctl.saturating_sub(order);
    for j in 1..=n_interior {
        knots[order - 1 + j] = j as f64 / (n_interior + 1) as f64;
    }
    knots
}

/// Interpolation knots by parameter averaging. `params` must hold exactly
/// `n_ctl` increasing values in [0, 1].
pub fn averaged_knots(params: &[f64], order: usize) -> Vec<f64> {
    let n = params.len();
    let p = order - 1;
    let mut knots = uniform_knots(n, order);
    if p == 0 {
        return knots;
    }
    for j in 1..=n.saturating_sub(order) {
        let sum: f64 = params[j..j + p].iter().sum();
        knots[j + p] = sum / p as f64;
    }
    knots
}

/// Least-squares knot placement for `n_ctl < params.len()` control points,
/// spreading interior knots so every span holds at least one parameter.
pub fn least_squares_knots(params: &[f64], n_ctl: usize, order: usize) -> Vec<f64> {
    let n = params.len();
    let mut knots = uniform_knots(n_ctl, order);
    let d = n as f64 / (n_ctl - order + 1) as f64;
    for j in 1..=(n_ctl - order) {
        let jd = j as f64 * d;
        let i = jd.floor() as usize;
        let alpha = jd - i as f64;
        knots[order - 1 + j] = (1.0 - alpha) * params[i - 1] + alpha * params[i];
    }
    knots
}

/// Knots for `n_ctl` control points fitted to samples at `params`.
pub fn knots_for_params(params: &[f64], n_ctl: usize, order: usize) -> Vec<f64> {
    use std::cmp::Ordering;
    match n_ctl.cmp(&params.len()) {
        Ordering::Equal => averaged_knots(params, order),
        Ordering::Less => least_squares_knots(params, n_ctl, order),
        Ordering::Greater => uniform_knots(n_ctl, order),
    }
}

/// Reverses a knot vector's parametric direction: `reverse(1 - t)`.
pub fn flip_knots(knots: &[f64]) -> Vec<f64> {
    knots.iter().rev().map(|t| 1.0 - t).collect()
}

/// Makes a knot vector symmetric about 0.5 by averaging it with its flip.
pub fn symmetrize_knots(knots: &[f64]) -> Vec<f64> {
    let len = knots.len();
    (0..len)
        .map(|i| 0.5 * (knots[i] + 1.0 - knots[len - 1 - i]))
        .collect()
}

/// Averages equally long knot vectors into one consensus vector.
pub fn blend_knot_vectors(vectors: &[Vec<f64>], symmetric: bool) -> Result<Vec<f64>> {
    let first = vectors
        .first()
        .ok_or_else(|| BlockError::Precondition("no knot vectors to blend".into()))?;
    let len = first.len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != len) {
        return Err(BlockError::Precondition(format!(
            "cannot blend knot vectors of length {} and {}",
            len,
            bad.len()
        )));
    }

    let mut blended = vec![0.0; len];
    for vector in vectors {
        let vector = if symmetric {
            symmetrize_knots(vector)
        } else {
            vector.clone()
        };
        for (acc, value) in blended.iter_mut().zip(vector) {
            *acc += value;
        }
    }
    let count = vectors.len() as f64;
    for value in &mut blended {
        *value /= count;
    }
    Ok(blended)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-12, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn uniform_knots_are_clamped() {
        assert_close(&uniform_knots(4, 4), &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
        assert_close(&uniform_knots(4, 2), &[0.0, 0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0, 1.0]);
    }

    #[test]
    fn averaged_knots_follow_parameters() {
        let params = [0.0, 0.1, 0.5, 0.9, 1.0];
        let knots = averaged_knots(&params, 3);
        assert_close(&knots, &[0.0, 0.0, 0.0, 0.3, 0.7, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn least_squares_knots_stay_inside_domain() {
        let params: Vec<f64> = (0..11).map(|i| i as f64 / 10.0).collect();
        let knots = least_squares_knots(&params, 5, 3);
        assert_eq!(knots.len(), 8);
        assert!(knots.windows(2).all(|w| w[0] <= w[1]));
        assert!(knots[3] > 0.0 && knots[4] < 1.0);
    }

    #[test]
    fn flip_reverses_and_reflects() {
        let knots = [0.0, 0.0, 0.2, 1.0, 1.0];
        assert_close(&flip_knots(&knots), &[0.0, 0.0, 0.8, 1.0, 1.0]);
    }

    #[test]
    fn blend_averages_and_rejects_mismatched_lengths() {
        let a = vec![0.0, 0.0, 0.2, 1.0, 1.0];
        let b = vec![0.0, 0.0, 0.4, 1.0, 1.0];
        let blended = blend_knot_vectors(&[a.clone(), b], false).expect("blend");
        assert_close(&blended, &[0.0, 0.0, 0.3, 1.0, 1.0]);

        let err = blend_knot_vectors(&[a, vec![0.0, 1.0]], false).expect_err("length mismatch");
        assert!(format!("{err}").contains("length 5 and 2"));
        assert!(blend_knot_vectors(&[], false).is_err());
    }

    #[test]
    fn symmetric_blend_is_symmetric() {
        let a = vec![0.0, 0.0, 0.2, 0.3, 1.0, 1.0];
        let blended = blend_knot_vectors(&[a], true).expect("blend");
        assert_close(&blended, &flip_knots(&blended));
    }
}
