//! Cox-de Boor evaluation of B-spline basis functions.
//!
//! Orders follow the spline convention used throughout the crate: an order-`k`
//! basis is piecewise polynomial of degree `k - 1` and a knot vector for
//! `n_ctl` control points holds `n_ctl + k` values.

/// Finds the knot span `s` with `knots[s] <= t < knots[s + 1]`, clamped to the
/// valid range `[order - 1, n_ctl - 1]`.
pub fn find_span(knots: &[f64], order: usize, n_ctl: usize, t: f64) -> usize {
    let p = order - 1;
    let last = n_ctl - 1;
    if t >= knots[last + 1] {
        return last;
    }
    if t <= knots[p] {
        return p;
    }

    let mut lo = p;
    let mut hi = last + 1;
    let mut mid = (lo + hi) / 2;
    while t < knots[mid] || t >= knots[mid + 1] {
        if t < knots[mid] {
            hi = mid;
        } else {
            lo = mid;
        }
        mid = (lo + hi) / 2;
    }
    mid
}

/// Evaluates the `order` non-zero basis functions on `span` at `t`, writing
/// `N[span - order + 1] ..= N[span]` into `out`.
pub fn basis_funs(knots: &[f64], order: usize, span: usize, t: f64, out: &mut [f64]) {
    let p = order - 1;
    let mut left = vec![0.0; order];
    let mut right = vec![0.0; order];

    out[0] = 1.0;
    for j in 1..=p {
        left[j] = t - knots[span + 1 - j];
        right[j] = knots[span + j] - t;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom == 0.0 { 0.0 } else { out[r] / denom };
            out[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        out[j] = saved;
    }
}

/// Evaluates the non-zero basis functions and their first derivatives.
pub fn basis_funs_with_derivs(
    knots: &[f64],
    order: usize,
    span: usize,
    t: f64,
    values: &mut [f64],
    derivs: &mut [f64],
) {
    basis_funs(knots, order, span, t, values);
    let p = order - 1;
    if p == 0 {
        derivs[0] = 0.0;
        return;
    }

    // Degree p-1 functions N[span-p+1 ..= span].
    let mut lower = vec![0.0; p];
    basis_funs(knots, p, span, t, &mut lower);

    let degree = p as f64;
    for r in 0..=p {
        let i = span - p + r;
        let mut d = 0.0;
        if r >= 1 {
            let denom = knots[i + p] - knots[i];
            if denom != 0.0 {
                d += lower[r - 1] / denom;
            }
        }
        if r < p {
            let denom = knots[i + p + 1] - knots[i + 1];
            if denom != 0.0 {
                d -= lower[r] / denom;
            }
        }
        derivs[r] = degree * d;
    }
}
