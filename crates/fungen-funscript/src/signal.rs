//! Numeric primitives behind the funscript transforms.

use serde::{Deserialize, Serialize};

/// Savitzky-Golay smoothing.
///
/// Interior samples use the centred least-squares polynomial; the first and
/// last `window_length / 2` samples are evaluated on the polynomial fitted to
/// the first or last full window. Returns `None` when the window is even, the
/// input is shorter than the window, or `polyorder >= window_length`.
pub fn savgol_filter(values: &[f64], window_length: usize, polyorder: usize) -> Option<Vec<f64>> {
    if window_length == 0 || window_length % 2 == 0 || polyorder >= window_length {
        return None;
    }
    let n = values.len();
    if n < window_length {
        return None;
    }
    let half = window_length / 2;
    let mut weights: Vec<Option<Vec<f64>>> = vec![None; window_length];
    let mut output = Vec::with_capacity(n);
    for i in 0..n {
        let start = i.saturating_sub(half).min(n - window_length);
        let offset = i - start;
        if weights[offset].is_none() {
            weights[offset] = Some(savgol_weights(window_length, polyorder, offset)?);
        }
        let w = weights[offset].as_deref()?;
        let value = w
            .iter()
            .zip(&values[start..start + window_length])
            .map(|(w, y)| w * y)
            .sum();
        output.push(value);
    }
    Some(output)
}

/// Weights `h` so that `sum(h[j] * y[j])` evaluates the fitted polynomial at `offset`.
fn savgol_weights(window_length: usize, polyorder: usize, offset: usize) -> Option<Vec<f64>> {
    let half = (window_length / 2) as f64;
    let scale = half.max(1.0);
    let terms = polyorder + 1;
    let xs: Vec<f64> = (0..window_length)
        .map(|j| (j as f64 - half) / scale)
        .collect();

    let mut normal = vec![vec![0.0; terms]; terms];
    for x in &xs {
        for (r, row) in normal.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell += x.powi((r + c) as i32);
            }
        }
    }
    let inverse = invert_matrix(normal)?;

    let x0 = (offset as f64 - half) / scale;
    let basis: Vec<f64> = (0..terms).map(|k| x0.powi(k as i32)).collect();
    // coeff[k] = sum_r basis[r] * inverse[r][k]
    let coeff: Vec<f64> = (0..terms)
        .map(|k| (0..terms).map(|r| basis[r] * inverse[r][k]).sum())
        .collect();
    Some(
        xs.iter()
            .map(|x| {
                coeff
                    .iter()
                    .enumerate()
                    .map(|(k, c)| c * x.powi(k as i32))
                    .sum()
            })
            .collect(),
    )
}

fn invert_matrix(mut matrix: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut inverse: Vec<Vec<f64>> = (0..n)
        .map(|r| (0..n).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
        .collect();
    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| {
            matrix[a][col]
                .abs()
                .partial_cmp(&matrix[b][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if matrix[pivot][col].abs() < 1e-12 {
            return None;
        }
        matrix.swap(col, pivot);
        inverse.swap(col, pivot);
        let diag = matrix[col][col];
        for c in 0..n {
            matrix[col][c] /= diag;
            inverse[col][c] /= diag;
        }
        let pivot_row = matrix[col].clone();
        let pivot_inverse = inverse[col].clone();
        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = matrix[r][col];
            if factor == 0.0 {
                continue;
            }
            for c in 0..n {
                matrix[r][c] -= factor * pivot_row[c];
                inverse[r][c] -= factor * pivot_inverse[c];
            }
        }
    }
    Some(inverse)
}

/// Peak filters; `None` disables a filter. Zero values are treated as unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakParams {
    pub height: Option<f64>,
    pub threshold: Option<f64>,
    pub distance: Option<f64>,
    pub prominence: Option<f64>,
    pub width: Option<f64>,
}

impl PeakParams {
    fn normalized(&self) -> Self {
        let set = |value: Option<f64>| value.filter(|v| *v != 0.0 && !v.is_nan());
        Self {
            height: set(self.height),
            threshold: set(self.threshold),
            distance: set(self.distance),
            prominence: set(self.prominence),
            width: set(self.width),
        }
    }
}

struct Candidate {
    peak: usize,
    left_edge: usize,
    right_edge: usize,
}

/// Local maxima of `x`, filtered by height, threshold, distance, prominence
/// and width in that order. Flat peaks resolve to their midpoint.
pub fn find_peaks(x: &[f64], params: &PeakParams) -> Vec<usize> {
    let params = params.normalized();
    let mut candidates = local_maxima(x);

    if let Some(min_height) = params.height {
        candidates.retain(|c| x[c.peak] >= min_height);
    }

    if let Some(min_threshold) = params.threshold {
        candidates.retain(|c| {
            let left = x[c.peak] - x[c.left_edge - 1];
            let right = x[c.peak] - x[c.right_edge + 1];
            left.min(right) >= min_threshold
        });
    }

    if let Some(distance) = params.distance.filter(|d| *d >= 1.0) {
        candidates = select_by_distance(x, candidates, distance.ceil() as usize);
    }

    if params.prominence.is_none() && params.width.is_none() {
        return candidates.into_iter().map(|c| c.peak).collect();
    }

    let mut scored: Vec<(usize, Prominence)> = candidates
        .into_iter()
        .map(|c| (c.peak, prominence(x, c.peak)))
        .collect();

    if let Some(min_prominence) = params.prominence {
        scored.retain(|(_, p)| p.value >= min_prominence);
    }
    if let Some(min_width) = params.width {
        scored.retain(|(peak, p)| peak_width(x, *peak, p, 0.5) >= min_width);
    }
    scored.into_iter().map(|(peak, _)| peak).collect()
}

fn local_maxima(x: &[f64]) -> Vec<Candidate> {
    let mut out = Vec::new();
    if x.len() < 3 {
        return out;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                let left_edge = i;
                let right_edge = ahead - 1;
                out.push(Candidate {
                    peak: (left_edge + right_edge) / 2,
                    left_edge,
                    right_edge,
                });
                i = ahead;
            }
        }
        i += 1;
    }
    out
}

fn select_by_distance(x: &[f64], candidates: Vec<Candidate>, distance: usize) -> Vec<Candidate> {
    let count = candidates.len();
    let mut keep = vec![true; count];
    let mut by_priority: Vec<usize> = (0..count).collect();
    by_priority.sort_by(|&a, &b| {
        x[candidates[a].peak]
            .partial_cmp(&x[candidates[b].peak])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for &j in by_priority.iter().rev() {
        if !keep[j] {
            continue;
        }
        let peak = candidates[j].peak;
        let mut k = j;
        while k > 0 && peak - candidates[k - 1].peak < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < count && candidates[k].peak - peak < distance {
            keep[k] = false;
            k += 1;
        }
    }
    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(c, keep)| keep.then_some(c))
        .collect()
}

struct Prominence {
    value: f64,
    left_base: usize,
    right_base: usize,
}

fn prominence(x: &[f64], peak: usize) -> Prominence {
    let top = x[peak];

    let mut left_min = top;
    let mut left_base = peak;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= top {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_min = top;
    let mut right_base = peak;
    let mut i = peak;
    while i < x.len() && x[i] <= top {
        if x[i] < right_min {
            right_min = x[i];
            right_base = i;
        }
        i += 1;
    }

    Prominence {
        value: top - left_min.max(right_min),
        left_base,
        right_base,
    }
}

fn peak_width(x: &[f64], peak: usize, prominence: &Prominence, rel_height: f64) -> f64 {
    let height = x[peak] - prominence.value * rel_height;

    let mut i = peak;
    while prominence.left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < height {
        left_ip += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < prominence.right_base && height < x[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if x[i] < height {
        right_ip -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    right_ip - left_ip
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Ramer-Douglas-Peucker on `(t, y)` points. Returns the kept indices in order;
/// the first and last index are always kept.
pub fn rdp_keep_indices(points: &[(f64, f64)], epsilon: f64) -> Vec<usize> {
    let n = points.len();
    if n < 3 {
        return (0..n).collect();
    }
    let epsilon = epsilon.max(0.0);
    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    let mut stack = vec![(0usize, n - 1)];
    while let Some((start, end)) = stack.pop() {
        if end - start < 2 {
            continue;
        }
        let (sx, sy) = points[start];
        let (dx, dy) = (points[end].0 - sx, points[end].1 - sy);
        let norm = (dx * dx + dy * dy).sqrt();

        let mut max_distance = 0.0;
        let mut max_index = start;
        for (i, &(px, py)) in points.iter().enumerate().take(end).skip(start) {
            let (rx, ry) = (px - sx, py - sy);
            let distance = if norm > 0.0 {
                (dx * ry - dy * rx).abs() / norm
            } else {
                (rx * rx + ry * ry).sqrt()
            };
            if distance > max_distance {
                max_distance = distance;
                max_index = i;
            }
        }

        if max_distance > epsilon && max_index > start {
            keep[max_index] = true;
            stack.push((start, max_index));
            stack.push((max_index, end));
        }
    }

    keep.iter()
        .enumerate()
        .filter_map(|(i, kept)| kept.then_some(i))
        .collect()
}
