//! Perspective transform estimation
//!
//! Fits a 3x3 homography mapping template points onto frame points. Four
//! correspondences are enough for an exact fit; with more, RANSAC picks the
//! largest consistent subset and a least-squares fit is taken over it.

use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

const RANSAC_ITERATIONS: usize = 500;
const RANSAC_SEED: u64 = 0x5eed_f00d;
const PIVOT_EPSILON: f64 = 1e-10;

/// A 3x3 projective transform with `h[2][2] == 1`
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    matrix: Array2<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Array2::eye(3),
        }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Least-squares fit over at least four correspondences.
    ///
    /// Coordinates are normalized before solving. Returns `None` for
    /// degenerate input such as collinear points.
    pub fn fit(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Self> {
        if src.len() < 4 || src.len() != dst.len() {
            return None;
        }
        let (ts, src_n) = normalize(src)?;
        let (td, dst_n) = normalize(dst)?;

        let mut ata = Array2::<f64>::zeros((8, 8));
        let mut atb = Array1::<f64>::zeros(8);
        for (&(x, y), &(u, v)) in src_n.iter().zip(&dst_n) {
            let rows = [
                ([x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u], u),
                ([0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v], v),
            ];
            for (row, rhs) in rows {
                for i in 0..8 {
                    atb[i] += row[i] * rhs;
                    for j in 0..8 {
                        ata[[i, j]] += row[i] * row[j];
                    }
                }
            }
        }
        let h = solve(ata, atb)?;
        let normalized = array![
            [h[0], h[1], h[2]],
            [h[3], h[4], h[5]],
            [h[6], h[7], 1.0]
        ];

        let matrix = denormalizer(&td).dot(&normalized).dot(&normalizer(&ts));
        let scale = matrix[[2, 2]];
        if scale.abs() < PIVOT_EPSILON {
            return None;
        }
        Some(Self {
            matrix: matrix / scale,
        })
    }

    /// Map a point; `None` if it lands at infinity
    pub fn project(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.matrix;
        let w = m[[2, 0]] * x + m[[2, 1]] * y + m[[2, 2]];
        if w.abs() < PIVOT_EPSILON {
            return None;
        }
        let u = (m[[0, 0]] * x + m[[0, 1]] * y + m[[0, 2]]) / w;
        let v = (m[[1, 0]] * x + m[[1, 1]] * y + m[[1, 2]]) / w;
        Some((u, v))
    }

    fn error(&self, src: (f64, f64), dst: (f64, f64)) -> f64 {
        match self.project(src.0, src.1) {
            Some((u, v)) => ((u - dst.0).powi(2) + (v - dst.1).powi(2)).sqrt(),
            None => f64::INFINITY,
        }
    }
}

/// Robust fit: returns the transform and an inlier flag per correspondence.
///
/// Sampling is seeded, so the same input always gives the same answer.
pub fn find_homography(
    src: &[(f64, f64)],
    dst: &[(f64, f64)],
    tolerance: f64,
) -> Option<(Homography, Vec<bool>)> {
    let n = src.len();
    if n < 4 || n != dst.len() {
        return None;
    }

    let inliers_of = |h: &Homography| -> Vec<bool> {
        src.iter()
            .zip(dst)
            .map(|(&s, &d)| h.error(s, d) <= tolerance)
            .collect()
    };

    let mut best: Option<Vec<bool>> = None;
    let mut best_count = 0;
    if n == 4 {
        let h = Homography::fit(src, dst)?;
        let mask = inliers_of(&h);
        best_count = mask.iter().filter(|&&b| b).count();
        best = Some(mask);
    } else {
        let mut rng = StdRng::seed_from_u64(RANSAC_SEED);
        for _ in 0..RANSAC_ITERATIONS {
            let picks = rand::seq::index::sample(&mut rng, n, 4).into_vec();
            let s: Vec<(f64, f64)> = picks.iter().map(|&i| src[i]).collect();
            let d: Vec<(f64, f64)> = picks.iter().map(|&i| dst[i]).collect();
            let Some(h) = Homography::fit(&s, &d) else {
                continue;
            };
            let mask = inliers_of(&h);
            let count = mask.iter().filter(|&&b| b).count();
            if count > best_count {
                best_count = count;
                best = Some(mask);
                if count == n {
                    break;
                }
            }
        }
    }

    let mask = best?;
    if best_count < 4 {
        return None;
    }
    let (s, d): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .map(|((&s, &d), _)| (s, d))
        .unzip();
    let refined = Homography::fit(&s, &d)?;
    let mask = inliers_of(&refined);
    Some((refined, mask))
}

/// Translate to the centroid and scale to mean distance sqrt(2)
fn normalize(points: &[(f64, f64)]) -> Option<([f64; 3], Vec<(f64, f64)>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < PIVOT_EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let normalized = points
        .iter()
        .map(|p| ((p.0 - cx) * s, (p.1 - cy) * s))
        .collect();
    Some(([s, cx, cy], normalized))
}

fn normalizer(t: &[f64; 3]) -> Array2<f64> {
    let [s, cx, cy] = *t;
    array![[s, 0.0, -s * cx], [0.0, s, -s * cy], [0.0, 0.0, 1.0]]
}

fn denormalizer(t: &[f64; 3]) -> Array2<f64> {
    let [s, cx, cy] = *t;
    array![[1.0 / s, 0.0, cx], [0.0, 1.0 / s, cy], [0.0, 0.0, 1.0]]
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < PIVOT_EPSILON {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in (row + 1)..n {
            acc -= a[[row, k]] * x[k];
        }
        x[row] = acc / a[[row, row]];
    }
    Some(x)
}
