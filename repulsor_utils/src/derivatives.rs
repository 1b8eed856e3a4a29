/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements per-vertex derivatives of triangle area, normal, volume, and hat functions.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use glam::DVec3;

/// Area and unit normal of a triangle in one pass. The normal is zero for
/// degenerate triangles.
#[inline(always)]
pub fn triangle_area_normal(p: &[DVec3; 3]) -> (f64, DVec3) {
    let cross = (p[1] - p[0]).cross(p[2] - p[0]);
    let len = cross.length();
    let normal = if len > 0.0 { cross / len } else { DVec3::ZERO };
    (0.5 * len, normal)
}

/// Gradient of the triangle area with respect to corner `i`.
///
/// With corners `(v, j, k)` in orientation order, the gradient is
/// `(p_j - p_k) x n / 2`: perpendicular to the opposite edge, in the
/// triangle plane.
#[inline(always)]
pub fn triangle_area_gradient(p: &[DVec3; 3], i: usize) -> DVec3 {
    let (_, n) = triangle_area_normal(p);
    0.5 * (p[(i + 1) % 3] - p[(i + 2) % 3]).cross(n)
}

/// Gradient of the signed tetrahedral volume `p0 . (p1 x p2) / 6` with
/// respect to corner `i`. Summed over faces this is the shape derivative of
/// the enclosed volume.
#[inline(always)]
pub fn signed_volume_gradient(p: &[DVec3; 3], i: usize) -> DVec3 {
    p[(i + 1) % 3].cross(p[(i + 2) % 3]) / 6.0
}

/// Gradient of the linear hat function of corner `i` on the triangle:
/// constant over the face, perpendicular to the opposite edge, magnitude
/// one over the corner height.
#[inline(always)]
pub fn hat_gradient(p: &[DVec3; 3], i: usize) -> DVec3 {
    let cross = (p[1] - p[0]).cross(p[2] - p[0]);
    let len_sq = cross.length_squared();
    if len_sq == 0.0 {
        return DVec3::ZERO;
    }
    cross.cross(p[(i + 2) % 3] - p[(i + 1) % 3]) / len_sq
}

/// Gradient with respect to corner `i` of `g . n`, where `n` is the unit
/// normal of the triangle and `g` is held fixed.
///
/// Writing `c` for the unnormalized cross product, a corner displacement
/// `dp` changes `c` by `dp x (p_j - p_k)`, so the chain rule gives
/// `(p_j - p_k) x (g - (g . n) n) / |c|`.
#[inline(always)]
pub fn normal_dot_gradient(p: &[DVec3; 3], i: usize, g: DVec3) -> DVec3 {
    let cross = (p[1] - p[0]).cross(p[2] - p[0]);
    let len = cross.length();
    if len == 0.0 {
        return DVec3::ZERO;
    }
    let n = cross / len;
    let g_perp = g - n * n.dot(g);
    (p[(i + 1) % 3] - p[(i + 2) % 3]).cross(g_perp) / len
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_triangle(rng: &mut StdRng) -> [DVec3; 3] {
        [0, 1, 2].map(|_| {
            DVec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            )
        })
    }

    fn numeric_gradient<F: Fn(&[DVec3; 3]) -> f64>(
        p: &[DVec3; 3],
        i: usize,
        eps: f64,
        f: F,
    ) -> DVec3 {
        let mut out = DVec3::ZERO;
        for axis in 0..3 {
            let mut plus = *p;
            let mut minus = *p;
            plus[i][axis] += eps;
            minus[i][axis] -= eps;
            out[axis] = (f(&plus) - f(&minus)) / (2.0 * eps);
        }
        out
    }

    #[test]
    fn area_gradient_matches_central_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let p = random_triangle(&mut rng);
            if triangle_area_normal(&p).0 < 1e-3 {
                continue;
            }
            for i in 0..3 {
                let analytic = triangle_area_gradient(&p, i);
                let numeric = numeric_gradient(&p, i, 1e-6, |q| triangle_area_normal(q).0);
                assert!(
                    (analytic - numeric).length() < 1e-7,
                    "area gradient mismatch: {:?} vs {:?}",
                    analytic,
                    numeric
                );
            }
        }
    }

    #[test]
    fn volume_gradient_matches_central_differences() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..20 {
            let p = random_triangle(&mut rng);
            for i in 0..3 {
                let analytic = signed_volume_gradient(&p, i);
                let numeric =
                    numeric_gradient(&p, i, 1e-6, |q| q[0].dot(q[1].cross(q[2])) / 6.0);
                assert!((analytic - numeric).length() < 1e-8);
            }
        }
    }

    #[test]
    fn normal_dot_gradient_matches_central_differences() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            let p = random_triangle(&mut rng);
            if triangle_area_normal(&p).0 < 1e-3 {
                continue;
            }
            let g = DVec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            for i in 0..3 {
                let analytic = normal_dot_gradient(&p, i, g);
                let numeric =
                    numeric_gradient(&p, i, 1e-6, |q| g.dot(triangle_area_normal(q).1));
                assert!(
                    (analytic - numeric).length() < 1e-6,
                    "normal chain mismatch: {:?} vs {:?}",
                    analytic,
                    numeric
                );
            }
        }
    }

    #[test]
    fn hat_gradients_sum_to_zero_and_interpolate() {
        let mut rng = StdRng::seed_from_u64(10);
        for _ in 0..20 {
            let p = random_triangle(&mut rng);
            if triangle_area_normal(&p).0 < 1e-3 {
                continue;
            }
            let sum = hat_gradient(&p, 0) + hat_gradient(&p, 1) + hat_gradient(&p, 2);
            assert!(sum.length() < 1e-12);

            // The hat function of corner i rises from 0 on the opposite edge
            // to 1 at the corner, so g_i . (p_i - p_j) = 1 for j != i.
            for i in 0..3 {
                let g = hat_gradient(&p, i);
                let along = g.dot(p[i] - p[(i + 1) % 3]);
                assert!((along - 1.0).abs() < 1e-10);
            }
        }
    }
}
