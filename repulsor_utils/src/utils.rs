/////////////////////////////////////////////////////////////////////////////////////////////
//
// Supplies small conversions between faer matrix rows and 3-D vectors.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::{Mat, MatRef};
use glam::DVec3;

/// Reads row `i` of a `(N, 3)` matrix as a [`DVec3`].
///
/// # Examples
///
/// ```
/// use faer::mat;
/// use glam::DVec3;
/// use repulsor_utils::mat_row;
///
/// let positions = mat![
///     [0.0, 1.0, 2.0],
///     [3.0, 4.0, 5.0f64],
/// ];
///
/// assert_eq!(mat_row(&positions.as_ref(), 1), DVec3::new(3.0, 4.0, 5.0));
/// ```
#[inline(always)]
pub fn mat_row(mat: &MatRef<f64>, i: usize) -> DVec3 {
    DVec3::new(mat[(i, 0)], mat[(i, 1)], mat[(i, 2)])
}

/// Adds a [`DVec3`] into row `i` of a `(N, 3)` matrix.
#[inline(always)]
pub fn add_to_row(mat: &mut Mat<f64>, i: usize, v: DVec3) {
    mat[(i, 0)] += v.x;
    mat[(i, 1)] += v.y;
    mat[(i, 2)] += v.z;
}

/// Writes a [`DVec3`] into row `i` of a `(N, 3)` matrix.
#[inline(always)]
pub fn set_row(mat: &mut Mat<f64>, i: usize, v: DVec3) {
    mat[(i, 0)] = v.x;
    mat[(i, 1)] = v.y;
    mat[(i, 2)] = v.z;
}

/// Component-wise minimum of two vectors.
#[inline(always)]
pub fn vector_min(a: DVec3, b: DVec3) -> DVec3 {
    DVec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z))
}

/// Component-wise maximum of two vectors.
#[inline(always)]
pub fn vector_max(a: DVec3, b: DVec3) -> DVec3 {
    DVec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z))
}

/// Frobenius inner product of two matrices of matching shape.
#[inline(always)]
pub fn frobenius_dot(a: &MatRef<f64>, b: &MatRef<f64>) -> f64 {
    debug_assert_eq!(a.nrows(), b.nrows());
    debug_assert_eq!(a.ncols(), b.ncols());

    let mut total = 0.0;
    for j in 0..a.ncols() {
        total += a
            .col(j)
            .iter()
            .zip(b.col(j).iter())
            .map(|(x, y)| x * y)
            .sum::<f64>();
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn row_round_trip() {
        let mut m = Mat::<f64>::zeros(3, 3);
        set_row(&mut m, 1, DVec3::new(1.0, 2.0, 3.0));
        add_to_row(&mut m, 1, DVec3::new(0.5, 0.5, 0.5));
        assert_eq!(mat_row(&m.as_ref(), 1), DVec3::new(1.5, 2.5, 3.5));
        assert_eq!(mat_row(&m.as_ref(), 0), DVec3::ZERO);
    }

    #[test]
    fn component_extrema() {
        let a = DVec3::new(1.0, -2.0, 5.0);
        let b = DVec3::new(0.0, 3.0, 5.0);
        assert_eq!(vector_min(a, b), DVec3::new(0.0, -2.0, 5.0));
        assert_eq!(vector_max(a, b), DVec3::new(1.0, 3.0, 5.0));
    }

    #[test]
    fn frobenius_dot_matches_manual_sum() {
        let a = mat![[1.0, 2.0], [3.0, 4.0f64]];
        let b = mat![[5.0, 6.0], [7.0, 8.0f64]];
        assert_eq!(frobenius_dot(&a.as_ref(), &b.as_ref()), 70.0);
    }
}
