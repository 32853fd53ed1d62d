use faer::{c64, Mat};
use log::warn;

use crate::types::{ModalError, StateWeight, Strictness, SvdComponents};

/// Singular values as reals, whichever scalar field faer stores them in.
pub(crate) trait RealPart {
    fn real_part(&self) -> f64;
}

impl RealPart for f64 {
    fn real_part(&self) -> f64 {
        *self
    }
}

impl RealPart for c64 {
    fn real_part(&self) -> f64 {
        self.re
    }
}

/// Validate that a matrix meets minimum dimension requirements and contains no NaN/Inf.
pub fn validate_matrix(x: &Mat<f64>, min_rows: usize, min_cols: usize) -> Result<(), ModalError> {
    let (rows, cols) = (x.nrows(), x.ncols());
    if rows < min_rows {
        return Err(ModalError::InvalidInput(format!(
            "matrix has {rows} rows, need at least {min_rows}"
        )));
    }
    if cols < min_cols {
        return Err(ModalError::InvalidInput(format!(
            "matrix has {cols} columns, need at least {min_cols}"
        )));
    }
    for j in 0..cols {
        for i in 0..rows {
            if !x[(i, j)].is_finite() {
                return Err(ModalError::InvalidInput(
                    "matrix contains NaN or Inf values".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Numerical rank: singular values above `ε·max(m, n)·σ₁`.
pub fn numerical_rank(singular_values: &[f64], dims: (usize, usize)) -> usize {
    let Some(&s_max) = singular_values.first() else {
        return 0;
    };
    let cutoff = f64::EPSILON * dims.0.max(dims.1) as f64 * s_max;
    singular_values.iter().take_while(|&&s| s > cutoff).count()
}

/// Clamp a requested truncation rank to what the singular values support.
///
/// The available rank is `min(m, n)` reduced to the numerical rank, so
/// that `Σ_r⁻¹` never divides by a vanishing singular value.
pub fn clamp_rank(
    singular_values: &[f64],
    requested: usize,
    dims: (usize, usize),
    strictness: Strictness,
) -> Result<usize, ModalError> {
    let available = numerical_rank(singular_values, dims).min(dims.0.min(dims.1));
    if available == 0 {
        return Err(ModalError::NumericalError(
            "snapshot matrix is numerically zero".into(),
        ));
    }
    if requested <= available {
        return Ok(requested);
    }
    match strictness {
        Strictness::Strict => Err(ModalError::RankUnavailable {
            requested,
            available,
        }),
        Strictness::Warn => {
            warn!("rank {requested} requested, clamped to available rank {available}");
            Ok(available)
        }
        Strictness::Silent => Ok(available),
    }
}

/// Thin SVD of a real matrix.
pub fn thin_svd(x: &Mat<f64>) -> Result<SvdComponents, ModalError> {
    let svd = x
        .thin_svd()
        .map_err(|e| ModalError::SvdFailed(format!("{e:?}")))?;
    let s_col = svd.S().column_vector();
    let s = (0..s_col.nrows()).map(|i| s_col[i].real_part()).collect();
    Ok(SvdComponents {
        u: svd.U().to_owned(),
        s,
        v: svd.V().to_owned(),
    })
}

/// Singular values of a complex matrix, descending.
pub fn singular_values_c64(a: &Mat<c64>) -> Result<Vec<f64>, ModalError> {
    let svd = a
        .thin_svd()
        .map_err(|e| ModalError::SvdFailed(format!("{e:?}")))?;
    let s_col = svd.S().column_vector();
    Ok((0..s_col.nrows()).map(|i| s_col[i].real_part()).collect())
}

/// Least-squares solution of `A X = B` through the SVD of `A`.
///
/// Singular values below `ε·max(m, n)·σ₁` are dropped, matching the
/// default cutoff of LAPACK `gelsd`.
pub fn lstsq(a: &Mat<f64>, b: &Mat<f64>) -> Result<Mat<f64>, ModalError> {
    if a.nrows() != b.nrows() {
        return Err(ModalError::shape("least-squares rhs rows", a.nrows(), b.nrows()));
    }
    let svd = thin_svd(a)?;
    let k = numerical_rank(&svd.s, (a.nrows(), a.ncols()));

    let ut_b = svd.u.transpose() * b;
    let mut scaled = Mat::<f64>::zeros(svd.s.len(), b.ncols());
    for i in 0..k {
        for j in 0..b.ncols() {
            scaled[(i, j)] = ut_b[(i, j)] / svd.s[i];
        }
    }
    Ok(&svd.v * &scaled)
}

/// Complex least-squares solution of `A X = B` through the SVD of `A`.
pub fn lstsq_c64(a: &Mat<c64>, b: &Mat<c64>) -> Result<Mat<c64>, ModalError> {
    if a.nrows() != b.nrows() {
        return Err(ModalError::shape("least-squares rhs rows", a.nrows(), b.nrows()));
    }
    let svd = a
        .thin_svd()
        .map_err(|e| ModalError::SvdFailed(format!("{e:?}")))?;
    let s_col = svd.S().column_vector();
    let s: Vec<f64> = (0..s_col.nrows()).map(|i| s_col[i].real_part()).collect();
    let k = numerical_rank(&s, (a.nrows(), a.ncols()));

    let uh_b = svd.U().adjoint() * b;
    let mut scaled = Mat::<c64>::zeros(s.len(), b.ncols());
    for i in 0..k {
        for j in 0..b.ncols() {
            scaled[(i, j)] = uh_b[(i, j)] / s[i];
        }
    }
    Ok(svd.V() * &scaled)
}

/// Inverse of a small square matrix, rejecting ill-conditioned input.
///
/// `stage` names the operator in the error. The reciprocal condition
/// number σ_min/σ_max must exceed `1e-12`.
pub fn inverse_checked(a: &Mat<f64>, stage: &'static str) -> Result<Mat<f64>, ModalError> {
    if a.nrows() != a.ncols() {
        return Err(ModalError::shape(
            stage,
            "square matrix",
            format!("{}x{}", a.nrows(), a.ncols()),
        ));
    }
    let svd = thin_svd(a)?;
    let s_max = svd.s.first().copied().unwrap_or(0.0);
    let s_min = svd.s.last().copied().unwrap_or(0.0);
    let rcond = if s_max > 0.0 { s_min / s_max } else { 0.0 };
    if !(rcond > 1e-12) {
        return Err(ModalError::SingularOperator { stage, rcond });
    }

    // A⁻¹ = V Σ⁻¹ Uᵀ
    let n = a.nrows();
    let mut v_sinv = svd.v.clone();
    for j in 0..n {
        for i in 0..n {
            v_sinv[(i, j)] /= svd.s[j];
        }
    }
    Ok(v_sinv.as_ref() * svd.u.transpose())
}

/// Promote a real matrix to complex.
pub fn to_complex(a: &Mat<f64>) -> Mat<c64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| c64::new(a[(i, j)], 0.0))
}

/// Argument on the principal branch, pinned to (−π, π].
///
/// `atan2` returns −π for a negative real with a negative-zero imaginary
/// part; such values are mapped to +π so the branch never depends on the
/// sign of zero.
pub fn principal_arg(z: c64) -> f64 {
    if z.im == 0.0 && z.re < 0.0 {
        std::f64::consts::PI
    } else {
        z.im.atan2(z.re)
    }
}

/// Principal logarithm ln|z| + i·arg(z) with arg in (−π, π].
///
/// This fixes the recovered oscillation frequency of a DMD eigenvalue to
/// |Im λ| ≤ π/dt; frequencies above Nyquist alias into that band.
pub fn principal_ln(z: c64) -> c64 {
    c64::new(z.norm().ln(), principal_arg(z))
}

/// Weighted Gram matrix `Bᴴ Q B` of a complex basis.
pub fn weighted_gram(b: &Mat<c64>, weight: &StateWeight) -> Mat<c64> {
    match weight {
        StateWeight::Identity => b.adjoint() * b,
        StateWeight::Diagonal(w) => {
            let k = b.ncols();
            Mat::from_fn(k, k, |i, j| {
                let mut acc = c64::new(0.0, 0.0);
                for (row, &wr) in w.iter().enumerate() {
                    acc += b[(row, i)].conj() * b[(row, j)] * wr;
                }
                acc
            })
        }
    }
}

/// Project a state weight onto a real orthonormal basis: `Uᵀ Q U`.
pub fn reduced_weight(u: &Mat<f64>, weight: &StateWeight) -> Mat<f64> {
    let r = u.ncols();
    match weight {
        StateWeight::Identity => Mat::<f64>::identity(r, r),
        StateWeight::Diagonal(w) => Mat::from_fn(r, r, |i, j| {
            let mut acc = 0.0;
            for (row, &wr) in w.iter().enumerate() {
                acc += u[(row, i)] * wr * u[(row, j)];
            }
            acc
        }),
    }
}

/// Evenly spaced grid of `n` points on `[lo, hi]`.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..n)
            .map(|k| lo + (hi - lo) * k as f64 / (n - 1) as f64)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(a: f64, b: f64, eps: f64) {
        assert!(
            (a - b).abs() < eps,
            "expected {a} ≈ {b} (diff = {})",
            (a - b).abs()
        );
    }

    #[test]
    fn test_validate_matrix_ok() {
        let m = Mat::<f64>::identity(3, 3);
        assert!(validate_matrix(&m, 1, 1).is_ok());
    }

    #[test]
    fn test_validate_matrix_too_small() {
        let m = Mat::<f64>::identity(2, 2);
        assert!(validate_matrix(&m, 3, 1).is_err());
    }

    #[test]
    fn test_validate_matrix_nan() {
        let mut m = Mat::<f64>::zeros(2, 2);
        m[(0, 0)] = 1.0;
        m[(0, 1)] = f64::NAN;
        assert!(validate_matrix(&m, 1, 1).is_err());
    }

    #[test]
    fn test_clamp_rank_within_range() {
        let s = vec![10.0, 5.0, 1.0, 0.1];
        assert_eq!(clamp_rank(&s, 2, (4, 10), Strictness::Warn).unwrap(), 2);
    }

    #[test]
    fn test_clamp_rank_clamps() {
        let s = vec![10.0, 5.0, 1.0];
        assert_eq!(clamp_rank(&s, 8, (3, 20), Strictness::Silent).unwrap(), 3);
    }

    #[test]
    fn test_clamp_rank_strict() {
        let s = vec![10.0, 5.0, 1.0];
        match clamp_rank(&s, 8, (3, 20), Strictness::Strict) {
            Err(ModalError::RankUnavailable {
                requested,
                available,
            }) => {
                assert_eq!(requested, 8);
                assert_eq!(available, 3);
            }
            other => panic!("expected RankUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_clamp_rank_drops_numerical_zeros() {
        let s = vec![1.0, 1e-20];
        assert_eq!(clamp_rank(&s, 2, (2, 10), Strictness::Silent).unwrap(), 1);
    }

    #[test]
    fn test_lstsq_square() {
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = 2.0;
        a[(0, 1)] = 1.0;
        a[(1, 0)] = 1.0;
        a[(1, 1)] = 3.0;
        let mut b = Mat::<f64>::zeros(2, 1);
        b[(0, 0)] = 3.0;
        b[(1, 0)] = 5.0;
        let x = lstsq(&a, &b).unwrap();
        // 2x + y = 3, x + 3y = 5  =>  x = 0.8, y = 1.4
        assert_near(x[(0, 0)], 0.8, 1e-12);
        assert_near(x[(1, 0)], 1.4, 1e-12);
    }

    #[test]
    fn test_lstsq_overdetermined() {
        // Fit y = 2t through three exact points.
        let a = Mat::from_fn(3, 1, |i, _| i as f64 + 1.0);
        let b = Mat::from_fn(3, 1, |i, _| 2.0 * (i as f64 + 1.0));
        let x = lstsq(&a, &b).unwrap();
        assert_near(x[(0, 0)], 2.0, 1e-12);
    }

    #[test]
    fn test_lstsq_c64() {
        let a = Mat::from_fn(2, 2, |i, j| {
            if i == j {
                c64::new(0.0, 1.0)
            } else {
                c64::new(0.0, 0.0)
            }
        });
        let b = Mat::from_fn(2, 1, |i, _| c64::new(i as f64 + 1.0, 0.0));
        let x = lstsq_c64(&a, &b).unwrap();
        // i·x = b  =>  x = -i·b
        assert_near(x[(0, 0)].re, 0.0, 1e-12);
        assert_near(x[(0, 0)].im, -1.0, 1e-12);
        assert_near(x[(1, 0)].im, -2.0, 1e-12);
    }

    #[test]
    fn test_inverse_checked() {
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = 4.0;
        a[(0, 1)] = 7.0;
        a[(1, 0)] = 2.0;
        a[(1, 1)] = 6.0;
        let inv = inverse_checked(&a, "test").unwrap();
        let prod = &a * &inv;
        for i in 0..2 {
            for j in 0..2 {
                assert_near(prod[(i, j)], if i == j { 1.0 } else { 0.0 }, 1e-12);
            }
        }
    }

    #[test]
    fn test_inverse_checked_singular() {
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = 1.0;
        a[(0, 1)] = 2.0;
        a[(1, 0)] = 2.0;
        a[(1, 1)] = 4.0;
        assert!(matches!(
            inverse_checked(&a, "test"),
            Err(ModalError::SingularOperator { stage: "test", .. })
        ));
    }

    #[test]
    fn test_principal_branch() {
        let z = c64::new(-1.0, -0.0);
        assert_near(principal_arg(z), std::f64::consts::PI, 1e-15);
        let ln = principal_ln(c64::new(0.0, -2.0));
        assert_near(ln.re, 2.0_f64.ln(), 1e-15);
        assert_near(ln.im, -std::f64::consts::FRAC_PI_2, 1e-15);
    }

    #[test]
    fn test_linspace_endpoints() {
        let g = linspace(-3.0, -1.0, 3);
        assert_eq!(g, vec![-3.0, -2.0, -1.0]);
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
    }
}
