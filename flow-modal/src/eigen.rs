//! Biorthogonal eigenbases under a weighted inner product.
//!
//! For a square `A` and a symmetric positive-definite weight `Q`, the
//! right eigenvectors `V` of `A` and the eigenvectors `W` of the
//! `Q`-adjoint `A⁺ = Q⁻¹ Aᵀ Q` are returned paired index-for-index and
//! scaled so that `Wᴴ Q V = I`.
//!
//! Defective matrices (non-trivial Jordan blocks) have no such basis;
//! they are reported through [`ModalError::DefectiveEigenstructure`]
//! rather than handled.

use std::cmp::Ordering;

use faer::{c64, Mat};
use log::warn;

use crate::types::{DefectPolicy, EigenSort, ModalError};
use crate::utils::{lstsq, principal_arg, to_complex};

/// Eigenvalues with paired right and adjoint eigenvectors.
#[derive(Debug, Clone)]
pub struct EigenDual {
    /// Eigenvalues λ of `A`, in sorted order.
    pub values: Vec<c64>,
    /// Right eigenvectors `V` (columns), scaled so that `wᵢᴴ Q vᵢ = 1`.
    pub right: Mat<c64>,
    /// Adjoint eigenvectors `W` (columns), unit `Q`-norm, eigenvalue λ̄ᵢ.
    pub left: Mat<c64>,
}

/// `Q`-adjoint of `A`: the least-squares solution of `Q X = Aᵀ Q`.
///
/// No explicit inverse of `Q` is formed.
pub fn adj(a: &Mat<f64>, q: &Mat<f64>) -> Result<Mat<f64>, ModalError> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(ModalError::shape(
            "adjoint operator",
            "square matrix",
            format!("{}x{}", a.nrows(), a.ncols()),
        ));
    }
    if q.nrows() != n || q.ncols() != n {
        return Err(ModalError::shape(
            "inner-product weight",
            format!("{n}x{n}"),
            format!("{}x{}", q.nrows(), q.ncols()),
        ));
    }
    let rhs = a.transpose() * q;
    lstsq(q, &rhs)
}

/// Scale every column of `v` to unit `Q`-norm, `v ← v / sqrt(vᴴ Q v)`.
pub fn normalize_basis(mut v: Mat<c64>, q: &Mat<f64>) -> Result<Mat<c64>, ModalError> {
    let qc = to_complex(q);
    for j in 0..v.ncols() {
        let norm_sq = q_pairing(&v, j, &qc, &v, j).re;
        if !(norm_sq > 0.0) || !norm_sq.is_finite() {
            return Err(ModalError::NumericalError(format!(
                "column {j} has non-positive weighted norm {norm_sq:e}"
            )));
        }
        let inv = 1.0 / norm_sq.sqrt();
        for i in 0..v.nrows() {
            v[(i, j)] *= inv;
        }
    }
    Ok(v)
}

/// Eigen-decompose `A` together with its `Q`-adjoint and pair the bases.
///
/// # Ordering
/// Both spectra are sorted by `sort`, then the adjoint eigenvalue at each
/// position is checked against the conjugate of the right eigenvalue. Ties
/// fall through to Re(·), then |·|, then the original index, so the order
/// is total and reproducible. Sort keys can still disagree between the two
/// bases (the [`EigenSort::Real`] adjoint key does not mirror its right key);
/// in that case the adjoint basis is re-paired by nearest conjugate
/// eigenvalue and a warning is logged.
///
/// # Errors
/// [`ModalError::DefectiveEigenstructure`] when a pairing denominator
/// `wᵢᴴ Q vᵢ` falls below `defect.hard`.
pub fn eigen_dual(
    a: &Mat<f64>,
    q: &Mat<f64>,
    sort: EigenSort,
    defect: &DefectPolicy,
) -> Result<EigenDual, ModalError> {
    let a_adj = adj(a, q)?;

    let (lambda, v) = eigen(a)?;
    let (mu, w) = eigen(&a_adj)?;

    let order_v = sort_order(&lambda, |z| right_key(z, sort));
    let order_w = sort_order(&mu, |z| adjoint_key(z, sort));

    let values: Vec<c64> = order_v.iter().map(|&k| lambda[k]).collect();
    let mut order_w = order_w;
    if !is_conjugate_paired(&values, &order_w, &mu) {
        warn!("adjoint spectrum does not line up with {sort:?} ordering; re-pairing by conjugate");
        order_w = pair_by_conjugate(&values, &mu);
    }

    let v = normalize_basis(select_columns(&v, &order_v), q)?;
    let w = normalize_basis(select_columns(&w, &order_w), q)?;

    let mut right = v;
    biorthogonalize(&mut right, &w, &to_complex(q), defect)?;

    Ok(EigenDual {
        values,
        right,
        left: w,
    })
}

/// Scale each `vᵢ` by `1 / (wᵢᴴ Q vᵢ)`.
pub(crate) fn biorthogonalize(
    right: &mut Mat<c64>,
    left: &Mat<c64>,
    q: &Mat<c64>,
    defect: &DefectPolicy,
) -> Result<(), ModalError> {
    for i in 0..right.ncols() {
        let d = q_pairing(left, i, q, right, i);
        let mag = d.norm();
        if !(mag >= defect.hard) {
            return Err(ModalError::DefectiveEigenstructure {
                index: i,
                denominator: mag,
            });
        }
        if mag < defect.warn {
            warn!("near-defective eigen pair {i}: |wᴴQv| = {mag:.3e}");
        }
        let inv = c64::new(1.0, 0.0) / d;
        for k in 0..right.nrows() {
            right[(k, i)] *= inv;
        }
    }
    Ok(())
}

/// Eigen-decomposition of a real square matrix.
fn eigen(a: &Mat<f64>) -> Result<(Vec<c64>, Mat<c64>), ModalError> {
    let n = a.nrows();
    let evd = a
        .as_ref()
        .eigen()
        .map_err(|e| ModalError::EigenFailed(format!("{e:?}")))?;
    let s = evd.S().column_vector();
    let u = evd.U();

    let values = (0..n).map(|i| c64::new(s[i].re, s[i].im)).collect();
    let vectors = Mat::from_fn(n, n, |i, j| {
        let z = u[(i, j)];
        c64::new(z.re, z.im)
    });
    Ok((values, vectors))
}

/// `aᵢᴴ Q bⱼ` for columns of two complex bases.
fn q_pairing(a: &Mat<c64>, i: usize, q: &Mat<c64>, b: &Mat<c64>, j: usize) -> c64 {
    let n = a.nrows();
    let mut acc = c64::new(0.0, 0.0);
    for r in 0..n {
        let mut qb = c64::new(0.0, 0.0);
        for c in 0..n {
            qb += q[(r, c)] * b[(c, j)];
        }
        acc += a[(r, i)].conj() * qb;
    }
    acc
}

type SortKey = (f64, f64, f64);

/// Fold −0.0 into +0.0 so `total_cmp` does not split exact ties.
fn canon(x: f64) -> f64 {
    x + 0.0
}

fn right_key(z: c64, sort: EigenSort) -> SortKey {
    match sort {
        EigenSort::Log => (canon(principal_arg(z)), canon(z.re), z.norm()),
        EigenSort::Real => (canon(z.im), canon(z.re), z.norm()),
    }
}

/// Adjoint keys mirror the right keys through conjugation, so that
/// position `i` of the adjoint spectrum holds λ̄ᵢ. Under the log sort the
/// negated argument is taken on the principal branch of the conjugate,
/// which keeps negative real eigenvalues at +π on both sides.
fn adjoint_key(z: c64, sort: EigenSort) -> SortKey {
    match sort {
        EigenSort::Log => (canon(principal_arg(z.conj())), canon(z.re), z.norm()),
        EigenSort::Real => (canon(-z.re), canon(-z.im), z.norm()),
    }
}

fn sort_order(values: &[c64], key: impl Fn(c64) -> SortKey) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| {
        let (ka, kb) = (key(values[a]), key(values[b]));
        ka.0.total_cmp(&kb.0)
            .then(ka.1.total_cmp(&kb.1))
            .then(ka.2.total_cmp(&kb.2))
            .then(a.cmp(&b))
    });
    idx
}

/// Relative distance within which `μ` counts as `conj(λ)`.
const CONJUGATE_PAIR_TOL: f64 = 1e-8;

fn pairing_tolerance(values: &[c64]) -> f64 {
    let scale = values.iter().map(|z| z.norm()).fold(1.0_f64, f64::max);
    CONJUGATE_PAIR_TOL * scale
}

fn is_conjugate_paired(values: &[c64], order_w: &[usize], mu: &[c64]) -> bool {
    let tol = pairing_tolerance(values);
    values
        .iter()
        .zip(order_w)
        .all(|(lam, &k)| (mu[k].conj() - lam).norm() <= tol)
}

/// Greedy nearest-conjugate matching of the adjoint spectrum onto `values`.
fn pair_by_conjugate(values: &[c64], mu: &[c64]) -> Vec<usize> {
    let mut used = vec![false; mu.len()];
    let mut order = Vec::with_capacity(values.len());
    for lam in values {
        let best = (0..mu.len())
            .filter(|&k| !used[k])
            .min_by(|&a, &b| {
                let da = (mu[a].conj() - lam).norm();
                let db = (mu[b].conj() - lam).norm();
                da.partial_cmp(&db).unwrap_or(Ordering::Equal).then(a.cmp(&b))
            });
        if let Some(k) = best {
            used[k] = true;
            order.push(k);
        }
    }
    order
}

fn select_columns(m: &Mat<c64>, order: &[usize]) -> Mat<c64> {
    Mat::from_fn(m.nrows(), order.len(), |i, j| m[(i, order[j])])
}
