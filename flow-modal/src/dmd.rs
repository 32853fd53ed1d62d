use faer::{c64, Mat};
use log::{debug, warn};

use crate::eigen::{eigen_dual, EigenDual};
use crate::types::{
    DefectPolicy, DmdConfig, DmdMethod, DmdResult, ModalError, StateWeight, Strictness,
    SvdComponents,
};
use crate::utils::{
    clamp_rank, inverse_checked, lstsq_c64, numerical_rank, principal_ln, reduced_weight,
    thin_svd, to_complex, validate_matrix,
};

/// Perform Dynamic Mode Decomposition on a flattened snapshot matrix.
///
/// # Arguments
/// * `x` - Data matrix (n_state × n_time), columns are time-ordered.
/// * `config` - DMD configuration (rank, dt, tol, method, ...).
///
/// # Algorithm
/// 1. Split into X = x[:, 0..n-1] and Y = x[:, 1..n]
/// 2. Truncated SVD: X ≈ U Σ Vᵀ
/// 3. Reduced operator: Ã = Uᵀ Y V Σ⁻¹ (averaged with the inverted
///    backward operator for [`DmdMethod::ForwardBackward`])
/// 4. Biorthogonal eigen-system of Ã
/// 5. Exact modes Ψ = Y V Σ⁻¹ W, adjoint modes Φ = U W⁺
/// 6. Amplitudes: b = Ψ⁺ x₀, then the amplitude filter
pub fn dmd(x: &Mat<f64>, config: &DmdConfig) -> Result<DmdResult, ModalError> {
    config.validate()?;
    validate_matrix(x, 1, 3)?;
    config.weight.validate(x.nrows())?;

    let n_time = x.ncols();
    let x1 = x.subcols(0, n_time - 1).to_owned();
    let x2 = x.subcols(1, n_time - 1).to_owned();
    fit_pair(&x1, &x2, (x.nrows(), n_time), config)
}

/// DMD on an explicit snapshot pair `Y ≈ A X`.
pub fn dmd_pair(x: &Mat<f64>, y: &Mat<f64>, config: &DmdConfig) -> Result<DmdResult, ModalError> {
    config.validate()?;
    if (x.nrows(), x.ncols()) != (y.nrows(), y.ncols()) {
        return Err(ModalError::shape(
            "snapshot pair",
            format!("{}x{}", x.nrows(), x.ncols()),
            format!("{}x{}", y.nrows(), y.ncols()),
        ));
    }
    validate_matrix(x, 1, 2)?;
    validate_matrix(y, 1, 2)?;
    config.weight.validate(x.nrows())?;
    fit_pair(x, y, (x.nrows(), x.ncols() + 1), config)
}

fn fit_pair(
    x1: &Mat<f64>,
    x2: &Mat<f64>,
    data_dim: (usize, usize),
    config: &DmdConfig,
) -> Result<DmdResult, ModalError> {
    let dims = (x1.nrows(), x1.ncols());
    let svd_full = thin_svd(x1)?;
    let rank = clamp_rank(&svd_full.s, config.rank, dims, config.strictness)?;
    let svd = svd_full.truncate(rank);
    debug!(
        "dmd: {:?} fit, {}x{} snapshots, rank {rank} of {} requested",
        config.method, dims.0, dims.1, config.rank
    );

    let a_forward = reduced_operator(&svd, x2);
    let a_tilde = match config.method {
        DmdMethod::Exact => a_forward,
        DmdMethod::ForwardBackward => forward_backward(&svd, &a_forward, x1, x2, dims)?,
    };

    let q_reduced = reduced_weight(&svd.u, &config.weight);
    let dual = eigen_dual(&a_tilde, &q_reduced, config.sort, &config.defect)?;

    let (psi, phi) = lift_modes(&svd, x2, &dual, &config.weight, &config.defect)?;

    // Amplitudes: b = Ψ⁺ x₀
    let x0 = Mat::from_fn(x1.nrows(), 1, |i, _| c64::new(x1[(i, 0)], 0.0));
    let b_col = lstsq_c64(&psi, &x0)?;
    let b: Vec<c64> = (0..rank).map(|i| b_col[(i, 0)]).collect();

    let kept = amplitude_filter(&b, config.tol);
    let dropped = rank - kept.len();
    if dropped > 0 && config.strictness != Strictness::Silent {
        warn!(
            "discarded {dropped} of {rank} modes with |b| <= {:e}·max|b|",
            config.tol
        );
    }

    let discrete_eigenvalues: Vec<c64> = kept.iter().map(|&i| dual.values[i]).collect();
    // Principal branch: Im λ ∈ (−π/dt, π/dt]
    let eigenvalues = discrete_eigenvalues
        .iter()
        .map(|&rho| principal_ln(rho) / config.dt)
        .collect();

    Ok(DmdResult {
        method: config.method,
        rank_requested: config.rank,
        rank,
        discrete_eigenvalues,
        eigenvalues,
        modes: select_columns(&psi, &kept),
        adjoint_modes: select_columns(&phi, &kept),
        amplitudes: kept.iter().map(|&i| b[i]).collect(),
        kept,
        svd,
        a_tilde,
        dt: config.dt,
        data_dim,
    })
}

/// Ã = Uᵀ Y V Σ⁻¹.
fn reduced_operator(svd: &SvdComponents, y: &Mat<f64>) -> Mat<f64> {
    let rank = svd.s.len();
    let ut_y = svd.u.transpose() * y;
    let ut_y_v = &ut_y * &svd.v;

    // Multiply by Σ⁻¹ (scale columns)
    let mut a_tilde = Mat::<f64>::zeros(rank, rank);
    for i in 0..rank {
        for j in 0..rank {
            a_tilde[(i, j)] = ut_y_v[(i, j)] / svd.s[j];
        }
    }
    a_tilde
}

/// Ã = ½(Ã_f + T Ã_b⁻¹ T⁻¹).
///
/// The backward operator is fitted on the SVD of Y, so it lives in the
/// `U_b` coordinates; `T = U_fᵀ U_b` carries it into the forward basis
/// before averaging.
fn forward_backward(
    forward: &SvdComponents,
    a_forward: &Mat<f64>,
    x1: &Mat<f64>,
    x2: &Mat<f64>,
    dims: (usize, usize),
) -> Result<Mat<f64>, ModalError> {
    let rank = forward.s.len();
    let back_full = thin_svd(x2)?;
    let available = numerical_rank(&back_full.s, dims);
    if available < rank {
        return Err(ModalError::RankUnavailable {
            requested: rank,
            available,
        });
    }
    let backward = back_full.truncate(rank);
    let a_backward = reduced_operator(&backward, x1);

    let a_backward_inv = inverse_checked(&a_backward, "backward operator")?;
    let t = forward.u.transpose() * &backward.u;
    let t_inv = inverse_checked(&t, "forward/backward basis alignment")?;
    let aligned = &(&t * &a_backward_inv) * &t_inv;

    Ok(Mat::from_fn(rank, rank, |i, j| {
        0.5 * (a_forward[(i, j)] + aligned[(i, j)])
    }))
}

/// Lift reduced eigenvectors to the full state.
///
/// Ψ = Y V Σ⁻¹ W_right and Φ = U W_left, each column normalized to unit
/// length and Ψ rescaled so that φᵢᴴ Q ψᵢ = 1.
fn lift_modes(
    svd: &SvdComponents,
    y: &Mat<f64>,
    dual: &EigenDual,
    weight: &StateWeight,
    defect: &DefectPolicy,
) -> Result<(Mat<c64>, Mat<c64>), ModalError> {
    let rank = svd.s.len();
    let n_state = y.nrows();

    let y_v = y * &svd.v;
    let mut y_v_sinv = Mat::<f64>::zeros(n_state, rank);
    for i in 0..n_state {
        for j in 0..rank {
            y_v_sinv[(i, j)] = y_v[(i, j)] / svd.s[j];
        }
    }

    let mut psi = &to_complex(&y_v_sinv) * &dual.right;
    let mut phi = &to_complex(&svd.u) * &dual.left;

    for j in 0..rank {
        normalize_column(&mut psi, j)?;
        normalize_column(&mut phi, j)?;
        let mut pairing = c64::new(0.0, 0.0);
        for i in 0..n_state {
            pairing += phi[(i, j)].conj() * psi[(i, j)] * weight.at(i);
        }
        if !(pairing.norm() >= defect.hard) {
            return Err(ModalError::DefectiveEigenstructure {
                index: j,
                denominator: pairing.norm(),
            });
        }
        let inv = c64::new(1.0, 0.0) / pairing;
        for i in 0..n_state {
            psi[(i, j)] *= inv;
        }
    }
    Ok((psi, phi))
}

fn normalize_column(m: &mut Mat<c64>, j: usize) -> Result<(), ModalError> {
    let norm = (0..m.nrows())
        .map(|i| m[(i, j)].norm_sqr())
        .sum::<f64>()
        .sqrt();
    if !(norm > 0.0) {
        return Err(ModalError::NumericalError(format!(
            "mode {j} vanishes in the full state"
        )));
    }
    for i in 0..m.nrows() {
        m[(i, j)] /= norm;
    }
    Ok(())
}

/// Indices of modes surviving the amplitude filter, in order.
///
/// A mode survives when `tol == 0`, when it is the first largest-amplitude
/// mode, or when `|bᵢ| > tol·max|b|`.
pub fn amplitude_filter(b: &[c64], tol: f64) -> Vec<usize> {
    if tol <= 0.0 {
        return (0..b.len()).collect();
    }
    let mut argmax = 0;
    let mut max_abs = f64::NEG_INFINITY;
    for (i, bi) in b.iter().enumerate() {
        if bi.norm() > max_abs {
            max_abs = bi.norm();
            argmax = i;
        }
    }
    (0..b.len())
        .filter(|&i| i == argmax || b[i].norm() > tol * max_abs)
        .collect()
}

fn select_columns(m: &Mat<c64>, cols: &[usize]) -> Mat<c64> {
    Mat::from_fn(m.nrows(), cols.len(), |i, j| m[(i, cols[j])])
}
