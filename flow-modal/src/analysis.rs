use faer::{c64, Mat};

use crate::types::{
    DmdResult, DominantCriterion, ErrorMetrics, ModalError, ModeInfo, Stability, StabilityResult,
};

/// Per-mode spectral information.
///
/// Growth rate and angular frequency are read off the continuous-time
/// eigenvalue λ; stability is classified from the discrete eigenvalue |ρ|.
pub fn mode_spectrum(result: &DmdResult) -> Vec<ModeInfo> {
    let mut info = Vec::with_capacity(result.n_modes());

    for i in 0..result.n_modes() {
        let lambda = result.eigenvalues[i];
        let rho = result.discrete_eigenvalues[i];
        let magnitude = rho.norm();
        let growth_rate = lambda.re;
        let angular_frequency = lambda.im;
        let period = if angular_frequency.abs() > 1e-14 {
            2.0 * std::f64::consts::PI / angular_frequency.abs()
        } else {
            f64::INFINITY
        };
        let half_life = if growth_rate.abs() > 1e-14 {
            Some(-(2.0_f64.ln()) / growth_rate)
        } else {
            None
        };

        info.push(ModeInfo {
            index: i,
            eigenvalue: lambda,
            discrete_eigenvalue: rho,
            magnitude,
            growth_rate,
            angular_frequency,
            frequency: angular_frequency / (2.0 * std::f64::consts::PI),
            period,
            half_life,
            stability: classify_eigenvalue(magnitude, 1e-6),
            amplitude: result.amplitudes[i].norm(),
        });
    }

    info
}

/// Analyze system stability.
pub fn dmd_stability(result: &DmdResult, tol: f64) -> StabilityResult {
    let mode_stability: Vec<Stability> = result
        .discrete_eigenvalues
        .iter()
        .map(|rho| classify_eigenvalue(rho.norm(), tol))
        .collect();

    let spectral_radius = result
        .discrete_eigenvalues
        .iter()
        .map(|rho| rho.norm())
        .fold(0.0_f64, f64::max);

    let is_unstable = mode_stability.contains(&Stability::Growing);
    let is_marginal = mode_stability.contains(&Stability::Neutral);

    StabilityResult {
        is_stable: !is_unstable,
        is_unstable,
        is_marginal,
        spectral_radius,
        mode_stability,
    }
}

/// Reconstruct snapshots from the kept modes.
///
/// x_k = Re Σᵢ ψᵢ · bᵢ · exp(λᵢ k dt)
///
/// If `modes_subset` is provided, only the specified mode indices are used.
pub fn dmd_reconstruct(
    result: &DmdResult,
    n_steps: usize,
    modes_subset: Option<&[usize]>,
) -> Result<Mat<f64>, ModalError> {
    let n_state = result.n_state();
    let n_modes = result.n_modes();

    let indices: Vec<usize> = match modes_subset {
        Some(idx) => {
            if let Some(&bad) = idx.iter().find(|&&i| i >= n_modes) {
                return Err(ModalError::InvalidInput(format!(
                    "mode index {bad} out of range ({n_modes} modes)"
                )));
            }
            idx.to_vec()
        }
        None => (0..n_modes).collect(),
    };

    let mut recon = Mat::<f64>::zeros(n_state, n_steps);
    for k in 0..n_steps {
        let t = k as f64 * result.dt;
        let coeffs: Vec<(usize, c64)> = indices
            .iter()
            .map(|&j| (j, result.amplitudes[j] * (result.eigenvalues[j] * t).exp()))
            .collect();
        for i in 0..n_state {
            let mut val = c64::new(0.0, 0.0);
            for &(j, c) in &coeffs {
                val += result.modes[(i, j)] * c;
            }
            recon[(i, k)] = val.re;
        }
    }

    Ok(recon)
}

/// Compute reconstruction error metrics against the original snapshots.
pub fn dmd_error(result: &DmdResult, x_original: &Mat<f64>) -> Result<ErrorMetrics, ModalError> {
    let n_state = x_original.nrows();
    let n_time = x_original.ncols();
    if n_state != result.n_state() {
        return Err(ModalError::shape("original snapshot rows", result.n_state(), n_state));
    }
    if n_time == 0 {
        return Err(ModalError::InvalidInput("no snapshots to compare".into()));
    }
    let recon = dmd_reconstruct(result, n_time, None)?;

    let mut sum_sq = 0.0;
    let mut sum_abs = 0.0;
    let mut orig_norm_sq = 0.0;
    let mut per_var_sq = vec![0.0; n_state];
    let n_total = (n_state * n_time) as f64;

    for i in 0..n_state {
        for k in 0..n_time {
            let diff = recon[(i, k)] - x_original[(i, k)];
            sum_sq += diff * diff;
            sum_abs += diff.abs();
            orig_norm_sq += x_original[(i, k)] * x_original[(i, k)];
            per_var_sq[i] += diff * diff;
        }
    }

    let relative_error = if orig_norm_sq > 0.0 {
        (sum_sq / orig_norm_sq).sqrt()
    } else {
        0.0
    };

    Ok(ErrorMetrics {
        rmse: (sum_sq / n_total).sqrt(),
        mae: sum_abs / n_total,
        relative_error,
        per_variable_rmse: per_var_sq
            .iter()
            .map(|v| (v / n_time as f64).sqrt())
            .collect(),
    })
}

/// Indices of the `n` dominant modes, best first.
pub fn dmd_dominant_modes(
    result: &DmdResult,
    n: usize,
    criterion: DominantCriterion,
) -> Vec<usize> {
    let n_modes = result.n_modes();

    let mut scored: Vec<(usize, f64)> = (0..n_modes)
        .map(|i| {
            let rho = result.discrete_eigenvalues[i].norm();
            let score = match criterion {
                DominantCriterion::Amplitude => result.amplitudes[i].norm(),
                DominantCriterion::Energy => result.amplitudes[i].norm() * rho,
                DominantCriterion::Stability => 1.0 / (1.0 + (rho - 1.0).abs()),
            };
            (i, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(n).map(|(i, _)| i).collect()
}

/// Classify an eigenvalue by its magnitude relative to the unit circle.
fn classify_eigenvalue(magnitude: f64, tol: f64) -> Stability {
    if magnitude < 1.0 - tol {
        Stability::Decaying
    } else if magnitude > 1.0 + tol {
        Stability::Growing
    } else {
        Stability::Neutral
    }
}
