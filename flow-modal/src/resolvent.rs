//! Input–output (resolvent) analysis on a modal eigen-system.
//!
//! With modal dynamics `ȧ = Λ a + f` and state `x = B a`, the energy
//! norm `‖x‖²_Q = aᴴ G a` with `G = Bᴴ Q B = Fᴴ F`. In the coordinates
//! `F a` the resolvent is `R(ω) = F (−iωI − Λ)⁻¹ F⁻¹` and its singular
//! values are the optimal energy gains of harmonic forcing at ω.

use faer::linalg::solvers::{Llt, Solve};
use faer::{c64, Mat, Side};
use log::{debug, warn};
use ndarray::Array4;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::snapshots::FieldLayout;
use crate::types::{DmdResult, ModalError, StateWeight};
use crate::utils::{linspace, singular_values_c64, weighted_gram};

/// Relative distance below which `−iω − λ` counts as an exact resonance.
const RESONANCE_TOL: f64 = 1e-12;

/// Smallest accepted ratio of squared Cholesky pivots.
const CHOLESKY_RCOND: f64 = 1e-14;

/// Evenly spaced angular-frequency grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencySweep {
    pub omega_min: f64,
    pub omega_max: f64,
    pub n_points: usize,
}

impl Default for FrequencySweep {
    fn default() -> Self {
        Self {
            omega_min: 1.0,
            omega_max: 1000.0,
            n_points: 2000,
        }
    }
}

impl FrequencySweep {
    pub fn validate(&self) -> Result<(), ModalError> {
        if self.n_points == 0 {
            return Err(ModalError::InvalidInput(
                "frequency sweep needs at least one point".into(),
            ));
        }
        if !(self.omega_min.is_finite() && self.omega_max.is_finite()) {
            return Err(ModalError::InvalidInput(
                "frequency bounds must be finite".into(),
            ));
        }
        if self.n_points > 1 && !(self.omega_min < self.omega_max) {
            return Err(ModalError::InvalidInput(format!(
                "omega_min ({}) must be below omega_max ({})",
                self.omega_min, self.omega_max
            )));
        }
        Ok(())
    }

    /// The grid `ω_k = ω_min + k(ω_max − ω_min)/(n − 1)`.
    pub fn grid(&self) -> Result<Vec<f64>, ModalError> {
        self.validate()?;
        Ok(linspace(self.omega_min, self.omega_max, self.n_points))
    }
}

/// Resolvent singular values over a frequency grid.
#[derive(Debug, Clone)]
pub struct GainSpectrum {
    /// Sweep grid, strictly increasing.
    pub omega: Vec<f64>,
    /// Singular values at each ω, descending; `None` where the point
    /// could not be evaluated.
    pub sigma: Vec<Option<Vec<f64>>>,
}

impl GainSpectrum {
    pub fn len(&self) -> usize {
        self.omega.len()
    }

    pub fn is_empty(&self) -> bool {
        self.omega.is_empty()
    }

    /// Whether every frequency was evaluated.
    pub fn is_complete(&self) -> bool {
        self.sigma.iter().all(Option::is_some)
    }

    /// Indices of frequencies that could not be evaluated.
    pub fn missing(&self) -> Vec<usize> {
        self.sigma
            .iter()
            .enumerate()
            .filter_map(|(k, s)| s.is_none().then_some(k))
            .collect()
    }

    /// Optimal energy gain σ₁² per frequency.
    pub fn optimal_gain(&self) -> Vec<Option<f64>> {
        self.sigma
            .iter()
            .map(|s| s.as_ref().and_then(|s| s.first()).map(|s1| s1 * s1))
            .collect()
    }

    /// Index and ω of the largest σ₁ among evaluated points.
    pub fn peak(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (k, s) in self.sigma.iter().enumerate() {
            let Some(&s1) = s.as_ref().and_then(|s| s.first()) else {
                continue;
            };
            if best.map_or(true, |(_, b)| s1 > b) {
                best = Some((k, s1));
            }
        }
        best.map(|(k, _)| (k, self.omega[k]))
    }

    /// Singular values as an `[n_freq, r]` matrix, if the sweep is complete.
    pub fn sigma_matrix(&self) -> Option<Mat<f64>> {
        if !self.is_complete() {
            return None;
        }
        let rows: Vec<&Vec<f64>> = self.sigma.iter().flatten().collect();
        let r = rows.first().map_or(0, |s| s.len());
        Some(Mat::from_fn(rows.len(), r, |k, j| rows[k][j]))
    }
}

/// Optimal forcing and response at a single frequency.
#[derive(Debug, Clone)]
pub struct ForcingResponse {
    pub omega: f64,
    /// Resolvent singular values at ω, descending.
    pub singular_values: Vec<f64>,
    /// Full-state forcing shapes `B F⁻¹ V` (columns).
    pub forcing: Mat<c64>,
    /// Full-state response shapes `B F⁻¹ U` (columns).
    pub response: Mat<c64>,
}

impl ForcingResponse {
    /// Reshape forcing and response into `[n_q, nx, ny, r]` fields.
    pub fn fields(&self, layout: &FieldLayout) -> Result<(Array4<c64>, Array4<c64>), ModalError> {
        Ok((layout.unflatten(&self.forcing)?, layout.unflatten(&self.response)?))
    }
}

/// Resolvent of a diagonal modal system in a weighted energy norm.
#[derive(Debug, Clone)]
pub struct ResolventAnalyzer {
    eigenvalues: Vec<c64>,
    f: Mat<c64>,
    f_inv: Mat<c64>,
    /// `B F⁻¹`, lifts modal singular vectors to the full state.
    lift: Mat<c64>,
}

impl ResolventAnalyzer {
    /// Build the analyzer from eigenvalues Λ and the full-state basis B
    /// whose columns evolve with them.
    pub fn new(
        eigenvalues: Vec<c64>,
        basis: &Mat<c64>,
        weight: &StateWeight,
    ) -> Result<Self, ModalError> {
        if eigenvalues.is_empty() {
            return Err(ModalError::InvalidInput(
                "resolvent needs at least one eigenvalue".into(),
            ));
        }
        if basis.ncols() != eigenvalues.len() {
            return Err(ModalError::shape(
                "resolvent basis columns",
                eigenvalues.len(),
                basis.ncols(),
            ));
        }
        weight.validate(basis.nrows())?;

        let gram = weighted_gram(basis, weight);
        let (f, f_inv) = gram_factor(&gram)?;
        let lift = basis * &f_inv;
        debug!("resolvent: {} modes, {} states", eigenvalues.len(), basis.nrows());

        Ok(Self {
            eigenvalues,
            f,
            f_inv,
            lift,
        })
    }

    /// Analyzer on the kept modes of a DMD fit.
    pub fn from_dmd(result: &DmdResult, weight: &StateWeight) -> Result<Self, ModalError> {
        Self::new(result.eigenvalues.clone(), &result.modes, weight)
    }

    pub fn n_modes(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Upper Cholesky factor `F` of the Gram matrix.
    pub fn cholesky_factor(&self) -> &Mat<c64> {
        &self.f
    }

    /// `R(ω) = F (−iωI − Λ)⁻¹ F⁻¹`.
    pub fn resolvent(&self, omega: f64) -> Result<Mat<c64>, ModalError> {
        let d = self.diagonal(omega)?;
        let r = self.n_modes();
        let mut scaled = self.f.clone();
        for (j, dj) in d.iter().enumerate() {
            for i in 0..r {
                scaled[(i, j)] *= dj;
            }
        }
        Ok(&scaled * &self.f_inv)
    }

    /// Resolvent singular values at ω, descending.
    pub fn singular_values(&self, omega: f64) -> Result<Vec<f64>, ModalError> {
        singular_values_c64(&self.resolvent(omega)?)
    }

    /// Evaluate the singular values over a frequency grid.
    ///
    /// Points are computed in parallel; the output keeps grid order. A
    /// point that cannot be evaluated (exact resonance, SVD failure) is
    /// stored as `None` and the sweep continues.
    pub fn sweep(&self, sweep: &FrequencySweep) -> Result<GainSpectrum, ModalError> {
        let omega = sweep.grid()?;
        let sigma: Vec<Option<Vec<f64>>> = omega
            .par_iter()
            .map(|&w| match self.singular_values(w) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("resolvent sweep skipped ω = {w}: {e}");
                    None
                }
            })
            .collect();
        let spectrum = GainSpectrum { omega, sigma };
        if !spectrum.is_complete() {
            warn!(
                "gain spectrum incomplete: {} of {} points missing",
                spectrum.missing().len(),
                spectrum.len()
            );
        }
        Ok(spectrum)
    }

    /// Optimal forcing and response shapes at ω.
    pub fn forcing_response(&self, omega: f64) -> Result<ForcingResponse, ModalError> {
        let resolvent = self.resolvent(omega)?;
        let svd = resolvent
            .thin_svd()
            .map_err(|e| ModalError::SvdFailed(format!("{e:?}")))?;
        let singular_values = singular_values_c64(&resolvent)?;
        let u = svd.U().to_owned();
        let v = svd.V().to_owned();
        let response = &self.lift * &u;
        let forcing = &self.lift * &v;
        Ok(ForcingResponse {
            omega,
            singular_values,
            forcing,
            response,
        })
    }

    fn diagonal(&self, omega: f64) -> Result<Vec<c64>, ModalError> {
        let s = c64::new(0.0, -omega);
        self.eigenvalues
            .iter()
            .map(|&lam| {
                let gap = s - lam;
                if gap.norm() <= RESONANCE_TOL * lam.norm().max(1.0) {
                    Err(ModalError::SingularOperator {
                        stage: "resolvent (exact resonance)",
                        rcond: 0.0,
                    })
                } else {
                    Ok(c64::new(1.0, 0.0) / gap)
                }
            })
            .collect()
    }
}

/// Cholesky factorization `G = Fᴴ F` of a Hermitian Gram matrix.
///
/// Returns `(F, F⁻¹)`. A non-positive pivot, or a factor whose squared
/// diagonal spans more than `1/CHOLESKY_RCOND`, is a singular Gram.
fn gram_factor(g: &Mat<c64>) -> Result<(Mat<c64>, Mat<c64>), ModalError> {
    let llt = Llt::new(g.as_ref(), Side::Lower).map_err(|e| {
        debug!("Gram factorization failed: {e:?}");
        ModalError::SingularOperator {
            stage: "Cholesky",
            rcond: 0.0,
        }
    })?;
    let factor = llt.L();
    let n = factor.nrows();
    let l = Mat::from_fn(n, n, |i, j| {
        if i >= j {
            factor[(i, j)]
        } else {
            c64::new(0.0, 0.0)
        }
    });

    let (lo, hi) = (0..n)
        .map(|k| l[(k, k)].re * l[(k, k)].re)
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), p| (lo.min(p), hi.max(p)));
    if !(lo > CHOLESKY_RCOND * hi) {
        return Err(ModalError::SingularOperator {
            stage: "Cholesky",
            rcond: if hi > 0.0 { lo / hi } else { 0.0 },
        });
    }

    // G⁻¹ Fᴴ = F⁻¹ F⁻ᴴ Fᴴ = F⁻¹
    let f_inv = llt.solve(l.as_ref());
    Ok((l.adjoint().to_owned(), f_inv))
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

    fn identity_c64(n: usize) -> Mat<c64> {
        Mat::from_fn(n, n, |i, j| {
            c64::new(if i == j { 1.0 } else { 0.0 }, 0.0)
        })
    }

    fn damped_pair() -> ResolventAnalyzer {
        let lambdas = vec![c64::new(-0.1, 2.0), c64::new(-0.1, -2.0)];
        ResolventAnalyzer::new(lambdas, &identity_c64(2), &StateWeight::Identity).unwrap()
    }

    #[test]
    fn test_grid_matches_linspace() {
        let sweep = FrequencySweep {
            omega_min: 1.0,
            omega_max: 2.0,
            n_points: 5,
        };
        assert_eq!(sweep.grid().unwrap(), vec![1.0, 1.25, 1.5, 1.75, 2.0]);
    }

    #[test]
    fn test_grid_rejects_reversed_bounds() {
        let sweep = FrequencySweep {
            omega_min: 3.0,
            omega_max: 1.0,
            n_points: 10,
        };
        assert!(sweep.grid().is_err());
        let empty = FrequencySweep {
            n_points: 0,
            ..Default::default()
        };
        assert!(empty.grid().is_err());
    }

    #[test]
    fn test_cholesky_factor() {
        let mut g = Mat::<c64>::zeros(2, 2);
        g[(0, 0)] = c64::new(1.0, 0.0);
        g[(0, 1)] = c64::new(1.0, 0.0);
        g[(1, 0)] = c64::new(1.0, 0.0);
        g[(1, 1)] = c64::new(2.0, 0.0);
        let (f, f_inv) = gram_factor(&g).unwrap();
        assert_near(f[(0, 0)].re, 1.0, 1e-14);
        assert_near(f[(0, 1)].re, 1.0, 1e-14);
        assert_near(f[(1, 0)].norm(), 0.0, 1e-14);
        assert_near(f[(1, 1)].re, 1.0, 1e-14);

        let prod = &f * &f_inv;
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_near(prod[(i, j)].re, expected, 1e-14);
                assert_near(prod[(i, j)].im, 0.0, 1e-14);
            }
        }
    }

    #[test]
    fn test_cholesky_factor_of_complex_gram() {
        let basis = Mat::from_fn(3, 2, |i, j| {
            c64::new((i + j) as f64, if i == j { 1.0 } else { -0.5 })
        });
        let analyzer = ResolventAnalyzer::new(
            vec![c64::new(-1.0, 1.0), c64::new(-1.0, -1.0)],
            &basis,
            &StateWeight::Diagonal(vec![1.0, 2.0, 0.5]),
        )
        .unwrap();
        let f = analyzer.cholesky_factor();
        assert_near(f[(1, 0)].norm(), 0.0, 1e-14);
        let gram = weighted_gram(&basis, &StateWeight::Diagonal(vec![1.0, 2.0, 0.5]));
        let fhf = f.adjoint().to_owned() * f;
        for i in 0..2 {
            for j in 0..2 {
                assert_near((fhf[(i, j)] - gram[(i, j)]).norm(), 0.0, 1e-12);
            }
        }
    }

    #[test]
    fn test_cholesky_rejects_rank_deficient_basis() {
        let basis = Mat::from_fn(3, 2, |i, _| c64::new(i as f64 + 1.0, 0.0));
        let err = ResolventAnalyzer::new(
            vec![c64::new(-1.0, 0.0), c64::new(-2.0, 0.0)],
            &basis,
            &StateWeight::Identity,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ModalError::SingularOperator {
                stage: "Cholesky",
                ..
            }
        ));
    }

    #[test]
    fn test_peak_gain_at_damped_pair() {
        let analyzer = damped_pair();
        let spectrum = analyzer
            .sweep(&FrequencySweep {
                omega_min: 0.5,
                omega_max: 4.0,
                n_points: 351,
            })
            .unwrap();
        assert!(spectrum.is_complete());
        let (k, omega) = spectrum.peak().unwrap();
        assert_eq!(k, 150);
        assert_near(omega, 2.0, 1e-9);
        let gain = spectrum.optimal_gain()[k].unwrap();
        assert_near(gain, 100.0, 1e-6);
    }

    #[test]
    fn test_singular_values_of_diagonal_system() {
        let analyzer = damped_pair();
        let s = analyzer.singular_values(1.0).unwrap();
        // |−i − λ|: 0.1 − 3i and 0.1 + i
        let expected_hi = 1.0 / (0.01_f64 + 1.0).sqrt();
        let expected_lo = 1.0 / (0.01_f64 + 9.0).sqrt();
        assert_near(s[0], expected_hi, 1e-12);
        assert_near(s[1], expected_lo, 1e-12);
    }

    #[test]
    fn test_resonance_marks_point_missing() {
        let analyzer = ResolventAnalyzer::new(
            vec![c64::new(0.0, 2.0)],
            &identity_c64(1),
            &StateWeight::Identity,
        )
        .unwrap();
        let spectrum = analyzer
            .sweep(&FrequencySweep {
                omega_min: -3.0,
                omega_max: -1.0,
                n_points: 3,
            })
            .unwrap();
        assert_eq!(spectrum.omega, vec![-3.0, -2.0, -1.0]);
        assert!(!spectrum.is_complete());
        assert_eq!(spectrum.missing(), vec![1]);
        assert!(spectrum.sigma_matrix().is_none());
        assert_eq!(spectrum.peak().map(|p| p.0), Some(0));
    }

    #[test]
    fn test_non_orthogonal_basis_raises_gain() {
        let mut basis = identity_c64(2);
        basis[(0, 1)] = c64::new(0.9, 0.0);
        let lambdas = vec![c64::new(-0.5, 0.0), c64::new(-1.0, 0.0)];
        let ortho =
            ResolventAnalyzer::new(lambdas.clone(), &identity_c64(2), &StateWeight::Identity)
                .unwrap();
        let skew = ResolventAnalyzer::new(lambdas, &basis, &StateWeight::Identity).unwrap();
        let s_ortho = ortho.singular_values(0.0).unwrap();
        let s_skew = skew.singular_values(0.0).unwrap();
        assert_near(s_ortho[0], 2.0, 1e-12);
        assert!(s_skew[0] > s_ortho[0]);
    }

    #[test]
    fn test_forcing_response_shapes() {
        let analyzer = damped_pair();
        let fr = analyzer.forcing_response(2.0).unwrap();
        assert_eq!(fr.forcing.nrows(), 2);
        assert_eq!(fr.response.ncols(), 2);
        assert_near(fr.singular_values[0], 10.0, 1e-9);
        // Unit forcing yields a response of norm σ₁.
        let norm = |m: &Mat<c64>, j: usize| {
            (0..m.nrows())
                .map(|i| m[(i, j)].norm_sqr())
                .sum::<f64>()
                .sqrt()
        };
        assert_near(norm(&fr.forcing, 0), 1.0, 1e-12);
        assert_near(norm(&fr.response, 0), 1.0, 1e-12);
    }
}
