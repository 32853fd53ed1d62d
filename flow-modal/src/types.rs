use faer::{c64, Mat};
use serde::{Deserialize, Serialize};

/// Error types for modal decomposition operations.
#[derive(Debug, thiserror::Error)]
pub enum ModalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("rank {requested} requested but the data only supports rank {available}")]
    RankUnavailable { requested: usize, available: usize },

    #[error("singular operator in {stage} (reciprocal condition {rcond:.3e})")]
    SingularOperator { stage: &'static str, rcond: f64 },

    #[error("defective eigenstructure: pairing denominator {denominator:.3e} at eigenvalue {index}")]
    DefectiveEigenstructure { index: usize, denominator: f64 },

    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    #[error("eigendecomposition failed: {0}")]
    EigenFailed(String),

    #[error("numerical error: {0}")]
    NumericalError(String),

    #[error("SPOD estimator failed: {0}")]
    Spod(String),
}

impl ModalError {
    pub(crate) fn shape(
        context: impl Into<String>,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        ModalError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// How the reduced operator is fitted from the snapshot pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmdMethod {
    /// Ã = U_rᵀ Y V_r Σ_r⁻¹ from the SVD of X.
    #[default]
    Exact,
    /// Average of the forward operator and the inverted backward operator.
    ForwardBackward,
}

/// Ordering applied to the eigenvalues before pairing right and adjoint bases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EigenSort {
    /// Right basis by Im(ln λ) ascending, adjoint basis by −Im(ln λ̄) ascending.
    #[default]
    Log,
    /// Right basis by Im(λ) ascending, adjoint basis by −Re(λ̄) ascending.
    Real,
}

/// What to do when the data cannot support the requested rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Clamp and filter quietly.
    Silent,
    /// Clamp and filter, logging a warning.
    #[default]
    Warn,
    /// Refuse to clamp: return [`ModalError::RankUnavailable`].
    Strict,
}

/// Thresholds on the biorthogonal pairing denominator `wᴴ Q v`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefectPolicy {
    /// Below this magnitude a warning is logged.
    pub warn: f64,
    /// Below this magnitude the pairing is rejected as defective.
    pub hard: f64,
}

impl Default for DefectPolicy {
    fn default() -> Self {
        Self {
            warn: 1e-8,
            hard: 1e-12,
        }
    }
}

/// Inner-product weight on the full state vector.
///
/// Flow states are large, so only diagonal (quadrature / cell-area)
/// weights are supported at full-state size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateWeight {
    #[default]
    Identity,
    Diagonal(Vec<f64>),
}

impl StateWeight {
    /// Check the weight against a state dimension.
    pub fn validate(&self, n_state: usize) -> Result<(), ModalError> {
        match self {
            StateWeight::Identity => Ok(()),
            StateWeight::Diagonal(w) => {
                if w.len() != n_state {
                    return Err(ModalError::shape("state weight", n_state, w.len()));
                }
                if w.iter().any(|&wi| !(wi.is_finite() && wi > 0.0)) {
                    return Err(ModalError::InvalidInput(
                        "state weights must be finite and positive".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Weight of state entry `i`.
    pub fn at(&self, i: usize) -> f64 {
        match self {
            StateWeight::Identity => 1.0,
            StateWeight::Diagonal(w) => w[i],
        }
    }
}

/// Configuration for DMD computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmdConfig {
    /// Requested truncation rank (clamped to what the data supports).
    pub rank: usize,
    /// Time step between snapshots.
    pub dt: f64,
    /// Relative amplitude threshold below which modes are discarded.
    pub tol: f64,
    /// Operator fitting variant.
    pub method: DmdMethod,
    /// Eigenvalue ordering used for biorthogonal pairing.
    pub sort: EigenSort,
    /// Inner-product weight on the state.
    pub weight: StateWeight,
    /// Policy for rank clamping and mode filtering.
    pub strictness: Strictness,
    /// Defective-pairing thresholds.
    pub defect: DefectPolicy,
}

impl Default for DmdConfig {
    fn default() -> Self {
        Self {
            rank: 10,
            dt: 1.0,
            tol: 1e-6,
            method: DmdMethod::Exact,
            sort: EigenSort::Log,
            weight: StateWeight::Identity,
            strictness: Strictness::Warn,
            defect: DefectPolicy::default(),
        }
    }
}

impl DmdConfig {
    /// Check scalar parameters.
    pub fn validate(&self) -> Result<(), ModalError> {
        if self.rank == 0 {
            return Err(ModalError::InvalidInput("rank must be at least 1".into()));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ModalError::InvalidInput(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(ModalError::InvalidInput(format!(
                "tol must be non-negative, got {}",
                self.tol
            )));
        }
        if !(self.defect.hard >= 0.0 && self.defect.warn >= self.defect.hard) {
            return Err(ModalError::InvalidInput(
                "defect thresholds must satisfy 0 <= hard <= warn".into(),
            ));
        }
        Ok(())
    }
}

/// Components of the truncated SVD.
#[derive(Debug, Clone)]
pub struct SvdComponents {
    /// Left singular vectors (m × r).
    pub u: Mat<f64>,
    /// Singular values (r), descending.
    pub s: Vec<f64>,
    /// Right singular vectors (n × r), columns are right singular vectors.
    pub v: Mat<f64>,
}

impl SvdComponents {
    /// Keep the leading `rank` triplets.
    pub fn truncate(&self, rank: usize) -> SvdComponents {
        let rank = rank.min(self.s.len());
        SvdComponents {
            u: self.u.subcols(0, rank).to_owned(),
            s: self.s[..rank].to_vec(),
            v: self.v.subcols(0, rank).to_owned(),
        }
    }
}

/// Result of a DMD computation.
#[derive(Debug, Clone)]
pub struct DmdResult {
    /// Fitting variant used.
    pub method: DmdMethod,
    /// Rank asked for in the configuration.
    pub rank_requested: usize,
    /// Rank of the reduced operator after clamping.
    pub rank: usize,
    /// Discrete-time eigenvalues ρ of the kept modes.
    pub discrete_eigenvalues: Vec<c64>,
    /// Continuous-time eigenvalues λ = ln(ρ)/dt of the kept modes.
    pub eigenvalues: Vec<c64>,
    /// Exact DMD modes Ψ (n_state × r_kept), lifted from the right eigenvectors.
    pub modes: Mat<c64>,
    /// Adjoint modes Φ (n_state × r_kept), lifted from the dual eigenvectors.
    pub adjoint_modes: Mat<c64>,
    /// Amplitudes b (r_kept) fitted to the first snapshot.
    pub amplitudes: Vec<c64>,
    /// Positions of the kept modes in the sorted eigen-system of Ã.
    pub kept: Vec<usize>,
    /// Truncated SVD of X.
    pub svd: SvdComponents,
    /// Reduced operator Ã (rank × rank).
    pub a_tilde: Mat<f64>,
    /// Time step.
    pub dt: f64,
    /// Data dimensions (n_state, n_time).
    pub data_dim: (usize, usize),
}

impl DmdResult {
    /// Number of modes surviving the amplitude filter.
    pub fn n_modes(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Number of state variables.
    pub fn n_state(&self) -> usize {
        self.data_dim.0
    }
}

/// Information about a single DMD mode.
#[derive(Debug, Clone)]
pub struct ModeInfo {
    /// Mode index.
    pub index: usize,
    /// Continuous-time eigenvalue λ.
    pub eigenvalue: c64,
    /// Discrete-time eigenvalue ρ.
    pub discrete_eigenvalue: c64,
    /// |ρ|.
    pub magnitude: f64,
    /// Growth rate Re(λ).
    pub growth_rate: f64,
    /// Angular frequency Im(λ).
    pub angular_frequency: f64,
    /// Frequency Im(λ)/2π.
    pub frequency: f64,
    /// Oscillation period (time units).
    pub period: f64,
    /// Half-life for decaying modes (positive), doubling time for growing (negative).
    pub half_life: Option<f64>,
    /// Stability classification.
    pub stability: Stability,
    /// Mode amplitude |b|.
    pub amplitude: f64,
}

/// Stability classification of a mode or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Decaying,
    Neutral,
    Growing,
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stability::Decaying => write!(f, "decaying"),
            Stability::Neutral => write!(f, "neutral"),
            Stability::Growing => write!(f, "growing"),
        }
    }
}

/// Result of stability analysis.
#[derive(Debug, Clone)]
pub struct StabilityResult {
    /// Whether all modes are decaying or neutral.
    pub is_stable: bool,
    /// Whether any mode is growing.
    pub is_unstable: bool,
    /// Whether any mode is neutral (within tolerance).
    pub is_marginal: bool,
    /// Maximum |ρ|.
    pub spectral_radius: f64,
    /// Per-mode stability classification.
    pub mode_stability: Vec<Stability>,
}

/// Error metrics for reconstruction quality.
#[derive(Debug, Clone)]
pub struct ErrorMetrics {
    /// Root mean square error.
    pub rmse: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Relative error (Frobenius norm ratio).
    pub relative_error: f64,
    /// Per-variable RMSE.
    pub per_variable_rmse: Vec<f64>,
}

/// Criterion for selecting dominant modes.
#[derive(Debug, Clone, Copy)]
pub enum DominantCriterion {
    /// Sort by amplitude |b|.
    Amplitude,
    /// Sort by energy |b| × |ρ|.
    Energy,
    /// Sort by stability (closest to the unit circle first).
    Stability,
}
