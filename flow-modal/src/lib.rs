//! # flow-modal
//!
//! Modal decomposition of time-resolved 2D flow snapshots.
//!
//! - **Reynolds decomposition** ([`reynolds_decompose`], [`FlowSnapshots`]):
//!   mean/fluctuation split and flattening of stacked quantities
//! - **DMD** ([`dmd()`]): exact-SVD DMD and forward-backward DMD with
//!   biorthogonal exact/adjoint modes and an amplitude filter
//! - **Biorthogonal eigensolver** ([`eigen_dual`]): paired right and
//!   adjoint eigenbases under a weighted inner product
//! - **Resolvent analysis** ([`ResolventAnalyzer`]): optimal gain sweep
//!   and forcing/response shapes on the DMD eigen-system
//! - **SPOD** ([`spod_driver`], [`WelchSpod`]): spectral POD through a
//!   pluggable estimator
//! - **Pipeline** ([`run_dmd_resolvent`], [`run_spod`]): stage-tagged
//!   end-to-end runs
//!
//! ## Quick Start
//!
//! ```rust
//! use flow_modal::{dmd, DmdConfig};
//!
//! // A neutral oscillator observed through two states
//! let n = 100;
//! let mut data = faer::Mat::<f64>::zeros(2, n);
//! for j in 0..n {
//!     let t = j as f64 * 0.1;
//!     data[(0, j)] = t.sin();
//!     data[(1, j)] = t.cos();
//! }
//!
//! let config = DmdConfig {
//!     rank: 2,
//!     dt: 0.1,
//!     ..Default::default()
//! };
//! let result = dmd(&data, &config).unwrap();
//! assert_eq!(result.n_modes(), 2);
//! ```
//!
//! ## References
//!
//! - Schmid (2010), *J. Fluid Mech.*, 656, 5-28
//! - Dawson et al. (2016), *Exp. Fluids*, 57, 42
//! - Towne, Schmidt & Colonius (2018), *J. Fluid Mech.*, 847, 821-867

pub mod types;
pub mod utils;

pub mod analysis;
pub mod dmd;
pub mod eigen;
pub mod pipeline;
pub mod resolvent;
pub mod snapshots;
pub mod spod;

pub use analysis::{dmd_dominant_modes, dmd_error, dmd_reconstruct, dmd_stability, mode_spectrum};
pub use dmd::{amplitude_filter, dmd, dmd_pair};
pub use eigen::{adj, eigen_dual, normalize_basis, EigenDual};
pub use pipeline::{
    run_dmd_resolvent, run_spod, AnalysisConfig, DmdReport, PipelineError, Stage,
};
pub use resolvent::{ForcingResponse, FrequencySweep, GainSpectrum, ResolventAnalyzer};
pub use snapshots::{
    flatten_fields, reynolds_decompose, unflatten_modes, FieldLayout, FlowSnapshots,
    ReynoldsDecomposition,
};
pub use spod::{
    spod_driver, spod_matrix, DftLength, SpodConfig, SpodEstimator, SpodMethod, SpodOutput,
    SpodParams, SpodSpectrum, SpodWindow, WelchSpod,
};
pub use types::{
    DefectPolicy, DmdConfig, DmdMethod, DmdResult, DominantCriterion, EigenSort, ErrorMetrics,
    ModalError, ModeInfo, Stability, StabilityResult, StateWeight, Strictness, SvdComponents,
};

/// Complex scalar used for eigenvalues, modes and amplitudes.
pub use faer::c64;
