//! End-to-end analysis runs over named flow fields.
//!
//! Each run threads its data explicitly through the stages and tags any
//! failure with the stage it came from.

use std::fmt;

use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dmd::dmd;
use crate::resolvent::{ForcingResponse, FrequencySweep, GainSpectrum, ResolventAnalyzer};
use crate::snapshots::{flatten_fields, FieldLayout, FlowSnapshots};
use crate::spod::{spod_driver, SpodConfig, SpodEstimator, SpodSpectrum};
use crate::types::{DmdConfig, DmdResult, ModalError};

/// Pipeline stage, used to tag errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Reynolds,
    Flatten,
    DmdFit,
    Resolvent,
    Spod,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validation",
            Stage::Reynolds => "Reynolds decomposition",
            Stage::Flatten => "flattening",
            Stage::DmdFit => "DMD fit",
            Stage::Resolvent => "resolvent analysis",
            Stage::Spod => "SPOD",
        };
        f.write_str(name)
    }
}

/// A [`ModalError`] tagged with the stage that raised it.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: ModalError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> AtStage<T> for Result<T, ModalError> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

/// Parameters for a full analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub dmd: DmdConfig,
    pub sweep: FrequencySweep,
    pub spod: SpodConfig,
}

impl AnalysisConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ModalError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ModalError::InvalidInput(format!("bad analysis config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ModalError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ModalError::InvalidInput(format!("cannot serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<(), ModalError> {
        self.dmd.validate()?;
        self.sweep.validate()
    }
}

/// Output of [`run_dmd_resolvent`].
#[derive(Debug, Clone)]
pub struct DmdReport {
    pub layout: FieldLayout,
    /// Time mean of each quantity, `[nx, ny]`.
    pub means: Vec<Array2<f64>>,
    pub dmd: DmdResult,
    pub gain: GainSpectrum,
    /// Optimal forcing and response at the gain peak, if any point was evaluated.
    pub optimal: Option<ForcingResponse>,
}

impl DmdReport {
    /// Whether every sweep point was evaluated.
    pub fn is_complete(&self) -> bool {
        self.gain.is_complete()
    }
}

/// Reynolds decomposition, DMD of the fluctuations, resolvent sweep and
/// the optimal forcing/response at the gain peak.
pub fn run_dmd_resolvent(
    snapshots: &FlowSnapshots,
    config: &AnalysisConfig,
) -> Result<DmdReport, PipelineError> {
    config.validate().at(Stage::Validate)?;
    let layout = snapshots.layout();
    info!(
        "DMD/resolvent run on {} ({} states, {} snapshots)",
        snapshots.names().join(", "),
        layout.n_state(),
        snapshots.shape().2
    );

    let (means, fluctuations) = snapshots.decompose().at(Stage::Reynolds)?;
    let views: Vec<_> = fluctuations.fields().iter().map(|f| f.view()).collect();
    let x = flatten_fields(&views).at(Stage::Flatten)?;
    debug!("flattened snapshot matrix {}x{}", x.nrows(), x.ncols());

    let result = dmd(&x, &config.dmd).at(Stage::DmdFit)?;
    info!("DMD kept {} of {} modes", result.n_modes(), result.rank);

    let analyzer = ResolventAnalyzer::from_dmd(&result, &config.dmd.weight).at(Stage::Resolvent)?;
    let gain = analyzer.sweep(&config.sweep).at(Stage::Resolvent)?;

    let optimal = match gain.peak() {
        Some((k, omega)) => {
            info!("peak gain at ω = {omega} (grid index {k})");
            Some(analyzer.forcing_response(omega).at(Stage::Resolvent)?)
        }
        None => {
            warn!("no sweep point was evaluated; skipping forcing/response");
            None
        }
    };

    Ok(DmdReport {
        layout,
        means,
        dmd: result,
        gain,
        optimal,
    })
}

/// Reynolds decomposition followed by SPOD of the fluctuations.
pub fn run_spod(
    snapshots: &FlowSnapshots,
    config: &SpodConfig,
    estimator: &dyn SpodEstimator,
) -> Result<SpodSpectrum, PipelineError> {
    let (_, fluctuations) = snapshots.decompose().at(Stage::Reynolds)?;
    let spectrum = spod_driver(&fluctuations, config, estimator).at(Stage::Spod)?;
    info!(
        "SPOD: {} frequencies, {} blocks",
        spectrum.n_freq(),
        spectrum.n_blocks
    );
    Ok(spectrum)
}
