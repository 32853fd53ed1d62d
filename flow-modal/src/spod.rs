//! Spectral proper orthogonal decomposition.
//!
//! [`spod_driver`] shapes fluctuation fields into a `[time, state]` matrix,
//! resolves the estimator parameters and hands both to a
//! [`SpodEstimator`]. [`WelchSpod`] is the built-in estimator: Welch
//! blocks, windowed FFT along time, and an SVD of the block ensemble at
//! every frequency.

use std::path::PathBuf;

use faer::{c64, Mat, MatRef};
use log::debug;
use ndarray::Array4;
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::snapshots::{FieldLayout, FlowSnapshots};
use crate::types::{ModalError, StateWeight};
use crate::utils::RealPart;

/// Taper applied to each block before the FFT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpodWindow {
    /// Symmetric Hamming window of length `n_dft`.
    #[default]
    Hamming,
    Rectangular,
    /// Explicit window; its length must equal `n_dft`.
    Custom(Vec<f64>),
}

impl SpodWindow {
    fn samples(&self, n_dft: usize) -> Result<Vec<f64>, ModalError> {
        match self {
            SpodWindow::Hamming => Ok(hamming(n_dft)),
            SpodWindow::Rectangular => Ok(vec![1.0; n_dft]),
            SpodWindow::Custom(w) => {
                if w.len() != n_dft {
                    return Err(ModalError::shape("SPOD window", n_dft, w.len()));
                }
                if !w.iter().all(|x| x.is_finite()) || w.iter().sum::<f64>() <= 0.0 {
                    return Err(ModalError::InvalidInput(
                        "SPOD window must be finite with a positive mean".into(),
                    ));
                }
                Ok(w.clone())
            }
        }
    }
}

/// How block spectra are formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpodMethod {
    /// FFT every block once and keep the full block spectrum in memory.
    #[default]
    Fast,
    /// Evaluate one frequency at a time with a direct DFT.
    LowMemory,
}

/// Block length selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DftLength {
    /// A quarter of the record, `nt / 4`.
    #[default]
    QuarterRecord,
    /// `2^⌊log₂(nt/10)⌋`.
    PowerOfTwo,
    Fixed(usize),
}

impl DftLength {
    fn resolve(self, nt: usize) -> usize {
        match self {
            DftLength::QuarterRecord => nt / 4,
            DftLength::PowerOfTwo => {
                let target = nt / 10;
                if target == 0 {
                    0
                } else {
                    1 << target.ilog2()
                }
            }
            DftLength::Fixed(n) => n,
        }
    }
}

/// SPOD configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpodConfig {
    /// Time step between snapshots.
    pub dt: f64,
    /// Spatial inner-product weight (uniform by default).
    pub weight: StateWeight,
    /// Samples shared by consecutive blocks (`n_dft / 2` when unset).
    pub n_overlap: Option<usize>,
    pub window: SpodWindow,
    pub method: SpodMethod,
    pub n_dft: DftLength,
    /// Keep mode shapes in the output.
    pub save_modes: bool,
    /// Directory for estimators that persist their results to files.
    pub output_dir: Option<PathBuf>,
}

impl Default for SpodConfig {
    fn default() -> Self {
        Self {
            dt: 1.0,
            weight: StateWeight::Identity,
            n_overlap: None,
            window: SpodWindow::Hamming,
            method: SpodMethod::Fast,
            n_dft: DftLength::QuarterRecord,
            save_modes: false,
            output_dir: None,
        }
    }
}

impl SpodConfig {
    /// Fill in defaults for a record of `nt` snapshots of `n_state` entries.
    pub fn resolve(&self, nt: usize, n_state: usize) -> Result<SpodParams, ModalError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ModalError::InvalidInput(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        let n_dft = self.n_dft.resolve(nt);
        if n_dft < 2 || n_dft > nt {
            return Err(ModalError::InvalidInput(format!(
                "block length {n_dft} invalid for {nt} snapshots"
            )));
        }
        let n_overlap = self.n_overlap.unwrap_or(n_dft / 2);
        if n_overlap >= n_dft {
            return Err(ModalError::InvalidInput(format!(
                "overlap {n_overlap} must be below the block length {n_dft}"
            )));
        }
        self.weight.validate(n_state)?;

        Ok(SpodParams {
            dt: self.dt,
            n_dft,
            n_overlap,
            window: self.window.samples(n_dft)?,
            weight: (0..n_state).map(|i| self.weight.at(i)).collect(),
            method: self.method,
            save_modes: self.save_modes,
            output_dir: self.output_dir.clone(),
        })
    }
}

/// Fully resolved estimator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SpodParams {
    pub dt: f64,
    pub n_dft: usize,
    pub n_overlap: usize,
    pub window: Vec<f64>,
    /// Diagonal weight, one entry per state.
    pub weight: Vec<f64>,
    pub method: SpodMethod,
    pub save_modes: bool,
    /// Passed through untouched; [`WelchSpod`] keeps everything in memory.
    pub output_dir: Option<PathBuf>,
}

impl SpodParams {
    /// `⌊(nt − n_overlap)/(n_dft − n_overlap)⌋`, zero when the overlap
    /// leaves no stride.
    pub fn n_blocks(&self, nt: usize) -> usize {
        match self.n_dft.checked_sub(self.n_overlap) {
            Some(stride) if stride > 0 => nt.saturating_sub(self.n_overlap) / stride,
            _ => 0,
        }
    }

    /// Frequencies of the one-sided spectrum in Hz.
    pub fn frequencies(&self) -> Vec<f64> {
        let n_freq = self.n_dft / 2 + 1;
        (0..n_freq)
            .map(|k| k as f64 / (self.n_dft as f64 * self.dt))
            .collect()
    }
}

/// Raw estimator output.
#[derive(Debug, Clone)]
pub struct SpodOutput {
    /// Modal energy `L[freq, mode]`, descending along each row.
    pub energy: Mat<f64>,
    /// Frequencies in Hz.
    pub freq: Vec<f64>,
    /// Mode shapes per frequency (`n_state × n_mode`), when requested.
    pub modes: Option<Vec<Mat<c64>>>,
    pub n_blocks: usize,
}

/// A SPOD routine. Receives data as `[time, state]`.
pub trait SpodEstimator: Send + Sync {
    fn estimate(&self, data: MatRef<'_, f64>, params: &SpodParams) -> Result<SpodOutput, ModalError>;
}

/// SPOD energy spectrum with angular frequencies.
#[derive(Debug, Clone)]
pub struct SpodSpectrum {
    pub energy: Mat<f64>,
    pub freq: Vec<f64>,
    /// `2π·freq`.
    pub omega: Vec<f64>,
    pub modes: Option<Vec<Mat<c64>>>,
    pub n_blocks: usize,
}

impl SpodSpectrum {
    pub fn n_freq(&self) -> usize {
        self.freq.len()
    }

    /// Leading-mode energy at every frequency.
    pub fn leading_energy(&self) -> Vec<f64> {
        (0..self.energy.nrows())
            .map(|k| {
                if self.energy.ncols() > 0 {
                    self.energy[(k, 0)]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Mode shapes at frequency index `k` as `[n_q, nx, ny, n_mode]` fields.
    pub fn mode_fields(&self, k: usize, layout: &FieldLayout) -> Result<Array4<c64>, ModalError> {
        let modes = self
            .modes
            .as_ref()
            .ok_or_else(|| ModalError::InvalidInput("SPOD modes were not saved".into()))?;
        let m = modes.get(k).ok_or_else(|| {
            ModalError::InvalidInput(format!("frequency index {k} out of range"))
        })?;
        layout.unflatten(m)
    }
}

/// SPOD of fluctuation fields.
pub fn spod_driver(
    fluctuations: &FlowSnapshots,
    config: &SpodConfig,
    estimator: &dyn SpodEstimator,
) -> Result<SpodSpectrum, ModalError> {
    spod_matrix(&fluctuations.to_matrix(), config, estimator)
}

/// SPOD of a flattened `[state, time]` snapshot matrix.
pub fn spod_matrix(
    snapshots: &Mat<f64>,
    config: &SpodConfig,
    estimator: &dyn SpodEstimator,
) -> Result<SpodSpectrum, ModalError> {
    let (n_state, nt) = (snapshots.nrows(), snapshots.ncols());
    if n_state == 0 {
        return Err(ModalError::InvalidInput("empty state".into()));
    }
    let params = config.resolve(nt, n_state)?;
    debug!(
        "spod: {nt} snapshots, n_dft {}, overlap {}, {:?}",
        params.n_dft, params.n_overlap, params.method
    );

    let out = estimator.estimate(snapshots.transpose(), &params)?;
    if out.energy.nrows() != out.freq.len() {
        return Err(ModalError::Spod(format!(
            "energy has {} rows for {} frequencies",
            out.energy.nrows(),
            out.freq.len()
        )));
    }

    let omega = out
        .freq
        .iter()
        .map(|f| 2.0 * std::f64::consts::PI * f)
        .collect();
    Ok(SpodSpectrum {
        energy: out.energy,
        freq: out.freq,
        omega,
        modes: out.modes,
        n_blocks: out.n_blocks,
    })
}

/// Welch-averaged SPOD estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct WelchSpod;

impl SpodEstimator for WelchSpod {
    fn estimate(&self, data: MatRef<'_, f64>, params: &SpodParams) -> Result<SpodOutput, ModalError> {
        let (nt, n_state) = (data.nrows(), data.ncols());
        if params.weight.len() != n_state {
            return Err(ModalError::shape("SPOD weight", n_state, params.weight.len()));
        }
        if params.window.len() != params.n_dft {
            return Err(ModalError::shape("SPOD window", params.n_dft, params.window.len()));
        }
        if params.n_overlap >= params.n_dft {
            return Err(ModalError::InvalidInput(format!(
                "overlap {} must be below the block length {}",
                params.n_overlap, params.n_dft
            )));
        }
        let n_blocks = params.n_blocks(nt);
        if n_blocks == 0 {
            return Err(ModalError::InvalidInput(format!(
                "{nt} snapshots hold no block of length {}",
                params.n_dft
            )));
        }
        let freq = params.frequencies();
        let n_freq = freq.len();
        let mean = time_mean(data);

        let win_mean = params.window.iter().sum::<f64>() / params.n_dft as f64;
        let block_scale = 1.0 / (win_mean * params.n_dft as f64);
        let ensemble_scale = 1.0 / (n_blocks as f64).sqrt();
        let sqrt_w: Vec<f64> = params.weight.iter().map(|w| w.sqrt()).collect();

        let blocks = Blocks {
            data,
            mean: &mean,
            window: &params.window,
            n_dft: params.n_dft,
            stride: params.n_dft - params.n_overlap,
            n_blocks,
        };
        let spectrum = match params.method {
            SpodMethod::Fast => Some(blocks.fft_all(n_freq)),
            SpodMethod::LowMemory => None,
        };

        let mut energy = Mat::<f64>::zeros(n_freq, n_blocks);
        let mut modes = params.save_modes.then(|| Vec::with_capacity(n_freq));

        for k in 0..n_freq {
            let scale = block_scale * ensemble_scale;
            let q_hat = match &spectrum {
                Some(s) => Mat::from_fn(n_state, n_blocks, |i, b| {
                    s[i][b * n_freq + k] * (scale * sqrt_w[i])
                }),
                None => {
                    let bins = blocks.dft_bin(k);
                    Mat::from_fn(n_state, n_blocks, |i, b| {
                        bins[(i, b)] * (scale * sqrt_w[i])
                    })
                }
            };

            let svd = q_hat
                .thin_svd()
                .map_err(|e| ModalError::SvdFailed(format!("{e:?}")))?;
            let s = svd.S().column_vector();
            let one_sided = if is_interior(k, params.n_dft) { 2.0 } else { 1.0 };
            for m in 0..s.nrows() {
                let sigma = s[m].real_part();
                energy[(k, m)] = one_sided * sigma * sigma;
            }

            if let Some(modes) = modes.as_mut() {
                let u = svd.U();
                modes.push(Mat::from_fn(u.nrows(), u.ncols(), |i, m| {
                    u[(i, m)] / sqrt_w[i]
                }));
            }
        }

        Ok(SpodOutput {
            energy,
            freq,
            modes,
            n_blocks,
        })
    }
}

/// Welch block view of `[time, state]` data.
struct Blocks<'a> {
    data: MatRef<'a, f64>,
    mean: &'a [f64],
    window: &'a [f64],
    n_dft: usize,
    stride: usize,
    n_blocks: usize,
}

impl Blocks<'_> {
    fn sample(&self, b: usize, t: usize, state: usize) -> f64 {
        let row = b * self.stride + t;
        self.window[t] * (self.data[(row, state)] - self.mean[state])
    }

    /// One-sided spectrum of every block, per state: `out[state][b·n_freq + k]`.
    fn fft_all(&self, n_freq: usize) -> Vec<Vec<c64>> {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(self.n_dft);
        let n_state = self.data.ncols();

        (0..n_state)
            .into_par_iter()
            .map(|state| {
                let mut out = Vec::with_capacity(self.n_blocks * n_freq);
                let mut buf = vec![Complex::new(0.0, 0.0); self.n_dft];
                for b in 0..self.n_blocks {
                    for (t, z) in buf.iter_mut().enumerate() {
                        *z = Complex::new(self.sample(b, t, state), 0.0);
                    }
                    fft.process(&mut buf);
                    out.extend(buf[..n_freq].iter().map(|z| c64::new(z.re, z.im)));
                }
                out
            })
            .collect()
    }

    /// DFT bin `k` of every block, `[state, block]`.
    fn dft_bin(&self, k: usize) -> Mat<c64> {
        let n = self.n_dft as f64;
        let twiddle: Vec<c64> = (0..self.n_dft)
            .map(|t| {
                let phase = -2.0 * std::f64::consts::PI * ((k * t) % self.n_dft) as f64 / n;
                c64::new(phase.cos(), phase.sin())
            })
            .collect();
        Mat::from_fn(self.data.ncols(), self.n_blocks, |state, b| {
            let mut acc = c64::new(0.0, 0.0);
            for (t, w) in twiddle.iter().enumerate() {
                acc += *w * self.sample(b, t, state);
            }
            acc
        })
    }
}

fn time_mean(data: MatRef<'_, f64>) -> Vec<f64> {
    let nt = data.nrows() as f64;
    (0..data.ncols())
        .map(|s| (0..data.nrows()).map(|t| data[(t, s)]).sum::<f64>() / nt)
        .collect()
}

/// Bins other than zero and Nyquist carry the energy of their negative twin.
fn is_interior(k: usize, n_dft: usize) -> bool {
    k > 0 && !(n_dft % 2 == 0 && k == n_dft / 2)
}

fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|k| {
            0.54 - 0.46 * (2.0 * std::f64::consts::PI * k as f64 / (n - 1) as f64).cos()
        })
        .collect()
}
