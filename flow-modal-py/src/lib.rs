use std::path::PathBuf;

use numpy::ndarray::{Array1, Array2, Array3, ArrayView2};
use numpy::{
    Complex64, IntoPyArray, PyArray1, PyArray2, PyArray3, PyArray4, PyReadonlyArray2,
    PyReadonlyArray3,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use ::flow_modal as fm;

// ============================================================================
// Helper conversions
// ============================================================================

fn mat_to_faer(arr: ArrayView2<'_, f64>) -> faer::Mat<f64> {
    let (nrows, ncols) = arr.dim();
    faer::Mat::from_fn(nrows, ncols, |i, j| arr[[i, j]])
}

fn faer_to_array2(m: &faer::Mat<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

fn to_py_complex(z: fm::c64) -> Complex64 {
    Complex64::new(z.re, z.im)
}

fn cmat_to_array2(m: &faer::Mat<fm::c64>) -> Array2<Complex64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| to_py_complex(m[(i, j)]))
}

fn cvec_to_array1(v: &[fm::c64]) -> Array1<Complex64> {
    v.iter().copied().map(to_py_complex).collect()
}

fn modal_err_to_py(e: fm::ModalError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn pipeline_err_to_py(e: fm::PipelineError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_weight(weight: Option<Vec<f64>>) -> fm::StateWeight {
    match weight {
        Some(w) => fm::StateWeight::Diagonal(w),
        None => fm::StateWeight::Identity,
    }
}

fn parse_method(method: &str) -> PyResult<fm::DmdMethod> {
    match method {
        "exact" => Ok(fm::DmdMethod::Exact),
        "fb" | "forward_backward" => Ok(fm::DmdMethod::ForwardBackward),
        other => Err(PyValueError::new_err(format!(
            "unknown method '{other}'. Use 'exact' or 'fb'"
        ))),
    }
}

fn parse_sort(sort: &str) -> PyResult<fm::EigenSort> {
    match sort {
        "log" => Ok(fm::EigenSort::Log),
        "real" => Ok(fm::EigenSort::Real),
        other => Err(PyValueError::new_err(format!(
            "unknown sort '{other}'. Use 'log' or 'real'"
        ))),
    }
}

fn parse_strictness(strictness: &str) -> PyResult<fm::Strictness> {
    match strictness {
        "silent" => Ok(fm::Strictness::Silent),
        "warn" => Ok(fm::Strictness::Warn),
        "strict" => Ok(fm::Strictness::Strict),
        other => Err(PyValueError::new_err(format!(
            "unknown strictness '{other}'. Use 'silent', 'warn' or 'strict'"
        ))),
    }
}

fn collect_fields(fields: Vec<PyReadonlyArray3<'_, f64>>) -> PyResult<fm::FlowSnapshots> {
    let named: Vec<(String, Array3<f64>)> = fields
        .iter()
        .enumerate()
        .map(|(q, f)| (format!("q{q}"), f.as_array().to_owned()))
        .collect();
    fm::FlowSnapshots::new(named).map_err(modal_err_to_py)
}

// ============================================================================
// Reynolds decomposition
// ============================================================================

/// Split a field (nx, ny, nt) into its time mean (nx, ny) and fluctuations.
#[pyfunction]
fn reynolds_decompose<'py>(
    py: Python<'py>,
    field: PyReadonlyArray3<'py, f64>,
) -> PyResult<(Bound<'py, PyArray2<f64>>, Bound<'py, PyArray3<f64>>)> {
    let parts = fm::reynolds_decompose(field.as_array()).map_err(modal_err_to_py)?;
    Ok((parts.mean.into_pyarray(py), parts.fluctuations.into_pyarray(py)))
}

// ============================================================================
// DMD class
// ============================================================================

/// Dynamic Mode Decomposition result.
///
/// Compute DMD by calling `DMD(X, ...)` where X is a 2D numpy array
/// with shape (n_state, n_time_steps), or with `DMD.from_fields([u, v, p], ...)`
/// on (nx, ny, nt) fields, which removes the time mean first.
#[pyclass]
#[derive(Clone)]
struct DMD {
    result: fm::DmdResult,
    x_original: faer::Mat<f64>,
    weight: fm::StateWeight,
    layout: Option<fm::FieldLayout>,
}

#[pymethods]
impl DMD {
    /// Create a DMD decomposition.
    ///
    /// Parameters
    /// ----------
    /// X : numpy.ndarray
    ///     Data matrix (n_state x n_time).
    /// rank : int
    ///     Requested truncation rank, clamped to what the data supports.
    /// dt : float
    ///     Time step between snapshots.
    /// tol : float
    ///     Relative amplitude threshold for discarding modes.
    /// method : str
    ///     "exact" (default) or "fb" (forward-backward).
    /// sort : str
    ///     Eigenvalue ordering, "log" (default) or "real".
    /// weight : list of float, optional
    ///     Diagonal inner-product weight, one entry per state.
    /// strictness : str
    ///     "silent", "warn" (default) or "strict".
    #[new]
    #[pyo3(signature = (x, rank=10, dt=1.0, tol=1e-6, method="exact", sort="log", weight=None, strictness="warn"))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        x: PyReadonlyArray2<f64>,
        rank: usize,
        dt: f64,
        tol: f64,
        method: &str,
        sort: &str,
        weight: Option<Vec<f64>>,
        strictness: &str,
    ) -> PyResult<Self> {
        let mat = mat_to_faer(x.as_array());
        let config = fm::DmdConfig {
            rank,
            dt,
            tol,
            method: parse_method(method)?,
            sort: parse_sort(sort)?,
            weight: parse_weight(weight),
            strictness: parse_strictness(strictness)?,
            ..Default::default()
        };
        let result = fm::dmd(&mat, &config).map_err(modal_err_to_py)?;
        Ok(DMD {
            result,
            x_original: mat,
            weight: config.weight,
            layout: None,
        })
    }

    /// DMD of the fluctuations of stacked (nx, ny, nt) fields.
    #[staticmethod]
    #[pyo3(signature = (fields, rank=10, dt=1.0, tol=1e-6, method="exact", weight=None))]
    fn from_fields(
        fields: Vec<PyReadonlyArray3<f64>>,
        rank: usize,
        dt: f64,
        tol: f64,
        method: &str,
        weight: Option<Vec<f64>>,
    ) -> PyResult<Self> {
        let snaps = collect_fields(fields)?;
        let (_, flucs) = snaps.decompose().map_err(modal_err_to_py)?;
        let mat = flucs.to_matrix();
        let config = fm::DmdConfig {
            rank,
            dt,
            tol,
            method: parse_method(method)?,
            weight: parse_weight(weight),
            ..Default::default()
        };
        let result = fm::dmd(&mat, &config).map_err(modal_err_to_py)?;
        Ok(DMD {
            result,
            x_original: mat,
            weight: config.weight,
            layout: Some(snaps.layout()),
        })
    }

    /// Rank of the reduced operator after clamping.
    #[getter]
    fn rank(&self) -> usize {
        self.result.rank
    }

    /// Rank asked for.
    #[getter]
    fn rank_requested(&self) -> usize {
        self.result.rank_requested
    }

    /// Data dimensions (n_state, n_time).
    #[getter]
    fn data_dim(&self) -> (usize, usize) {
        self.result.data_dim
    }

    /// Time step.
    #[getter]
    fn dt(&self) -> f64 {
        self.result.dt
    }

    /// Continuous-time eigenvalues ln(ρ)/dt.
    #[getter]
    fn eigenvalues<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<Complex64>> {
        cvec_to_array1(&self.result.eigenvalues).into_pyarray(py)
    }

    /// Discrete-time eigenvalues ρ.
    #[getter]
    fn discrete_eigenvalues<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<Complex64>> {
        cvec_to_array1(&self.result.discrete_eigenvalues).into_pyarray(py)
    }

    /// Exact DMD modes (n_state x n_modes).
    #[getter]
    fn modes<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<Complex64>> {
        cmat_to_array2(&self.result.modes).into_pyarray(py)
    }

    /// Adjoint modes (n_state x n_modes).
    #[getter]
    fn adjoint_modes<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<Complex64>> {
        cmat_to_array2(&self.result.adjoint_modes).into_pyarray(py)
    }

    /// Mode amplitudes.
    #[getter]
    fn amplitudes<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<Complex64>> {
        cvec_to_array1(&self.result.amplitudes).into_pyarray(py)
    }

    /// Singular values from the truncated SVD.
    #[getter]
    fn singular_values<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        Array1::from(self.result.svd.s.clone()).into_pyarray(py)
    }

    /// Positions of the kept modes in the sorted eigen-system.
    #[getter]
    fn kept(&self) -> Vec<usize> {
        self.result.kept.clone()
    }

    /// Modes reshaped to (n_q, nx, ny, n_modes); only for `from_fields`.
    fn mode_fields<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray4<Complex64>>> {
        let layout = self
            .layout
            .ok_or_else(|| PyValueError::new_err("DMD was not built from fields"))?;
        let fields = layout
            .unflatten(&self.result.modes)
            .map_err(modal_err_to_py)?;
        Ok(fields.mapv(to_py_complex).into_pyarray(py))
    }

    /// Reconstruct data from DMD modes.
    ///
    /// Parameters
    /// ----------
    /// n_steps : int
    ///     Number of time steps to reconstruct.
    /// modes_subset : list of int, optional
    ///     Indices of modes to use. None for all.
    #[pyo3(signature = (n_steps, modes_subset=None))]
    fn reconstruct<'py>(
        &self,
        py: Python<'py>,
        n_steps: usize,
        modes_subset: Option<Vec<usize>>,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let subset = modes_subset.as_deref();
        let recon = fm::dmd_reconstruct(&self.result, n_steps, subset).map_err(modal_err_to_py)?;
        Ok(faer_to_array2(&recon).into_pyarray(py))
    }

    /// Analyze the eigenvalue spectrum.
    ///
    /// Returns a list of dicts with mode information.
    fn spectrum(&self, py: Python<'_>) -> PyResult<PyObject> {
        let list = PyList::empty(py);
        for m in fm::mode_spectrum(&self.result) {
            let dict = PyDict::new(py);
            dict.set_item("index", m.index)?;
            dict.set_item("eigenvalue", to_py_complex(m.eigenvalue))?;
            dict.set_item("magnitude", m.magnitude)?;
            dict.set_item("growth_rate", m.growth_rate)?;
            dict.set_item("angular_frequency", m.angular_frequency)?;
            dict.set_item("frequency", m.frequency)?;
            dict.set_item("period", m.period)?;
            dict.set_item("half_life", m.half_life)?;
            dict.set_item("amplitude", m.amplitude)?;
            dict.set_item("stability", m.stability.to_string())?;
            list.append(dict)?;
        }
        Ok(list.into_any().unbind())
    }

    /// Analyze system stability: (is_stable, is_unstable, is_marginal, spectral_radius).
    fn stability(&self) -> PyResult<(bool, bool, bool, f64)> {
        let stab = fm::dmd_stability(&self.result, 1e-6);
        Ok((
            stab.is_stable,
            stab.is_unstable,
            stab.is_marginal,
            stab.spectral_radius,
        ))
    }

    /// Reconstruction error metrics: (rmse, mae, relative_error).
    fn error(&self) -> PyResult<(f64, f64, f64)> {
        let err = fm::dmd_error(&self.result, &self.x_original).map_err(modal_err_to_py)?;
        Ok((err.rmse, err.mae, err.relative_error))
    }

    /// Get indices of dominant modes.
    ///
    /// Parameters
    /// ----------
    /// n : int
    ///     Number of modes to return.
    /// criterion : str
    ///     "amplitude" (default), "energy", or "stability".
    #[pyo3(signature = (n, criterion="amplitude"))]
    fn dominant_modes(&self, n: usize, criterion: &str) -> PyResult<Vec<usize>> {
        let crit = match criterion {
            "amplitude" => fm::DominantCriterion::Amplitude,
            "energy" => fm::DominantCriterion::Energy,
            "stability" => fm::DominantCriterion::Stability,
            _ => {
                return Err(PyValueError::new_err(
                    "criterion must be 'amplitude', 'energy', or 'stability'",
                ))
            }
        };
        Ok(fm::dmd_dominant_modes(&self.result, n, crit))
    }

    /// Resolvent singular values over an angular-frequency grid.
    ///
    /// Returns (omega, sigma) with sigma shaped (n_points, n_modes); rows
    /// that could not be evaluated are NaN.
    #[pyo3(signature = (omega_min=1.0, omega_max=1000.0, n_points=2000))]
    fn optimal_gain<'py>(
        &self,
        py: Python<'py>,
        omega_min: f64,
        omega_max: f64,
        n_points: usize,
    ) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray2<f64>>)> {
        let analyzer = fm::ResolventAnalyzer::from_dmd(&self.result, &self.weight)
            .map_err(modal_err_to_py)?;
        let sweep = fm::FrequencySweep {
            omega_min,
            omega_max,
            n_points,
        };
        let gain = analyzer.sweep(&sweep).map_err(modal_err_to_py)?;
        let r = analyzer.n_modes();
        let sigma = Array2::from_shape_fn((gain.len(), r), |(k, j)| {
            gain.sigma[k]
                .as_ref()
                .and_then(|s| s.get(j).copied())
                .unwrap_or(f64::NAN)
        });
        Ok((Array1::from(gain.omega).into_pyarray(py), sigma.into_pyarray(py)))
    }

    /// Optimal forcing and response at ω: (sigma, forcing, response).
    fn forcing_response<'py>(
        &self,
        py: Python<'py>,
        omega: f64,
    ) -> PyResult<(
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray2<Complex64>>,
        Bound<'py, PyArray2<Complex64>>,
    )> {
        let analyzer = fm::ResolventAnalyzer::from_dmd(&self.result, &self.weight)
            .map_err(modal_err_to_py)?;
        let fr = analyzer.forcing_response(omega).map_err(modal_err_to_py)?;
        Ok((
            Array1::from(fr.singular_values.clone()).into_pyarray(py),
            cmat_to_array2(&fr.forcing).into_pyarray(py),
            cmat_to_array2(&fr.response).into_pyarray(py),
        ))
    }

    fn __repr__(&self) -> String {
        format!(
            "DMD(method={:?}, rank={}, n_modes={}, data_dim=({}, {}))",
            self.result.method,
            self.result.rank,
            self.result.n_modes(),
            self.result.data_dim.0,
            self.result.data_dim.1
        )
    }
}

// ============================================================================
// SPOD
// ============================================================================

/// SPOD of flattened fluctuations X shaped (n_time, n_state).
///
/// Returns a dict with "L" (n_freq, n_blocks), "f" (Hz), "omega" (2πf)
/// and, when `save_modes` is set, "P" (n_freq, n_state, n_modes).
#[pyfunction]
#[pyo3(signature = (x, dt, n_dft=None, n_overlap=None, window="hamming", method="fast", weight=None, save_modes=false, output_dir=None))]
#[allow(clippy::too_many_arguments)]
fn spod(
    py: Python<'_>,
    x: PyReadonlyArray2<f64>,
    dt: f64,
    n_dft: Option<usize>,
    n_overlap: Option<usize>,
    window: &str,
    method: &str,
    weight: Option<Vec<f64>>,
    save_modes: bool,
    output_dir: Option<PathBuf>,
) -> PyResult<PyObject> {
    let data = x.as_array();
    let snapshots = mat_to_faer(data.t());
    let config = fm::SpodConfig {
        dt,
        weight: parse_weight(weight),
        n_overlap,
        window: match window {
            "hamming" => fm::SpodWindow::Hamming,
            "rectangular" => fm::SpodWindow::Rectangular,
            other => {
                return Err(PyValueError::new_err(format!(
                    "unknown window '{other}'. Use 'hamming' or 'rectangular'"
                )))
            }
        },
        method: match method {
            "fast" => fm::SpodMethod::Fast,
            "lowmem" | "low_memory" => fm::SpodMethod::LowMemory,
            other => {
                return Err(PyValueError::new_err(format!(
                    "unknown method '{other}'. Use 'fast' or 'lowmem'"
                )))
            }
        },
        n_dft: n_dft.map_or(fm::DftLength::QuarterRecord, fm::DftLength::Fixed),
        save_modes,
        output_dir,
    };
    let out = fm::spod_matrix(&snapshots, &config, &fm::WelchSpod).map_err(modal_err_to_py)?;

    let dict = PyDict::new(py);
    dict.set_item("L", faer_to_array2(&out.energy).into_pyarray(py))?;
    dict.set_item("f", Array1::from(out.freq.clone()).into_pyarray(py))?;
    dict.set_item("omega", Array1::from(out.omega.clone()).into_pyarray(py))?;
    if let Some(modes) = &out.modes {
        let n_state = snapshots.nrows();
        let n_mode = modes.first().map_or(0, |m| m.ncols());
        let p = Array3::from_shape_fn((modes.len(), n_state, n_mode), |(k, i, m)| {
            to_py_complex(modes[k][(i, m)])
        });
        dict.set_item("P", p.into_pyarray(py))?;
    }
    Ok(dict.into_any().unbind())
}

/// Full DMD/resolvent run on (nx, ny, nt) fields from a JSON configuration.
///
/// Returns a dict with the peak frequency, gain and mean fields.
#[pyfunction]
#[pyo3(signature = (fields, config_json="{}"))]
fn run_dmd_resolvent(
    py: Python<'_>,
    fields: Vec<PyReadonlyArray3<f64>>,
    config_json: &str,
) -> PyResult<PyObject> {
    let snaps = collect_fields(fields)?;
    let config = fm::AnalysisConfig::from_json(config_json).map_err(modal_err_to_py)?;
    let report = fm::run_dmd_resolvent(&snaps, &config).map_err(pipeline_err_to_py)?;

    let dict = PyDict::new(py);
    dict.set_item("complete", report.is_complete())?;
    dict.set_item("eigenvalues", cvec_to_array1(&report.dmd.eigenvalues).into_pyarray(py))?;
    let gain: Vec<f64> = report
        .gain
        .optimal_gain()
        .into_iter()
        .map(|g| g.unwrap_or(f64::NAN))
        .collect();
    dict.set_item("omega", Array1::from(report.gain.omega.clone()).into_pyarray(py))?;
    dict.set_item("gain", Array1::from(gain).into_pyarray(py))?;
    let means = PyList::empty(py);
    for m in &report.means {
        means.append(m.clone().into_pyarray(py))?;
    }
    dict.set_item("means", means)?;
    if let Some(opt) = &report.optimal {
        let (forcing, response) = opt.fields(&report.layout).map_err(modal_err_to_py)?;
        dict.set_item("peak_omega", opt.omega)?;
        dict.set_item("forcing", forcing.mapv(to_py_complex).into_pyarray(py))?;
        dict.set_item("response", response.mapv(to_py_complex).into_pyarray(py))?;
    }
    Ok(dict.into_any().unbind())
}

#[pymodule]
fn flow_modal_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<DMD>()?;
    m.add_function(wrap_pyfunction!(reynolds_decompose, m)?)?;
    m.add_function(wrap_pyfunction!(spod, m)?)?;
    m.add_function(wrap_pyfunction!(run_dmd_resolvent, m)?)?;
    Ok(())
}
