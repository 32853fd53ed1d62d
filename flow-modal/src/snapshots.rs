//! Snapshot fields, Reynolds decomposition and state flattening.
//!
//! A field is an `[nx, ny, nt]` array of one physical quantity. Several
//! quantities are stacked into the flattened snapshot matrix
//! `[n_q·nx·ny, nt]` with row index `q·nx·ny + i·ny + j`.

use faer::{c64, Mat};
use ndarray::{Array2, Array3, Array4, ArrayView3, Axis};

use crate::types::ModalError;

/// Mean and fluctuating parts of a snapshot field.
#[derive(Debug, Clone)]
pub struct ReynoldsDecomposition {
    /// Time mean `[nx, ny]`.
    pub mean: Array2<f64>,
    /// `field − mean`, `[nx, ny, nt]`.
    pub fluctuations: Array3<f64>,
}

/// Split a field into its time mean and fluctuations.
///
/// Non-finite values propagate unchecked.
pub fn reynolds_decompose(field: ArrayView3<'_, f64>) -> Result<ReynoldsDecomposition, ModalError> {
    let mean = field
        .mean_axis(Axis(2))
        .ok_or_else(|| ModalError::InvalidInput("field has no time samples".into()))?;
    let fluctuations = &field - &mean.view().insert_axis(Axis(2));
    Ok(ReynoldsDecomposition { mean, fluctuations })
}

/// Spatial layout shared by all quantities of a snapshot set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub n_quantities: usize,
    pub nx: usize,
    pub ny: usize,
}

impl FieldLayout {
    /// Length of the flattened state vector.
    pub fn n_state(&self) -> usize {
        self.n_quantities * self.nx * self.ny
    }

    /// Row of quantity `q` at grid point `(i, j)`.
    pub fn index(&self, q: usize, i: usize, j: usize) -> usize {
        (q * self.nx + i) * self.ny + j
    }

    /// Reshape state-space columns into `[n_q, nx, ny, n_cols]` fields.
    pub fn unflatten(&self, modes: &Mat<c64>) -> Result<Array4<c64>, ModalError> {
        if modes.nrows() != self.n_state() {
            return Err(ModalError::shape(
                "mode matrix rows",
                self.n_state(),
                modes.nrows(),
            ));
        }
        Ok(Array4::from_shape_fn(
            (self.n_quantities, self.nx, self.ny, modes.ncols()),
            |(q, i, j, k)| modes[(self.index(q, i, j), k)],
        ))
    }
}

/// Named quantities sampled on a common `[nx, ny, nt]` grid.
#[derive(Debug, Clone)]
pub struct FlowSnapshots {
    names: Vec<String>,
    fields: Vec<Array3<f64>>,
}

impl FlowSnapshots {
    /// Collect quantities, rejecting empty input and disagreeing shapes.
    pub fn new<S: Into<String>>(quantities: Vec<(S, Array3<f64>)>) -> Result<Self, ModalError> {
        let Some((_, first)) = quantities.first() else {
            return Err(ModalError::InvalidInput(
                "at least one quantity is required".into(),
            ));
        };
        let shape = first.dim();
        let mut names = Vec::with_capacity(quantities.len());
        let mut fields = Vec::with_capacity(quantities.len());
        for (name, field) in quantities {
            let name = name.into();
            if field.dim() != shape {
                return Err(ModalError::shape(
                    format!("field '{name}'"),
                    format!("{shape:?}"),
                    format!("{:?}", field.dim()),
                ));
            }
            names.push(name);
            fields.push(field);
        }
        Ok(Self { names, fields })
    }

    /// `(nx, ny, nt)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.fields[0].dim()
    }

    pub fn n_quantities(&self) -> usize {
        self.fields.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn fields(&self) -> &[Array3<f64>] {
        &self.fields
    }

    pub fn layout(&self) -> FieldLayout {
        let (nx, ny, _) = self.shape();
        FieldLayout {
            n_quantities: self.n_quantities(),
            nx,
            ny,
        }
    }

    /// Reynolds-decompose every quantity.
    ///
    /// Returns the per-quantity means and a snapshot set of fluctuations.
    pub fn decompose(&self) -> Result<(Vec<Array2<f64>>, FlowSnapshots), ModalError> {
        let mut means = Vec::with_capacity(self.fields.len());
        let mut flucs = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let parts = reynolds_decompose(field.view())?;
            means.push(parts.mean);
            flucs.push(parts.fluctuations);
        }
        let fluctuations = FlowSnapshots {
            names: self.names.clone(),
            fields: flucs,
        };
        Ok((means, fluctuations))
    }

    /// Flattened snapshot matrix `[n_state, nt]`.
    pub fn to_matrix(&self) -> Mat<f64> {
        let (_, _, nt) = self.shape();
        stack(self.layout(), nt, self.fields.iter().map(|f| f.view()))
    }
}

/// Stack equally shaped `[nx, ny, nt]` fields into `[n_q·nx·ny, nt]`.
pub fn flatten_fields(fields: &[ArrayView3<'_, f64>]) -> Result<Mat<f64>, ModalError> {
    let Some(first) = fields.first() else {
        return Err(ModalError::InvalidInput("no fields to flatten".into()));
    };
    let (nx, ny, nt) = first.dim();
    for (q, field) in fields.iter().enumerate().skip(1) {
        if field.dim() != (nx, ny, nt) {
            return Err(ModalError::shape(
                format!("field {q}"),
                format!("{:?}", (nx, ny, nt)),
                format!("{:?}", field.dim()),
            ));
        }
    }
    let layout = FieldLayout {
        n_quantities: fields.len(),
        nx,
        ny,
    };
    Ok(stack(layout, nt, fields.iter().cloned()))
}

/// Inverse of [`flatten_fields`] for mode matrices: `[n_q, nx, ny, n_cols]`.
pub fn unflatten_modes(
    modes: &Mat<c64>,
    n_quantities: usize,
    nx: usize,
    ny: usize,
) -> Result<Array4<c64>, ModalError> {
    FieldLayout {
        n_quantities,
        nx,
        ny,
    }
    .unflatten(modes)
}

fn stack<'a>(
    layout: FieldLayout,
    nt: usize,
    fields: impl Iterator<Item = ArrayView3<'a, f64>>,
) -> Mat<f64> {
    let mut m = Mat::<f64>::zeros(layout.n_state(), nt);
    for (q, field) in fields.enumerate() {
        for ((i, j, t), &val) in field.indexed_iter() {
            m[(layout.index(q, i, j), t)] = val;
        }
    }
    m
}
