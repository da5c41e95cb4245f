//! The matrix-free operator façade.
//!
//! [`LaplaceOperator`] ties the pieces together: `reinit` ingests a cell
//! topology and tabulates the coefficient, the `vmult` family applies the
//! operator through the color-ordered cell loop, and a caller-supplied
//! diagonal can be cached for use as a preconditioner. The operator matrix
//! is never formed; entry access is deliberately unsupported.
//!
//! State machine: an operator starts uninitialized, `reinit` makes it
//! ready, `set_diagonal` additionally caches a diagonal, and `clear`
//! returns to the uninitialized state from anywhere, releasing all device
//! memory. `reinit` discards a previously cached diagonal since it belongs
//! to the superseded topology.

use crate::basis::ShapeTable;
use crate::cell_loop::cell_loop;
use crate::coefficient::{evaluate_coefficient, CoefficientFunction};
use crate::device::Device;
use crate::error::Error;
use crate::kernel::{tensor_size, CoefficientGradient, KernelScratch};
use crate::topology::CellTopology;
use crate::vector::DeviceVector;
use crate::Real;
use log::debug;
use num::Zero;
use std::cell::RefCell;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// Matrix-free variable-coefficient Laplacian of polynomial degree
/// `DEGREE` in `D` space dimensions.
///
/// The operator is symmetric, so the transposed apply methods are aliases
/// of the forward ones. On constrained degrees of freedom it acts as the
/// identity.
pub struct LaplaceOperator<T: Real, C, const D: usize, const DEGREE: usize> {
    device: Arc<Device>,
    coefficient_fn: C,
    state: Option<OperatorState<T, D>>,
    scratch: ThreadLocal<RefCell<KernelScratch<T>>>,
}

struct OperatorState<T: Real, const D: usize> {
    topology: Arc<CellTopology<T, D>>,
    shape: ShapeTable<T>,
    coefficient: Vec<DeviceVector<T>>,
    diagonal: Option<DeviceVector<T>>,
}

impl<T, C, const D: usize, const DEGREE: usize> LaplaceOperator<T, C, D, DEGREE>
where
    T: Real,
    C: CoefficientFunction<T, D>,
{
    /// An uninitialized operator bound to the given device and coefficient.
    pub fn new(device: &Arc<Device>, coefficient_fn: C) -> Self {
        Self {
            device: Arc::clone(device),
            coefficient_fn,
            state: None,
            scratch: ThreadLocal::new(),
        }
    }

    /// Ingest a topology and rebuild all derived data.
    ///
    /// The topology's per-cell sizes must match the compile-time element:
    /// `(DEGREE + 1)^D` local DOFs and quadrature points. Any cached
    /// diagonal is discarded; the caller must re-derive and re-set it.
    pub fn reinit(&mut self, topology: Arc<CellTopology<T, D>>) -> Result<(), Error> {
        let expected = tensor_size(DEGREE + 1, D);
        for found in [topology.dofs_per_cell(), topology.q_points_per_cell()] {
            if found != expected {
                return Err(Error::DimensionMismatch { expected, found });
            }
        }
        let shape = ShapeTable::lagrange(DEGREE);
        let coefficient = evaluate_coefficient(&self.device, &topology, &self.coefficient_fn);
        debug!(
            "reinitialized operator: {} DOFs, {} cells in {} colors",
            topology.n_dofs(),
            topology.n_cells(),
            topology.num_colors()
        );
        self.state = Some(OperatorState {
            topology,
            shape,
            coefficient,
            diagonal: None,
        });
        Ok(())
    }

    /// Return to the uninitialized state, releasing all device memory.
    pub fn clear(&mut self) {
        self.state = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Number of rows; zero while uninitialized.
    pub fn m(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.topology.n_dofs())
    }

    /// Number of columns; the operator is square.
    pub fn n(&self) -> usize {
        self.m()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// `dst = A * src`.
    pub fn vmult(&self, dst: &mut DeviceVector<T>, src: &DeviceVector<T>) -> Result<(), Error> {
        self.validate(dst, src)?;
        dst.fill(T::zero())?;
        self.vmult_add(dst, src)
    }

    /// `dst = A^T * src`; identical to [`vmult`](Self::vmult) since the
    /// operator is symmetric.
    pub fn tvmult(&self, dst: &mut DeviceVector<T>, src: &DeviceVector<T>) -> Result<(), Error> {
        self.vmult(dst, src)
    }

    /// `dst += A * src`.
    pub fn vmult_add(&self, dst: &mut DeviceVector<T>, src: &DeviceVector<T>) -> Result<(), Error> {
        let state = self.validate(dst, src)?;
        let quad_ops: Vec<_> = state
            .coefficient
            .iter()
            .map(|table| CoefficientGradient::new(table.as_slice()))
            .collect();
        cell_loop(
            &self.device,
            &state.topology,
            &state.shape,
            &quad_ops,
            dst,
            src,
            &self.scratch,
        );
        state
            .topology
            .copy_constrained_values(&self.device, dst, src)
    }

    /// `dst += A^T * src`; identical to [`vmult_add`](Self::vmult_add).
    pub fn tvmult_add(
        &self,
        dst: &mut DeviceVector<T>,
        src: &DeviceVector<T>,
    ) -> Result<(), Error> {
        self.vmult_add(dst, src)
    }

    /// Cache the operator diagonal supplied by the caller.
    ///
    /// Entries at constrained indices are overwritten with one so that the
    /// cached diagonal matches the identity behavior of the apply methods
    /// on constrained degrees of freedom.
    pub fn set_diagonal(&mut self, diagonal: &[T]) -> Result<(), Error> {
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        if diagonal.len() != state.topology.n_dofs() {
            return Err(Error::DimensionMismatch {
                expected: state.topology.n_dofs(),
                found: diagonal.len(),
            });
        }
        let mut values = DeviceVector::from_host(&self.device, diagonal);
        state
            .topology
            .set_constrained_values(&self.device, &mut values, T::one())?;
        state.diagonal = Some(values);
        Ok(())
    }

    /// The cached diagonal; an error unless [`set_diagonal`](Self::set_diagonal)
    /// has been called since the last `reinit`.
    pub fn diagonal(&self) -> Result<&DeviceVector<T>, Error> {
        self.state
            .as_ref()
            .and_then(|s| s.diagonal.as_ref())
            .ok_or(Error::NotInitialized)
    }

    /// Random entry access is never supported by a matrix-free operator.
    pub fn el(&self, _row: usize, _col: usize) -> Result<T, Error> {
        Err(Error::NotImplemented)
    }

    /// Total device bytes held: topology buffers, coefficient table and
    /// the cached diagonal.
    pub fn memory_consumption(&self) -> usize {
        self.state.as_ref().map_or(0, |s| {
            s.topology.memory_consumption()
                + s.coefficient
                    .iter()
                    .map(|t| t.memory_consumption())
                    .sum::<usize>()
                + s.diagonal.as_ref().map_or(0, |d| d.memory_consumption())
        })
    }

    fn validate(
        &self,
        dst: &DeviceVector<T>,
        src: &DeviceVector<T>,
    ) -> Result<&OperatorState<T, D>, Error> {
        let state = self.state.as_ref().ok_or(Error::NotInitialized)?;
        let n_dofs = state.topology.n_dofs();
        for len in [dst.len(), src.len()] {
            if len == 0 {
                return Err(Error::Uninitialized);
            }
            if len != n_dofs {
                return Err(Error::DimensionMismatch {
                    expected: n_dofs,
                    found: len,
                });
            }
        }
        Ok(state)
    }
}
