//! The per-cell operator kernel.
//!
//! One invocation of [`apply_cell`] carries a single cell through the whole
//! weak-form pipeline: gather local values from the source vector, evaluate
//! reference-space gradients at all quadrature points, apply the pointwise
//! physics, integrate against test-function gradients and scatter-add the
//! result. Gradient evaluation and integration are sum-factorized: a
//! sequence of 1-D contractions of the [`ShapeTable`] matrices along each
//! spatial axis, so no per-cell matrix of size `dofs x dofs` is ever formed.

use crate::basis::ShapeTable;
use crate::topology::ColorBatch;
use crate::Real;
use cellwise_paradis::BlockAccess;
use nalgebra::SVector;
use num::Zero;

/// Number of entries of a `dim`-dimensional tensor with extent `points_1d`
/// along each axis: the local DOF count and quadrature point count of a
/// tensor-product cell.
pub const fn tensor_size(points_1d: usize, dim: usize) -> usize {
    points_1d.pow(dim as u32)
}

/// The pointwise physics applied to the evaluated gradient at one
/// quadrature point. This is the only operator-specific step of the cell
/// pipeline and the substitution point for other elliptic operators.
pub trait QuadraturePointOperation<T, const D: usize>: Sync {
    /// Map the physical-space gradient at global quadrature index
    /// `q_global` (cell-major within the current color) to the quantity
    /// that is integrated against the test-function gradients.
    fn apply(&self, q_global: usize, gradient: SVector<T, D>) -> SVector<T, D>;
}

/// Scales the gradient by a tabulated scalar coefficient: the
/// quadrature-point operation of the variable-coefficient Laplacian.
pub struct CoefficientGradient<'a, T> {
    coefficient: &'a [T],
}

impl<'a, T> CoefficientGradient<'a, T> {
    /// `coefficient` is one color's table, indexed like `q_global`.
    pub fn new(coefficient: &'a [T]) -> Self {
        Self { coefficient }
    }
}

impl<'a, T: Real, const D: usize> QuadraturePointOperation<T, D> for CoefficientGradient<'a, T> {
    fn apply(&self, q_global: usize, gradient: SVector<T, D>) -> SVector<T, D> {
        gradient * self.coefficient[q_global]
    }
}

/// Per-worker scratch for the cell pipeline, reused across cells.
#[derive(Debug)]
pub(crate) struct KernelScratch<T> {
    local_src: Vec<T>,
    // Reference gradients at quadrature points, direction-major:
    // gradients[d * n_q + q]
    gradients: Vec<T>,
    tmp_a: Vec<T>,
    tmp_b: Vec<T>,
    local_dst: Vec<T>,
}

impl<T> Default for KernelScratch<T> {
    fn default() -> Self {
        Self {
            local_src: Vec::new(),
            gradients: Vec::new(),
            tmp_a: Vec::new(),
            tmp_b: Vec::new(),
            local_dst: Vec::new(),
        }
    }
}

impl<T: Real> KernelScratch<T> {
    fn resize(&mut self, n_local: usize, n_q: usize, dim: usize) {
        self.local_src.resize(n_local, T::zero());
        self.gradients.resize(dim * n_q, T::zero());
        self.tmp_a.resize(n_q, T::zero());
        self.tmp_b.resize(n_q, T::zero());
        self.local_dst.resize(n_local, T::zero());
    }
}

/// Contract `matrix` (a `n x n` matrix stored row-major `[q][i]`) with
/// `input` along the given tensor axis, writing to `output`.
fn contract_axis<T: Real>(
    n: usize,
    dim: usize,
    axis: usize,
    matrix: &[T],
    transpose: bool,
    input: &[T],
    output: &mut [T],
) {
    let stride = tensor_size(n, axis);
    let outer = tensor_size(n, dim) / (n * stride);
    for o in 0..outer {
        for s in 0..stride {
            let base = o * n * stride + s;
            for q in 0..n {
                let mut acc = T::zero();
                for i in 0..n {
                    let entry = if transpose {
                        matrix[i * n + q]
                    } else {
                        matrix[q * n + i]
                    };
                    acc += entry * input[base + i * stride];
                }
                output[base + q * stride] = acc;
            }
        }
    }
}

/// Apply the 1-D basis along every axis, using the derivative matrix on
/// `deriv_axis` and the value matrix elsewhere. Returns the buffer holding
/// the result.
#[allow(clippy::too_many_arguments)]
fn apply_tensor_basis<'a, T: Real>(
    shape: &ShapeTable<T>,
    dim: usize,
    deriv_axis: usize,
    transpose: bool,
    input: &[T],
    tmp_a: &'a mut [T],
    tmp_b: &'a mut [T],
) -> &'a [T] {
    let n = shape.points_1d();
    let matrix_for = |axis: usize| {
        if axis == deriv_axis {
            shape.gradients()
        } else {
            shape.values()
        }
    };

    contract_axis(n, dim, 0, matrix_for(0), transpose, input, tmp_a);
    let mut result_in_a = true;
    for axis in 1..dim {
        if result_in_a {
            contract_axis(n, dim, axis, matrix_for(axis), transpose, tmp_a, tmp_b);
        } else {
            contract_axis(n, dim, axis, matrix_for(axis), transpose, tmp_b, tmp_a);
        }
        result_in_a = !result_in_a;
    }
    if result_in_a {
        tmp_a
    } else {
        tmp_b
    }
}

/// Run one cell of a color batch through the full pipeline, accumulating
/// its contribution into the destination entries owned by `block`.
///
/// On hardware this body is one thread block's lifetime; the gather,
/// evaluate, quadrature-operation and integrate phases below are exactly
/// the stretches a block-wide barrier would separate.
pub(crate) fn apply_cell<T, Op, const D: usize>(
    shape: &ShapeTable<T>,
    batch: &ColorBatch<T, D>,
    op: &Op,
    src: &[T],
    block: &mut BlockAccess<'_, T>,
    scratch: &mut KernelScratch<T>,
) where
    T: Real,
    Op: QuadraturePointOperation<T, D>,
{
    let n = shape.points_1d();
    let n_q = tensor_size(n, D);
    let n_local = block.len();
    debug_assert_eq!(n_local, tensor_size(n, D));
    scratch.resize(n_local, n_q, D);
    let KernelScratch {
        local_src,
        gradients,
        tmp_a,
        tmp_b,
        local_dst,
    } = scratch;

    let cell = block.ordinal();
    let transforms = &batch.gradient_transforms()[cell * n_q..(cell + 1) * n_q];
    let jxw = &batch.jxw()[cell * n_q..(cell + 1) * n_q];

    // Gather local values of the source vector
    for (u, &dof) in local_src.iter_mut().zip(block.global_indices()) {
        *u = src[dof];
    }

    // Evaluate reference gradients at all quadrature points
    for d in 0..D {
        let result = apply_tensor_basis(shape, D, d, false, local_src, tmp_a, tmp_b);
        gradients[d * n_q..(d + 1) * n_q].copy_from_slice(result);
    }

    // Pointwise operation: push the gradient to physical space, apply the
    // physics, pull back and weight for integration
    for q in 0..n_q {
        let mut reference = SVector::<T, D>::zeros();
        for d in 0..D {
            reference[d] = gradients[d * n_q + q];
        }
        let physical = transforms[q] * reference;
        let integrand = op.apply(cell * n_q + q, physical);
        let weighted = transforms[q].transpose() * integrand * jxw[q];
        for d in 0..D {
            gradients[d * n_q + q] = weighted[d];
        }
    }

    // Integrate against test-function gradients: the transposed
    // contractions, accumulated over directions
    local_dst.fill(T::zero());
    for d in 0..D {
        let input = &gradients[d * n_q..(d + 1) * n_q];
        let result = apply_tensor_basis(shape, D, d, true, input, tmp_a, tmp_b);
        for (dst, &value) in local_dst.iter_mut().zip(result) {
            *dst += value;
        }
    }

    // Scatter-add into the destination entries owned by this block; safe
    // without atomics because no other cell of the color shares them
    for (local, &value) in local_dst.iter().enumerate() {
        *block.get_mut(local) += value;
    }
}
