//! Per-cell geometric data, partitioned by color.
//!
//! A [`CellTopology`] is the opaque input a setup collaborator hands to the
//! operator on `reinit`: for every cell its local-to-global index map,
//! quadrature-point coordinates and Jacobian-derived geometric factors,
//! grouped into color classes whose cells share no degree of freedom. The
//! operator core treats all of it as read-only for the lifetime of one
//! `reinit`.

use crate::device::Device;
use crate::error::Error;
use crate::vector::DeviceVector;
use crate::Real;
use cellwise_paradis::{DisjointBlocks, ParallelSliceAccess};
use nalgebra::{Point, SMatrix};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::mem;

/// The cells of one color class together with their quadrature geometry,
/// stored flat and cell-major.
#[derive(Debug, Clone)]
pub struct ColorBatch<T: Real, const D: usize> {
    blocks: DisjointBlocks,
    quadrature_points: Vec<Point<T, D>>,
    gradient_transforms: Vec<SMatrix<T, D, D>>,
    jxw: Vec<T>,
}

impl<T: Real, const D: usize> ColorBatch<T, D> {
    /// Assemble a color batch from its per-cell data.
    ///
    /// `blocks` carries the local-to-global map of each cell in the color;
    /// the three geometry arrays hold one entry per quadrature point per
    /// cell, cell-major, `q_points_per_cell` entries per cell.
    /// `gradient_transforms` stores the inverse-transpose Jacobian at each
    /// point, `jxw` the Jacobian determinant times quadrature weight.
    pub fn try_new(
        blocks: DisjointBlocks,
        quadrature_points: Vec<Point<T, D>>,
        gradient_transforms: Vec<SMatrix<T, D, D>>,
        jxw: Vec<T>,
        q_points_per_cell: usize,
    ) -> Result<Self, Error> {
        let expected = blocks.num_blocks() * q_points_per_cell;
        for found in [
            quadrature_points.len(),
            gradient_transforms.len(),
            jxw.len(),
        ] {
            if found != expected {
                return Err(Error::DimensionMismatch { expected, found });
            }
        }
        Ok(Self {
            blocks,
            quadrature_points,
            gradient_transforms,
            jxw,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.blocks.num_blocks()
    }

    /// The original cell index of each cell in this color.
    pub fn cell_labels(&self) -> &[usize] {
        self.blocks.labels()
    }

    /// Local-to-global map of the cell at position `cell` within the color.
    pub fn cell_dofs(&self, cell: usize) -> &[usize] {
        self.blocks.block_indices(cell)
    }

    pub fn blocks(&self) -> &DisjointBlocks {
        &self.blocks
    }

    /// Quadrature point coordinates, cell-major.
    pub fn quadrature_points(&self) -> &[Point<T, D>] {
        &self.quadrature_points
    }

    /// Inverse-transpose Jacobians, cell-major per quadrature point.
    pub fn gradient_transforms(&self) -> &[SMatrix<T, D, D>] {
        &self.gradient_transforms
    }

    /// Jacobian determinant times quadrature weight, cell-major.
    pub fn jxw(&self) -> &[T] {
        &self.jxw
    }

    fn memory_consumption(&self) -> usize {
        self.blocks.num_blocks() * self.blocks.block_len() * mem::size_of::<usize>()
            + self.quadrature_points.len() * mem::size_of::<Point<T, D>>()
            + self.gradient_transforms.len() * mem::size_of::<SMatrix<T, D, D>>()
            + self.jxw.len() * mem::size_of::<T>()
    }
}

/// The complete per-`reinit` cell data: color batches, counts and the
/// constrained degrees of freedom.
#[derive(Debug, Clone)]
pub struct CellTopology<T: Real, const D: usize> {
    n_dofs: usize,
    dofs_per_cell: usize,
    q_points_per_cell: usize,
    colors: Vec<ColorBatch<T, D>>,
    constrained_dofs: Vec<usize>,
}

impl<T: Real, const D: usize> CellTopology<T, D> {
    /// Assemble a topology from validated color batches.
    ///
    /// Verifies that every batch agrees on the per-cell sizes and that all
    /// global indices, including the constrained ones, address the
    /// `n_dofs`-sized index space. The constrained index list is sorted and
    /// deduplicated.
    pub fn new(
        n_dofs: usize,
        dofs_per_cell: usize,
        q_points_per_cell: usize,
        colors: Vec<ColorBatch<T, D>>,
        mut constrained_dofs: Vec<usize>,
    ) -> Result<Self, Error> {
        for batch in &colors {
            if batch.blocks.block_len() != dofs_per_cell {
                return Err(Error::DimensionMismatch {
                    expected: dofs_per_cell,
                    found: batch.blocks.block_len(),
                });
            }
            if batch.num_cells() > 0 {
                let expected = batch.num_cells() * q_points_per_cell;
                if batch.quadrature_points.len() != expected {
                    return Err(Error::DimensionMismatch {
                        expected,
                        found: batch.quadrature_points.len(),
                    });
                }
            }
            if let Some(max_index) = batch.blocks.max_index() {
                if max_index >= n_dofs {
                    return Err(Error::DimensionMismatch {
                        expected: n_dofs,
                        found: max_index + 1,
                    });
                }
            }
        }
        constrained_dofs.sort_unstable();
        constrained_dofs.dedup();
        if let Some(&max_constrained) = constrained_dofs.last() {
            if max_constrained >= n_dofs {
                return Err(Error::DimensionMismatch {
                    expected: n_dofs,
                    found: max_constrained + 1,
                });
            }
        }
        Ok(Self {
            n_dofs,
            dofs_per_cell,
            q_points_per_cell,
            colors,
            constrained_dofs,
        })
    }

    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    pub fn n_cells(&self) -> usize {
        self.colors.iter().map(|c| c.num_cells()).sum()
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.dofs_per_cell
    }

    pub fn q_points_per_cell(&self) -> usize {
        self.q_points_per_cell
    }

    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    pub fn colors(&self) -> &[ColorBatch<T, D>] {
        &self.colors
    }

    pub fn color(&self, color: usize) -> &ColorBatch<T, D> {
        &self.colors[color]
    }

    /// Indices of the constrained degrees of freedom, sorted and unique.
    pub fn constrained_dofs(&self) -> &[usize] {
        &self.constrained_dofs
    }

    /// Overwrite `dst` with the entries of `src` at every constrained
    /// index, making any operator that calls this after its cell loop act
    /// as the identity on constrained degrees of freedom.
    pub fn copy_constrained_values(
        &self,
        device: &Device,
        dst: &mut DeviceVector<T>,
        src: &DeviceVector<T>,
    ) -> Result<(), Error> {
        self.check_length(dst.len())?;
        self.check_length(src.len())?;
        let src_values = src.as_slice();
        let dst_values = dst.as_mut_slice();
        // Constrained indices are unique, so each entry is written by at
        // most one task
        let access = unsafe { ParallelSliceAccess::new(dst_values) };
        device.install(|| {
            self.constrained_dofs.par_iter().for_each(|&dof| unsafe {
                *access.get_unchecked_mut(dof) = src_values[dof];
            })
        });
        Ok(())
    }

    /// Set every constrained entry of `values` to `value`.
    pub fn set_constrained_values(
        &self,
        device: &Device,
        values: &mut DeviceVector<T>,
        value: T,
    ) -> Result<(), Error> {
        self.check_length(values.len())?;
        let data = values.as_mut_slice();
        let access = unsafe { ParallelSliceAccess::new(data) };
        device.install(|| {
            self.constrained_dofs.par_iter().for_each(|&dof| unsafe {
                *access.get_unchecked_mut(dof) = value;
            })
        });
        Ok(())
    }

    /// Device bytes held by the per-cell data.
    pub fn memory_consumption(&self) -> usize {
        self.colors
            .iter()
            .map(|c| c.memory_consumption())
            .sum::<usize>()
            + self.constrained_dofs.len() * mem::size_of::<usize>()
    }

    fn check_length(&self, found: usize) -> Result<(), Error> {
        if found != self.n_dofs {
            return Err(Error::DimensionMismatch {
                expected: self.n_dofs,
                found,
            });
        }
        Ok(())
    }
}
