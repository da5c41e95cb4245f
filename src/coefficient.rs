//! Pointwise coefficient fields and their per-color tabulation.
//!
//! The operator consumes the coefficient only through a table of values at
//! every quadrature point of every cell, rebuilt on each `reinit`. Keeping
//! the tabulation inside `reinit` means a stale table cannot survive a
//! change of cell partition or coefficient definition.

use crate::device::{Device, LaunchGrid};
use crate::topology::CellTopology;
use crate::vector::DeviceVector;
use crate::Real;
use cellwise_paradis::ParallelSliceAccess;
use log::debug;
use nalgebra::Point;
use std::sync::Arc;

/// Threads per block for the coefficient tabulation kernel: one thread per
/// cell, each looping over its cell's quadrature points.
const COEFFICIENT_BLOCK: usize = 128;

/// A scalar field evaluated at quadrature-point coordinates.
pub trait CoefficientFunction<T: Real, const D: usize>: Send + Sync {
    fn value(&self, point: &Point<T, D>) -> T;
}

/// The variable coefficient `a(x) = 1 / (0.05 + 2 |x|^2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InverseQuadratic;

impl<T: Real, const D: usize> CoefficientFunction<T, D> for InverseQuadratic {
    fn value(&self, point: &Point<T, D>) -> T {
        let offset: T = nalgebra::convert(0.05);
        let slope: T = nalgebra::convert(2.0);
        T::one() / (offset + slope * point.coords.norm_squared())
    }
}

/// A spatially constant coefficient.
#[derive(Debug, Clone, Copy)]
pub struct Constant<T>(pub T);

impl<T: Real, const D: usize> CoefficientFunction<T, D> for Constant<T> {
    fn value(&self, _point: &Point<T, D>) -> T {
        self.0
    }
}

/// Tabulate `coefficient` at every quadrature point of every cell, one
/// device vector per color, indexed `[cell_in_color * q_points + q]`.
///
/// Cells are distributed across a grid of fixed-size blocks; each thread
/// handles one cell and loops over that cell's quadrature points, so no two
/// threads write the same table entry and no synchronization is needed.
pub(crate) fn evaluate_coefficient<T, C, const D: usize>(
    device: &Arc<Device>,
    topology: &CellTopology<T, D>,
    coefficient: &C,
) -> Vec<DeviceVector<T>>
where
    T: Real,
    C: CoefficientFunction<T, D>,
{
    let n_q_points = topology.q_points_per_cell();
    let mut tables = Vec::with_capacity(topology.num_colors());
    for batch in topology.colors() {
        let n_cells = batch.num_cells();
        let mut table = DeviceVector::zeros(device, n_cells * n_q_points);
        let grid = LaunchGrid::covering(n_cells, COEFFICIENT_BLOCK);
        {
            let points = batch.quadrature_points();
            let out = table.as_mut_slice();
            // Each (block, thread) pair maps to a distinct cell and writes
            // only that cell's contiguous run of table entries
            let access = unsafe { ParallelSliceAccess::new(out) };
            device.launch(grid, |block| {
                for thread in 0..grid.block_dim() {
                    let cell = grid.block_offset(block) + thread;
                    if cell < n_cells {
                        for q in 0..n_q_points {
                            let idx = cell * n_q_points + q;
                            unsafe {
                                *access.get_unchecked_mut(idx) =
                                    coefficient.value(&points[idx]);
                            }
                        }
                    }
                }
            });
        }
        tables.push(table);
    }
    debug!(
        "tabulated coefficient for {} colors ({} quadrature values)",
        tables.len(),
        tables.iter().map(|t| t.len()).sum::<usize>()
    );
    tables
}
