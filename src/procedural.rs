//! Procedural generation of structured reference topologies.
//!
//! The operator core consumes cell topologies without caring where they
//! come from; this module plays the setup-collaborator role for tests,
//! demos and self-contained use. It builds uniform tensor-product grids of
//! the unit box with continuous lexicographic DOF numbering, homogeneous
//! Dirichlet constraints on the whole boundary, affine cell geometry and a
//! greedy cell coloring.

use crate::error::Error;
use crate::kernel::tensor_size;
use crate::quadrature::gauss_interval;
use crate::topology::{CellTopology, ColorBatch};
use crate::Real;
use cellwise_paradis::sequential_greedy_coloring;
use nalgebra::{Point, SMatrix, SVector};

/// Decompose a linearized tensor index into per-axis indices, axis 0
/// fastest.
fn multi_index<const D: usize>(mut linear: usize, extent: usize) -> [usize; D] {
    let mut indices = [0; D];
    for index in indices.iter_mut() {
        *index = linear % extent;
        linear /= extent;
    }
    indices
}

/// Build a `Q_DEGREE` discretization of `[0, 1]^D` with `cells_per_dim`
/// cells along each axis, every boundary DOF constrained.
///
/// # Panics
///
/// Panics if `cells_per_dim` is zero or `DEGREE` is zero.
pub fn unit_box_topology<T, const D: usize, const DEGREE: usize>(
    cells_per_dim: usize,
) -> Result<CellTopology<T, D>, Error>
where
    T: Real,
{
    assert!(cells_per_dim >= 1, "need at least one cell per dimension");
    assert!(DEGREE >= 1, "polynomial degree must be at least 1");

    let points_1d = DEGREE + 1;
    let nodes_per_dim = DEGREE * cells_per_dim + 1;
    let n_dofs = tensor_size(nodes_per_dim, D);
    let n_cells = tensor_size(cells_per_dim, D);
    let dofs_per_cell = tensor_size(points_1d, D);
    let n_q_points = dofs_per_cell;
    let rule = gauss_interval(points_1d);
    let h = 1.0 / cells_per_dim as f64;

    // Local-to-global maps, cell-major, local axis-0-fastest ordering
    let mut cell_dofs = Vec::with_capacity(n_cells * dofs_per_cell);
    for cell in 0..n_cells {
        let cell_indices = multi_index::<D>(cell, cells_per_dim);
        for local in 0..dofs_per_cell {
            let local_indices = multi_index::<D>(local, points_1d);
            let mut global = 0;
            let mut stride = 1;
            for axis in 0..D {
                global += (cell_indices[axis] * DEGREE + local_indices[axis]) * stride;
                stride *= nodes_per_dim;
            }
            cell_dofs.push(global);
        }
    }

    let colors = sequential_greedy_coloring(&cell_dofs, dofs_per_cell);

    // All cells are axis-aligned with edge length h, so the Jacobian is
    // diag(h) everywhere
    let gradient_transform =
        SMatrix::<T, D, D>::identity() * nalgebra::convert::<f64, T>(1.0 / h);

    let mut batches = Vec::with_capacity(colors.len());
    for color in colors {
        let num_cells = color.num_blocks();
        let mut quadrature_points = Vec::with_capacity(num_cells * n_q_points);
        let mut transforms = Vec::with_capacity(num_cells * n_q_points);
        let mut jxw = Vec::with_capacity(num_cells * n_q_points);
        for &cell in color.labels() {
            let cell_indices = multi_index::<D>(cell, cells_per_dim);
            for q in 0..n_q_points {
                let q_indices = multi_index::<D>(q, points_1d);
                let mut coords = SVector::<T, D>::zeros();
                let mut weight = h.powi(D as i32);
                for axis in 0..D {
                    coords[axis] = nalgebra::convert(
                        (cell_indices[axis] as f64 + rule.points[q_indices[axis]]) * h,
                    );
                    weight *= rule.weights[q_indices[axis]];
                }
                quadrature_points.push(Point::from(coords));
                transforms.push(gradient_transform);
                jxw.push(nalgebra::convert(weight));
            }
        }
        batches.push(ColorBatch::try_new(
            color,
            quadrature_points,
            transforms,
            jxw,
            n_q_points,
        )?);
    }

    let constrained_dofs = (0..n_dofs)
        .filter(|&dof| {
            multi_index::<D>(dof, nodes_per_dim)
                .iter()
                .any(|&i| i == 0 || i == nodes_per_dim - 1)
        })
        .collect();

    CellTopology::new(n_dofs, dofs_per_cell, n_q_points, batches, constrained_dofs)
}
