//! Color-by-color orchestration of the per-cell kernel.
//!
//! Each color of the topology is dispatched as one launch: all cells of the
//! color run in parallel with no ordering guarantee among them, relying
//! solely on the disjointness of their global index blocks for write
//! safety. Launches are issued in color order and each completes before the
//! next begins, which is what allows consecutive colors to touch
//! overlapping destination entries.

use crate::basis::ShapeTable;
use crate::device::Device;
use crate::kernel::{apply_cell, KernelScratch, QuadraturePointOperation};
use crate::topology::CellTopology;
use crate::vector::DeviceVector;
use crate::Real;
use itertools::izip;
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// Accumulate the operator action of every cell into `dst`, one launch per
/// color, using `quad_ops[color]` as the pointwise physics of that color.
///
/// Callers have validated all dimensions; `dst` and `src` have the
/// topology's DOF count and `quad_ops` has one entry per color.
pub(crate) fn cell_loop<T, Op, const D: usize>(
    device: &Device,
    topology: &CellTopology<T, D>,
    shape: &ShapeTable<T>,
    quad_ops: &[Op],
    dst: &mut DeviceVector<T>,
    src: &DeviceVector<T>,
    scratch: &ThreadLocal<RefCell<KernelScratch<T>>>,
) where
    T: Real,
    Op: QuadraturePointOperation<T, D>,
{
    debug_assert_eq!(quad_ops.len(), topology.num_colors());
    let src_values = src.as_slice();
    let dst_values = dst.as_mut_slice();
    for (batch, op) in izip!(topology.colors(), quad_ops) {
        device.install(|| {
            batch.blocks().par_process(dst_values, |mut block| {
                let scratch = &mut *scratch.get_or_default().borrow_mut();
                apply_cell(shape, batch, op, src_values, &mut block, scratch);
            })
        });
    }
}
