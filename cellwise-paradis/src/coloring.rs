use crate::DisjointBlocks;
use std::cmp::max;
use std::mem;

/// Partition cells into color classes such that no two cells within one
/// class share a global index.
///
/// `cell_indices` stores each cell's global index block contiguously,
/// `block_len` entries per cell. The blocks of each returned
/// [`DisjointBlocks`] are labeled with the original cell indices, so the
/// colors together form a partition of `0..num_cells`.
pub fn sequential_greedy_coloring(cell_indices: &[usize], block_len: usize) -> Vec<DisjointBlocks> {
    assert!(block_len > 0, "block length must be positive");
    assert_eq!(
        cell_indices.len() % block_len,
        0,
        "index storage length must be a multiple of the block length"
    );
    let num_cells = cell_indices.len() / block_len;
    let cell_block = |cell: usize| &cell_indices[cell * block_len..(cell + 1) * block_len];

    let mut colors = Vec::new();
    let mut postponed_cells = Vec::new();
    let mut current_cells: Vec<_> = (0..num_cells).collect();

    // Table of the index of the last color to visit any given global index.
    // The maximum index is not known up front, so the table grows on demand.
    let mut last_visited_color = vec![-1i32; 0];

    let mut color_idx = 0i32;
    while !current_cells.is_empty() {
        let mut color_indices = Vec::new();
        let mut color_labels = Vec::new();
        let mut max_global_idx = None;
        for &cell in &current_cells {
            let block = cell_block(cell);
            let is_blocked = block.iter().any(|global_idx| {
                last_visited_color
                    .get(*global_idx)
                    .map(|&last_visitor| last_visitor == color_idx)
                    .unwrap_or(false)
            });
            if is_blocked {
                postponed_cells.push(cell);
            } else {
                for &global_idx in block {
                    max_global_idx = max_global_idx
                        .map(|current_max| max(global_idx, current_max))
                        .or(Some(global_idx));
                    if let Some(visitor) = last_visited_color.get_mut(global_idx) {
                        *visitor = color_idx;
                    } else {
                        // Grow beyond the immediate need so that a run of
                        // increasing indices does not resize on every step
                        last_visited_color.resize(2 * global_idx + 1, -1);
                        last_visited_color[global_idx] = color_idx;
                    }
                }
                color_indices.extend_from_slice(block);
                color_labels.push(cell);
            }
        }

        debug_assert!(DisjointBlocks::try_new(
            color_indices.clone(),
            block_len,
            color_labels.clone()
        )
        .is_ok());

        // Disjoint by construction, so the check can be skipped
        let color = unsafe {
            DisjointBlocks::new_unchecked(color_indices, block_len, color_labels, max_global_idx)
        };
        colors.push(color);
        mem::swap(&mut postponed_cells, &mut current_cells);
        postponed_cells.clear();
        color_idx = color_idx
            .checked_add(1)
            .expect("number of colors exceeded i32::MAX");
    }

    colors
}
