//! Parallel processing of disjoint cell index blocks.
//!
//! A [`DisjointBlocks`] instance holds one equally-sized block of global
//! indices per cell, with the invariant that no index is shared between two
//! blocks. Under that invariant, every block of a shared output array can be
//! handed to a different worker thread without any runtime synchronization,
//! which is what makes a conflict-free parallel scatter possible. Producing
//! block sets that satisfy the invariant is the job of
//! [`sequential_greedy_coloring`].

mod coloring;
mod slice;

pub use coloring::sequential_greedy_coloring;
pub use slice::ParallelSliceAccess;

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::collections::HashSet;
use std::fmt;

/// Error returned when two blocks share a global index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlappingBlocks {
    /// A global index that occurs in more than one block.
    pub index: usize,
}

impl fmt::Display for OverlappingBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "global index {} is shared by more than one block",
            self.index
        )
    }
}

impl std::error::Error for OverlappingBlocks {}

/// A set of equally-sized, mutually disjoint blocks of global indices.
///
/// Each block is labeled, typically by the index of the cell it belongs to
/// in some enclosing enumeration of cells. Within a block, duplicate indices
/// are permitted (a single worker processes the whole block sequentially);
/// across blocks they are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisjointBlocks {
    indices: Vec<usize>,
    block_len: usize,
    labels: Vec<usize>,
    max_index: Option<usize>,
}

impl DisjointBlocks {
    /// Construct from flat block-major index storage, verifying that the
    /// blocks are mutually disjoint.
    ///
    /// `indices` must have length `labels.len() * block_len`.
    pub fn try_new(
        indices: Vec<usize>,
        block_len: usize,
        labels: Vec<usize>,
    ) -> Result<Self, OverlappingBlocks> {
        assert!(block_len > 0, "block length must be positive");
        assert_eq!(
            indices.len(),
            labels.len() * block_len,
            "index storage length must equal number of blocks times block length"
        );

        let mut seen = HashSet::with_capacity(indices.len());
        for block in indices.chunks_exact(block_len) {
            let mut in_block = HashSet::with_capacity(block_len);
            for &idx in block {
                // Duplicates within the same block are allowed
                if in_block.insert(idx) && !seen.insert(idx) {
                    return Err(OverlappingBlocks { index: idx });
                }
            }
        }

        let max_index = indices.iter().copied().max();
        Ok(Self {
            indices,
            block_len,
            labels,
            max_index,
        })
    }

    /// Construct from flat block-major index storage without verifying
    /// disjointness.
    ///
    /// # Safety
    ///
    /// The blocks must be mutually disjoint in the sense of [`try_new`];
    /// otherwise [`par_process`] performs unsynchronized writes to shared
    /// entries, which is undefined behavior.
    ///
    /// [`try_new`]: DisjointBlocks::try_new
    /// [`par_process`]: DisjointBlocks::par_process
    pub unsafe fn new_unchecked(
        indices: Vec<usize>,
        block_len: usize,
        labels: Vec<usize>,
        max_index: Option<usize>,
    ) -> Self {
        assert!(block_len > 0, "block length must be positive");
        assert_eq!(indices.len(), labels.len() * block_len);
        Self {
            indices,
            block_len,
            labels,
            max_index,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.labels.len()
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// The label of each block, in block order.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// The global indices of the block at position `ordinal`.
    pub fn block_indices(&self, ordinal: usize) -> &[usize] {
        &self.indices[ordinal * self.block_len..(ordinal + 1) * self.block_len]
    }

    /// The largest global index across all blocks, if any block is non-empty.
    pub fn max_index(&self) -> Option<usize> {
        self.max_index
    }

    /// Process all blocks in parallel, handing each invocation of `f`
    /// mutable access to exactly one block's entries of `data`.
    ///
    /// Blocks are processed in unspecified order with no ordering guarantee
    /// among them; the call returns once every block has been processed.
    ///
    /// # Panics
    ///
    /// Panics if any block index is out of bounds for `data`.
    pub fn par_process<T, F>(&self, data: &mut [T], f: F)
    where
        T: Send + Sync,
        F: Fn(BlockAccess<'_, T>) + Sync,
    {
        if let Some(max_index) = self.max_index {
            assert!(
                max_index < data.len(),
                "block index {} out of bounds for data of length {}",
                max_index,
                data.len()
            );
        }

        // Sound: every block is handed out exactly once, and the disjointness
        // invariant guarantees that no entry of `data` belongs to two blocks.
        let access = unsafe { ParallelSliceAccess::new(data) };
        (0..self.num_blocks()).into_par_iter().for_each(|ordinal| {
            f(BlockAccess {
                ordinal,
                label: self.labels[ordinal],
                indices: self.block_indices(ordinal),
                access: access.clone(),
            })
        });
    }
}

/// Mutable access to one block's entries of a shared array, handed to the
/// closure of [`DisjointBlocks::par_process`].
pub struct BlockAccess<'a, T> {
    ordinal: usize,
    label: usize,
    indices: &'a [usize],
    access: ParallelSliceAccess<'a, T>,
}

impl<'a, T> BlockAccess<'a, T> {
    /// Position of this block within its [`DisjointBlocks`] instance.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// The label assigned to this block.
    pub fn label(&self) -> usize {
        self.label
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The global indices belonging to this block.
    pub fn global_indices(&self) -> &[usize] {
        self.indices
    }

    /// Mutable reference to the entry at local position `local` of the block.
    pub fn get_mut(&mut self, local: usize) -> &mut T {
        // Sound: the entry belongs to this block, and `&mut self` guarantees
        // exclusive use of the block within this thread.
        unsafe { self.access.get_unchecked_mut(self.indices[local]) }
    }
}
