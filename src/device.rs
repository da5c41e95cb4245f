//! Execution context for device-style kernel launches.
//!
//! The [`Device`] models the execution environment the rest of the crate
//! dispatches work to: a single logical device with an in-order launch
//! queue. This backend executes on the host, on a thread pool owned by the
//! device, which keeps the context an explicit dependency rather than
//! ambient global state; tests and applications construct and share one
//! `Arc<Device>` and pass it to every vector and operator.
//!
//! Launch semantics:
//!
//! - [`Device::launch`] executes one kernel invocation per block of a
//!   [`LaunchGrid`]. Blocks run in parallel with no ordering guarantee
//!   among them; the call returns only when all blocks have completed, so
//!   consecutive launches observe each other in issue order.
//! - The thread-level parallelism a hardware block would provide is
//!   executed sequentially inside each block invocation; the block-wide
//!   synchronization points of a hardware kernel become the sequential
//!   phase boundaries of the kernel body.
//! - A panic inside a kernel body propagates out of the launch and aborts
//!   the caller. There is no recovery path: a faulted context cannot
//!   safely continue.

use crate::error::Error;
use log::debug;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::sync::Arc;

pub struct Device {
    pool: ThreadPool,
}

impl Device {
    /// Construct a device backed by a pool with one worker per available
    /// hardware thread.
    pub fn new() -> Result<Arc<Self>, Error> {
        Self::build(ThreadPoolBuilder::new())
    }

    /// Construct a device backed by a pool with exactly `num_threads`
    /// workers.
    pub fn with_threads(num_threads: usize) -> Result<Arc<Self>, Error> {
        Self::build(ThreadPoolBuilder::new().num_threads(num_threads))
    }

    fn build(builder: ThreadPoolBuilder) -> Result<Arc<Self>, Error> {
        let pool = builder
            .build()
            .map_err(|err| Error::Device(err.to_string()))?;
        debug!(
            "initialized device execution context with {} worker threads",
            pool.current_num_threads()
        );
        Ok(Arc::new(Self { pool }))
    }

    /// Execute `kernel` once per block of `grid`, in parallel, returning
    /// when the whole grid has completed.
    ///
    /// The argument passed to `kernel` is the linearized block index.
    pub fn launch<F>(&self, grid: LaunchGrid, kernel: F)
    where
        F: Fn(usize) + Sync,
    {
        self.pool.install(|| {
            (0..grid.num_blocks())
                .into_par_iter()
                .for_each(|block| kernel(block))
        });
    }

    /// Run `op` inside the device's worker pool, so that parallel iterators
    /// spawned by `op` execute on device workers.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

/// A 2-D grid of fixed-size blocks covering a 1-D range of work items.
///
/// Grids are laid out as close to square as possible so that neither grid
/// dimension grows unboundedly for large item counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGrid {
    blocks_x: usize,
    blocks_y: usize,
    block_dim: usize,
}

impl LaunchGrid {
    /// A grid whose `block_dim`-sized blocks cover `num_items` work items.
    pub fn covering(num_items: usize, block_dim: usize) -> Self {
        assert!(block_dim > 0, "block dimension must be positive");
        let blocks = num_items.div_ceil(block_dim).max(1);
        let blocks_x = ((blocks as f64).sqrt().round() as usize).max(1);
        let blocks_y = blocks.div_ceil(blocks_x);
        Self {
            blocks_x,
            blocks_y,
            block_dim,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks_x * self.blocks_y
    }

    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    /// The first work item handled by the block with the given linearized
    /// index.
    pub fn block_offset(&self, block: usize) -> usize {
        block * self.block_dim
    }
}
