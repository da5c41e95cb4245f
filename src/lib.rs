//! Matrix-free application of a variable-coefficient Laplacian.
//!
//! This crate evaluates the action of a finite element elliptic operator
//! cell by cell, without ever assembling a global sparse matrix. Per-cell
//! geometric data and a tensor-product quadrature scheme are precomputed by
//! a setup collaborator; the apply itself is a conflict-free parallel cell
//! loop in which every cell runs a gather → evaluate → pointwise physics →
//! integrate → scatter pipeline on an explicit execution context.
//!
//! The main entry points are [`operator::LaplaceOperator`] for the operator
//! itself, [`vector::DeviceVector`] for the vectors it acts on,
//! [`device::Device`] for the execution context they share, and
//! [`procedural::unit_box_topology`] for a ready-made structured topology.

use nalgebra::RealField;

pub mod basis;
pub mod coefficient;
pub mod device;
pub mod error;
pub mod kernel;
pub mod operator;
pub mod procedural;
pub mod quadrature;
pub mod topology;
pub mod vector;

pub(crate) mod cell_loop;

pub use error::Error;

pub mod paradis {
    pub use cellwise_paradis::*;
}

/// Scalar type usable in device kernels.
///
/// Used as a trait alias for the bounds every numeric routine in this crate
/// needs: real arithmetic, cheap copies and cross-thread transfer.
pub trait Real: RealField + Copy + Send + Sync {}

impl<T> Real for T where T: RealField + Copy + Send + Sync {}
