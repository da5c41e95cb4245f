//! Device-resident vector with value semantics.
//!
//! [`DeviceVector`] owns a buffer on its execution context and exposes the
//! vector arithmetic an iterative solver needs: fills, AXPY-family updates,
//! inner products, norms and elementwise operations. Every arithmetic method
//! dispatches a synchronous elementwise kernel; reductions additionally
//! block until the scalar result is available to the host.
//!
//! Reductions combine fixed-size per-block partial sums in block order, so
//! repeated reductions over identical data produce identical results.

use crate::device::Device;
use crate::error::Error;
use crate::Real;
use num::Zero;
use rayon::iter::{IndexedParallelIterator, ParallelIterator};
use rayon::slice::{ParallelSlice, ParallelSliceMut};
use std::mem;
use std::sync::Arc;

/// Work items per block for elementwise kernels and reduction partials.
const VECTOR_BLOCK: usize = 1024;

#[derive(Debug, Clone)]
pub struct DeviceVector<T> {
    device: Arc<Device>,
    data: Vec<T>,
}

impl<T: Real> DeviceVector<T> {
    /// A degenerate vector with no storage. Only [`resize`](Self::resize)
    /// and `fill(0)` are valid on it.
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            data: Vec::new(),
        }
    }

    /// A zero-initialized vector of the given length.
    pub fn zeros(device: &Arc<Device>, len: usize) -> Self {
        Self {
            device: Arc::clone(device),
            data: vec![T::zero(); len],
        }
    }

    /// A vector holding a copy of the given host data.
    pub fn from_host(device: &Arc<Device>, values: &[T]) -> Self {
        Self {
            device: Arc::clone(device),
            data: values.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Reallocate to the given length. The contents afterwards are
    /// unspecified by contract; this implementation zero-fills.
    pub fn resize(&mut self, len: usize) {
        self.data.clear();
        self.data.resize(len, T::zero());
    }

    /// Set every entry to `value`.
    ///
    /// Filling a degenerate vector with zero is a no-op; filling it with
    /// anything else is an error.
    pub fn fill(&mut self, value: T) -> Result<(), Error> {
        if self.data.is_empty() {
            return if value.is_zero() {
                Ok(())
            } else {
                Err(Error::Uninitialized)
            };
        }
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK)
                .for_each(|chunk| chunk.fill(value))
        });
        Ok(())
    }

    /// Blocking transfer from host memory. Lengths must match.
    pub fn copy_from_host(&mut self, values: &[T]) -> Result<(), Error> {
        self.check_nonempty()?;
        if values.len() != self.data.len() {
            return Err(Error::DimensionMismatch {
                expected: self.data.len(),
                found: values.len(),
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    /// Blocking transfer to host memory. Lengths must match.
    pub fn copy_to_host(&self, values: &mut [T]) -> Result<(), Error> {
        self.check_nonempty()?;
        if values.len() != self.data.len() {
            return Err(Error::DimensionMismatch {
                expected: self.data.len(),
                found: values.len(),
            });
        }
        values.copy_from_slice(&self.data);
        Ok(())
    }

    /// Blocking transfer of all entries into a freshly allocated host
    /// vector.
    pub fn to_host_vec(&self) -> Vec<T> {
        self.data.clone()
    }

    /// `self += a * x`.
    pub fn axpy(&mut self, a: T, x: &DeviceVector<T>) -> Result<(), Error> {
        self.check_binary(x)?;
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        let xs = x.data.as_slice();
        device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK)
                .zip(xs.par_chunks(VECTOR_BLOCK))
                .for_each(|(dst, src)| {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += a * *s;
                    }
                })
        });
        Ok(())
    }

    /// `self = a * self + b * x`.
    pub fn sadd(&mut self, a: T, b: T, x: &DeviceVector<T>) -> Result<(), Error> {
        self.check_binary(x)?;
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        let xs = x.data.as_slice();
        device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK)
                .zip(xs.par_chunks(VECTOR_BLOCK))
                .for_each(|(dst, src)| {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d = a * *d + b * *s;
                    }
                })
        });
        Ok(())
    }

    /// `self = a * x`.
    pub fn assign_scaled(&mut self, a: T, x: &DeviceVector<T>) -> Result<(), Error> {
        self.check_binary(x)?;
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        let xs = x.data.as_slice();
        device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK)
                .zip(xs.par_chunks(VECTOR_BLOCK))
                .for_each(|(dst, src)| {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d = a * *s;
                    }
                })
        });
        Ok(())
    }

    /// `self -= x`.
    pub fn sub_assign(&mut self, x: &DeviceVector<T>) -> Result<(), Error> {
        self.axpy(-T::one(), x)
    }

    /// `self *= a`.
    pub fn scale_mut(&mut self, a: T) -> Result<(), Error> {
        self.check_nonempty()?;
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK).for_each(|chunk| {
                for d in chunk {
                    *d *= a;
                }
            })
        });
        Ok(())
    }

    /// Elementwise `self[i] *= x[i]`.
    pub fn component_mul_assign(&mut self, x: &DeviceVector<T>) -> Result<(), Error> {
        self.check_binary(x)?;
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        let xs = x.data.as_slice();
        device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK)
                .zip(xs.par_chunks(VECTOR_BLOCK))
                .for_each(|(dst, src)| {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d *= *s;
                    }
                })
        });
        Ok(())
    }

    /// Elementwise `self[i] /= x[i]`. Division follows IEEE semantics; a
    /// zero divisor yields an infinity or NaN rather than an error.
    pub fn component_div_assign(&mut self, x: &DeviceVector<T>) -> Result<(), Error> {
        self.check_binary(x)?;
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        let xs = x.data.as_slice();
        device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK)
                .zip(xs.par_chunks(VECTOR_BLOCK))
                .for_each(|(dst, src)| {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d /= *s;
                    }
                })
        });
        Ok(())
    }

    /// Inner product `self · x`, blocking until the scalar is available.
    pub fn dot(&self, x: &DeviceVector<T>) -> Result<T, Error> {
        self.check_binary(x)?;
        let partials: Vec<T> = self.device.install(|| {
            self.data
                .par_chunks(VECTOR_BLOCK)
                .zip(x.data.par_chunks(VECTOR_BLOCK))
                .map(|(a, b)| {
                    let mut acc = T::zero();
                    for (ai, bi) in a.iter().zip(b) {
                        acc += *ai * *bi;
                    }
                    acc
                })
                .collect()
        });
        Ok(partials.into_iter().fold(T::zero(), |acc, p| acc + p))
    }

    /// Fused update-then-measure: performs `self += a * x` and returns
    /// `self · v`, both in a single pass over the data.
    ///
    /// This is the common inner-iteration idiom of Krylov solvers; fusing
    /// the two effects avoids a second full traversal of the vectors.
    pub fn add_and_dot(
        &mut self,
        a: T,
        x: &DeviceVector<T>,
        v: &DeviceVector<T>,
    ) -> Result<T, Error> {
        self.check_binary(x)?;
        self.check_binary(v)?;
        let device = Arc::clone(&self.device);
        let data = &mut self.data;
        let xs = x.data.as_slice();
        let vs = v.data.as_slice();
        let partials: Vec<T> = device.install(|| {
            data.par_chunks_mut(VECTOR_BLOCK)
                .zip(xs.par_chunks(VECTOR_BLOCK))
                .zip(vs.par_chunks(VECTOR_BLOCK))
                .map(|((dst, src), meas)| {
                    let mut acc = T::zero();
                    for ((d, s), m) in dst.iter_mut().zip(src).zip(meas) {
                        *d += a * *s;
                        acc += *d * *m;
                    }
                    acc
                })
                .collect()
        });
        Ok(partials.into_iter().fold(T::zero(), |acc, p| acc + p))
    }

    /// The l2 norm of the vector.
    pub fn norm(&self) -> Result<T, Error> {
        Ok(self.dot(self)?.sqrt())
    }

    /// Whether every entry is exactly zero.
    pub fn all_zero(&self) -> Result<bool, Error> {
        self.check_nonempty()?;
        Ok(self
            .device
            .install(|| self.data.par_chunks(VECTOR_BLOCK).all(|c| c.iter().all(|v| v.is_zero()))))
    }

    /// Exchange buffers with `other` in O(1), without copying entries.
    pub fn swap(&mut self, other: &mut DeviceVector<T>) {
        mem::swap(&mut self.data, &mut other.data);
    }

    /// Device bytes held by this vector.
    pub fn memory_consumption(&self) -> usize {
        self.data.len() * mem::size_of::<T>()
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn check_nonempty(&self) -> Result<(), Error> {
        if self.data.is_empty() {
            Err(Error::Uninitialized)
        } else {
            Ok(())
        }
    }

    fn check_binary(&self, other: &DeviceVector<T>) -> Result<(), Error> {
        self.check_nonempty()?;
        if other.data.len() != self.data.len() {
            return Err(Error::DimensionMismatch {
                expected: self.data.len(),
                found: other.data.len(),
            });
        }
        Ok(())
    }
}
