// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime tensors: an aligned buffer plus its [`TensorInfo`].
//!
//! Kernels write their designated sub-window of an output tensor from
//! several threads at once, so the buffer is exposed through a raw
//! pointer ([`Tensor::buffer`]) rather than `&mut [u8]`. The scheduler's
//! disjoint-window guarantee is what makes those writes race-free.

use crate::{ComputeError, Status, TensorInfo};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Heap allocation with a caller-chosen alignment, zero-initialised.
struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuffer {
    fn zeroed(size: usize, alignment: usize) -> Self {
        let alignment = alignment.max(1).next_power_of_two();
        let layout = Layout::from_size_align(size, alignment)
            .unwrap_or_else(|_| panic!("invalid buffer layout: {size} bytes aligned to {alignment}"));
        if size == 0 {
            // Zero-sized: never dereferenced, never freed.
            let ptr = NonNull::new(alignment as *mut u8).unwrap_or(NonNull::dangling());
            return Self { ptr, layout };
        }
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self { ptr, layout }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            // SAFETY: allocated in `zeroed` with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

// The buffer is plain bytes; synchronisation is the scheduler's job.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

/// An allocated tensor.
///
/// Cloning a `Tensor` (or calling [`reinterpret`](Tensor::reinterpret)) yields
/// a second handle onto the same memory.
///
/// # Examples
/// ```
/// use tensor_core::{DataType, Tensor, TensorInfo, TensorShape};
/// let info = TensorInfo::new(TensorShape::new(&[3]), DataType::F32);
/// let t = Tensor::from_slice(info, &[1.0f32, 2.0, 3.0]).unwrap();
/// assert_eq!(t.to_vec::<f32>(), vec![1.0, 2.0, 3.0]);
/// ```
pub struct Tensor {
    info: TensorInfo,
    buffer: Arc<AlignedBuffer>,
    offset: usize,
    constant: Arc<AtomicBool>,
}

impl Tensor {
    /// Alignment of buffers allocated by [`Tensor::new`].
    pub const DEFAULT_ALIGNMENT: usize = 64;

    /// Allocates a zeroed tensor for `info`.
    pub fn new(info: TensorInfo) -> Self {
        Self::with_alignment(info, Self::DEFAULT_ALIGNMENT)
    }

    /// Allocates a zeroed tensor whose buffer start is aligned to `alignment`.
    pub fn with_alignment(info: TensorInfo, alignment: usize) -> Self {
        Self::with_capacity(info, 0, alignment)
    }

    /// Allocates at least `capacity` bytes (or `info.total_size()` if larger).
    pub fn with_capacity(info: TensorInfo, capacity: usize, alignment: usize) -> Self {
        let size = info.total_size().max(capacity);
        tracing::trace!(bytes = size, alignment, "allocating tensor buffer");
        let constant = info.are_values_constant();
        Self {
            info,
            buffer: Arc::new(AlignedBuffer::zeroed(size, alignment)),
            offset: 0,
            constant: Arc::new(AtomicBool::new(constant)),
        }
    }

    /// Allocates a tensor and copies `values` into it.
    pub fn from_slice<T: bytemuck::Pod>(info: TensorInfo, values: &[T]) -> Result<Self, ComputeError> {
        let t = Self::new(info);
        t.copy_from_slice(values)?;
        Ok(t)
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    /// Raw pointer to the first byte of the tensor.
    pub fn buffer(&self) -> *mut u8 {
        // SAFETY: offset stays within the allocation (checked in `reinterpret`).
        unsafe { self.buffer.ptr.as_ptr().add(self.offset) }
    }

    /// Bytes available from [`buffer`](Self::buffer) to the end of the allocation.
    pub fn capacity(&self) -> usize {
        self.buffer.layout.size() - self.offset
    }

    /// Pointer to the element at `coords`.
    pub fn ptr_to_element(&self, coords: &[usize]) -> *mut u8 {
        let off = self.info.offset_element_in_bytes(coords);
        debug_assert!(off < self.capacity().max(1));
        // SAFETY: coordinates inside the shape map into the buffer.
        unsafe { self.buffer().add(off) }
    }

    /// Whether the values may be assumed unchanged between runs.
    pub fn are_values_constant(&self) -> bool {
        self.constant.load(Ordering::Acquire)
    }

    /// Marks the values as constant (or not). Checked by operators on every run.
    pub fn set_values_constant(&self, constant: bool) {
        self.constant.store(constant, Ordering::Release);
    }

    /// Copies `values` into the buffer.
    pub fn copy_from_slice<T: bytemuck::Pod>(&self, values: &[T]) -> Status {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let expected = self.info.total_size();
        if bytes.len() != expected {
            return Err(ComputeError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        // SAFETY: the buffer holds at least `expected` bytes and does not alias `values`.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.buffer(), expected) };
        Ok(())
    }

    /// Copies the tensor contents out as `T`s.
    ///
    /// # Panics
    /// Panics if the tensor size is not a multiple of `size_of::<T>()`.
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Vec<T> {
        let len = self.info.total_size();
        // SAFETY: the buffer holds `len` initialised bytes.
        let bytes = unsafe { std::slice::from_raw_parts(self.buffer(), len) };
        bytemuck::pod_collect_to_vec(bytes)
    }

    /// Sets every element to `value`.
    pub fn fill<T: bytemuck::Pod>(&self, value: T) {
        let n = self.info.total_size() / std::mem::size_of::<T>().max(1);
        let ptr = self.buffer() as *mut T;
        for i in 0..n {
            // SAFETY: `i` is in bounds; unaligned write tolerates views at odd offsets.
            unsafe { ptr.add(i).write_unaligned(value) };
        }
    }

    /// Views the buffer as `&[T]`.
    ///
    /// # Safety
    /// No other thread may write the tensor while the slice is alive, and the
    /// buffer must be aligned for `T`.
    pub unsafe fn as_slice<T: bytemuck::Pod>(&self) -> &[T] {
        let n = self.info.total_size() / std::mem::size_of::<T>().max(1);
        std::slice::from_raw_parts(self.buffer() as *const T, n)
    }

    /// A second handle onto the same memory, described by `info`.
    pub fn reinterpret(&self, info: TensorInfo) -> Result<Tensor, ComputeError> {
        if info.total_size() > self.capacity() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: info.total_size(),
                actual: self.capacity(),
            });
        }
        Ok(Tensor {
            info,
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            constant: Arc::clone(&self.constant),
        })
    }

    /// Returns `true` if both handles point at the same allocation.
    pub fn shares_buffer_with(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            info: self.info.clone(),
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            constant: Arc::clone(&self.constant),
        }
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", self.info.shape())
            .field("data_type", &self.info.data_type())
            .field("capacity", &self.capacity())
            .field("constant", &self.are_values_constant())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataType, TensorShape};

    fn f32_info(dims: &[usize]) -> TensorInfo {
        TensorInfo::new(TensorShape::new(dims), DataType::F32)
    }

    #[test]
    fn test_zeroed_and_aligned() {
        let t = Tensor::with_alignment(f32_info(&[7]), 4096);
        assert_eq!(t.buffer() as usize % 4096, 0);
        assert!(t.to_vec::<f32>().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_copy_size_mismatch() {
        let t = Tensor::new(f32_info(&[4]));
        let err = t.copy_from_slice(&[1.0f32, 2.0]).unwrap_err();
        assert!(matches!(err, ComputeError::BufferSizeMismatch { expected: 16, actual: 8 }));
    }

    #[test]
    fn test_fill() {
        let t = Tensor::new(f32_info(&[3, 2]));
        t.fill(2.5f32);
        assert_eq!(t.to_vec::<f32>(), vec![2.5; 6]);
    }

    #[test]
    fn test_reinterpret_shares_memory() {
        let raw = Tensor::new(TensorInfo::new(TensorShape::new(&[16]), DataType::U8));
        let view = raw.reinterpret(f32_info(&[4])).unwrap();
        view.copy_from_slice(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert!(raw.shares_buffer_with(&view));
        assert_eq!(&raw.to_vec::<u8>()[..4], &1.0f32.to_ne_bytes());
        assert!(raw.reinterpret(f32_info(&[5])).is_err());
    }

    #[test]
    fn test_constant_flag_is_live() {
        let t = Tensor::new(f32_info(&[1]));
        assert!(t.are_values_constant());
        let handle = t.clone();
        handle.set_values_constant(false);
        assert!(!t.are_values_constant());
    }

    #[test]
    fn test_half_roundtrip() {
        let info = TensorInfo::new(TensorShape::new(&[2]), DataType::F16);
        let vals = [half::f16::from_f32(1.5), half::f16::from_f32(-2.0)];
        let t = Tensor::from_slice(info, &vals).unwrap();
        assert_eq!(t.to_vec::<half::f16>(), vals.to_vec());
    }
}
