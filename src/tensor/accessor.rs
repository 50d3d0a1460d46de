//! Typed strided view over a tensor's storage.

use std::marker::PhantomData;

use super::{DataLayout, Element, TensorRef};

/// Turns a tensor's byte strides into typed pointer arithmetic for inner loops.
///
/// `ptr(x, y, z, w)` is `base + x*s0 + y*s1 + z*s2 + w*s3` with no bounds
/// check in release builds; debug builds assert the element lies inside the
/// tensor's allocation. Use [`TensorAccessor::get`] when a checked read is
/// wanted.
#[derive(Debug, Clone, Copy)]
pub struct TensorAccessor<'a, T: Element> {
    base: *mut u8,
    strides: [usize; 4],
    len_bytes: usize,
    writable: bool,
    _marker: PhantomData<TensorRef<'a>>,
    _element: PhantomData<T>,
}

// SAFETY: same contract as `TensorRef`: threads sharing an accessor write
// disjoint elements.
unsafe impl<T: Element> Send for TensorAccessor<'_, T> {}
unsafe impl<T: Element> Sync for TensorAccessor<'_, T> {}

impl<'a, T: Element> TensorAccessor<'a, T> {
    pub fn new(tensor: TensorRef<'a>) -> Self {
        let info = tensor.info();
        assert_eq!(
            info.data_type(),
            T::DATA_TYPE,
            "accessor element type does not match tensor"
        );
        let mut strides = [0; 4];
        strides.copy_from_slice(&info.strides_in_bytes()[..4]);
        Self {
            base: tensor.as_ptr(),
            strides,
            len_bytes: tensor.len_bytes(),
            writable: tensor.is_writable(),
            _marker: PhantomData,
            _element: PhantomData,
        }
    }

    /// Accessor addressing a GEMM operand as `(x, row, batch, multi)`.
    ///
    /// For NHWC tensors `[C, W, H, N]` the `W * H = rows` positions are the
    /// rows and the batch stride becomes `row_stride * rows`.
    pub fn with_row_batches(tensor: TensorRef<'a>, rows: usize) -> Self {
        let mut accessor = Self::new(tensor);
        if tensor.info().data_layout() == DataLayout::Nhwc {
            accessor.set_stride(2, accessor.strides[1] * rows);
        }
        accessor
    }

    /// Stride of `dim` in elements.
    ///
    /// # Panics
    ///
    /// If the byte stride is not a multiple of the element size.
    #[inline]
    pub fn stride(&self, dim: usize) -> usize {
        let bytes = self.strides[dim];
        let size = size_of::<T>();
        assert!(
            bytes % size == 0,
            "stride {} of dimension {} is not a multiple of the element size {}",
            bytes,
            dim,
            size
        );
        bytes / size
    }

    /// Override the byte stride of one dimension.
    pub fn set_stride(&mut self, dim: usize, bytes: usize) {
        self.strides[dim] = bytes;
    }

    pub fn set_strides(&mut self, strides: [usize; 4]) {
        self.strides = strides;
    }

    #[inline(always)]
    fn offset(&self, x: usize, y: usize, z: usize, w: usize) -> usize {
        x * self.strides[0] + y * self.strides[1] + z * self.strides[2] + w * self.strides[3]
    }

    /// Pointer to element `(x, y, z, w)`.
    #[inline(always)]
    pub fn ptr(&self, x: usize, y: usize, z: usize, w: usize) -> *const T {
        let offset = self.offset(x, y, z, w);
        debug_assert!(
            offset <= self.len_bytes,
            "({}, {}, {}, {}) is outside the tensor",
            x,
            y,
            z,
            w
        );
        self.base.wrapping_add(offset) as *const T
    }

    /// Writable pointer to element `(x, y, z, w)`.
    #[inline(always)]
    pub fn ptr_mut(&self, x: usize, y: usize, z: usize, w: usize) -> *mut T {
        debug_assert!(self.writable, "writing through a read-only tensor view");
        self.ptr(x, y, z, w) as *mut T
    }

    /// Bounds-checked read, for tests and diagnostics.
    pub fn get(&self, x: usize, y: usize, z: usize, w: usize) -> Option<T> {
        let offset = self.offset(x, y, z, w);
        if offset + size_of::<T>() > self.len_bytes || offset % size_of::<T>() != 0 {
            return None;
        }
        // SAFETY: offset checked against the allocation above.
        Some(unsafe { self.base.add(offset).cast::<T>().read() })
    }
}
