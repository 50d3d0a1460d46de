//! Tensor metadata and storage.
//!
//! A [`Tensor`] is a flat, 8-byte aligned buffer plus a [`TensorInfo`]
//! describing its shape, element type, layout and per-dimension byte
//! strides. Dimension 0 is the fastest-varying one (columns of a matrix),
//! dimension 1 the rows, and so on.
//!
//! The GEMM machinery never resizes a caller's tensor. It reads and writes
//! through [`TensorRef`] handles and [`TensorAccessor`] views.

pub mod accessor;

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::NonNull;

pub use accessor::TensorAccessor;

/// Maximum number of tensor dimensions.
pub const MAX_DIMS: usize = 6;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Unsigned 8-bit (quantized operands).
    U8,
    /// Unsigned 32-bit (8-bit GEMM accumulators).
    U32,
    /// Signed 32-bit.
    S32,
    /// 32-bit float.
    F32,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U32 | DataType::S32 | DataType::F32 => 4,
        }
    }
}

/// Memory layout of a 4D activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLayout {
    /// Plain matrix / batched matrix layout.
    #[default]
    Nchw,
    /// Channels fastest. A GEMM operand in this layout is `[K, W, H, N]`
    /// and is reinterpreted as `W*H` rows per batch.
    Nhwc,
}

/// Rust scalar types that can live in a [`Tensor`].
pub trait Element: Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    const DATA_TYPE: DataType;
}

impl Element for u8 {
    const DATA_TYPE: DataType = DataType::U8;
}

impl Element for u32 {
    const DATA_TYPE: DataType = DataType::U32;
}

impl Element for i32 {
    const DATA_TYPE: DataType = DataType::S32;
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::F32;
}

/// Tensor dimensions. Dimensions past `num_dimensions()` read as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    dims: [usize; MAX_DIMS],
    num_dims: usize,
}

impl TensorShape {
    pub fn new(dims: &[usize]) -> Self {
        assert!(
            dims.len() <= MAX_DIMS,
            "at most {} dimensions supported, got {}",
            MAX_DIMS,
            dims.len()
        );
        let mut shape = [1; MAX_DIMS];
        shape[..dims.len()].copy_from_slice(dims);
        Self {
            dims: shape,
            num_dims: dims.len(),
        }
    }

    /// Shape with no dimensions; used for not-yet-initialised tensors.
    pub fn empty() -> Self {
        Self {
            dims: [1; MAX_DIMS],
            num_dims: 0,
        }
    }

    #[inline]
    pub fn dim(&self, index: usize) -> usize {
        if index < MAX_DIMS { self.dims[index] } else { 1 }
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dims
    }

    pub fn x(&self) -> usize {
        self.dims[0]
    }

    pub fn y(&self) -> usize {
        self.dims[1]
    }

    pub fn z(&self) -> usize {
        self.dims[2]
    }

    /// Number of elements; 0 for an empty shape.
    pub fn total_size(&self) -> usize {
        if self.num_dims == 0 {
            0
        } else {
            self.dims.iter().product()
        }
    }

    /// Product of the dimensions from `from` upwards.
    pub fn total_size_upper(&self, from: usize) -> usize {
        self.dims[from.min(MAX_DIMS)..].iter().product()
    }
}

/// Shape, element type, layout and byte strides of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    shape: TensorShape,
    data_type: DataType,
    layout: DataLayout,
    strides: [usize; MAX_DIMS],
}

impl TensorInfo {
    pub fn new(shape: TensorShape, data_type: DataType) -> Self {
        let strides = dense_strides(&shape, data_type.size());
        Self {
            shape,
            data_type,
            layout: DataLayout::Nchw,
            strides,
        }
    }

    /// Info with a type but no shape yet.
    pub fn empty(data_type: DataType) -> Self {
        Self::new(TensorShape::empty(), data_type)
    }

    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.shape.num_dimensions() == 0
    }

    pub fn tensor_shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dimension(&self, index: usize) -> usize {
        self.shape.dim(index)
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn data_layout(&self) -> DataLayout {
        self.layout
    }

    pub fn element_size(&self) -> usize {
        self.data_type.size()
    }

    pub fn strides_in_bytes(&self) -> &[usize; MAX_DIMS] {
        &self.strides
    }

    /// Total allocation size in bytes.
    pub fn total_size(&self) -> usize {
        self.shape.total_size() * self.element_size()
    }
}

fn dense_strides(shape: &TensorShape, element_size: usize) -> [usize; MAX_DIMS] {
    let mut strides = [0; MAX_DIMS];
    strides[0] = element_size;
    for i in 1..MAX_DIMS {
        strides[i] = strides[i - 1] * shape.dim(i - 1);
    }
    strides
}

/// A tensor that owns its (zero-initialised) storage.
#[derive(Debug, Clone)]
pub struct Tensor {
    info: TensorInfo,
    // u64 words give every supported element type a correctly aligned base.
    storage: Vec<u64>,
}

impl Tensor {
    pub fn new(shape: TensorShape, data_type: DataType) -> Self {
        Self::with_info(TensorInfo::new(shape, data_type))
    }

    pub fn with_info(info: TensorInfo) -> Self {
        let words = info.total_size().div_ceil(8);
        Self {
            info,
            storage: vec![0; words],
        }
    }

    /// Unallocated tensor whose shape is decided later by [`Tensor::init_if_empty`].
    pub fn empty(data_type: DataType) -> Self {
        Self::with_info(TensorInfo::empty(data_type))
    }

    pub fn from_slice<T: Element>(shape: TensorShape, data: &[T]) -> Self {
        Self::from_slice_with_layout(shape, DataLayout::Nchw, data)
    }

    pub fn from_slice_with_layout<T: Element>(
        shape: TensorShape,
        layout: DataLayout,
        data: &[T],
    ) -> Self {
        assert_eq!(
            shape.total_size(),
            data.len(),
            "shape {:?} needs {} elements, got {}",
            shape,
            shape.total_size(),
            data.len()
        );
        let mut tensor = Self::with_info(TensorInfo::new(shape, T::DATA_TYPE).with_layout(layout));
        tensor.as_mut_slice::<T>().copy_from_slice(data);
        tensor
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn is_allocated(&self) -> bool {
        !self.info.is_empty()
    }

    /// Give an empty tensor its shape and storage. Returns `false` and
    /// leaves the tensor untouched if it was already initialised.
    pub fn init_if_empty(&mut self, shape: TensorShape) -> bool {
        if !self.info.is_empty() {
            return false;
        }
        let layout = self.info.data_layout();
        *self = Self::with_info(TensorInfo::new(shape, self.info.data_type()).with_layout(layout));
        true
    }

    pub fn as_slice<T: Element>(&self) -> &[T] {
        self.check_type::<T>();
        let len = self.info.tensor_shape().total_size();
        // SAFETY: storage holds at least `len * size_of::<T>()` bytes and is
        // 8-byte aligned; every bit pattern is a valid T for the Element types.
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr() as *const T, len) }
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> &mut [T] {
        self.check_type::<T>();
        let len = self.info.tensor_shape().total_size();
        // SAFETY: see `as_slice`.
        unsafe { std::slice::from_raw_parts_mut(self.storage.as_mut_ptr() as *mut T, len) }
    }

    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        self.as_slice::<T>().to_vec()
    }

    pub fn fill<T: Element>(&mut self, value: T) {
        self.as_mut_slice::<T>().fill(value);
    }

    /// Read-only handle.
    pub fn view(&self) -> TensorRef<'_> {
        TensorRef {
            ptr: NonNull::from(self.storage.as_slice()).cast::<u8>(),
            info: &self.info,
            writable: false,
            _marker: PhantomData,
        }
    }

    /// Writable handle. Copies of it may be handed to several threads; see
    /// [`TensorRef`] for the rules they must follow.
    pub fn view_mut(&mut self) -> TensorRef<'_> {
        let Tensor { info, storage } = self;
        TensorRef {
            ptr: NonNull::from(storage.as_mut_slice()).cast::<u8>(),
            info,
            writable: true,
            _marker: PhantomData,
        }
    }

    fn check_type<T: Element>(&self) {
        assert_eq!(
            T::DATA_TYPE,
            self.info.data_type(),
            "tensor holds {:?}, accessed as {:?}",
            self.info.data_type(),
            T::DATA_TYPE
        );
    }
}

/// Non-owning, copyable handle to a tensor's storage.
///
/// This is what the GEMM wrappers keep between `configure` and `transform`.
/// Handles obtained from [`Tensor::view_mut`] may be used to write from
/// several threads at once, provided no two threads write overlapping
/// elements and nobody reads an element while another thread writes it.
/// The workload partitioning in [`crate::threaded`] upholds that.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef<'a> {
    ptr: NonNull<u8>,
    info: &'a TensorInfo,
    writable: bool,
    _marker: PhantomData<&'a UnsafeCell<u8>>,
}

// SAFETY: the handle is a pointer plus metadata; concurrent use follows the
// disjoint-writes contract documented on the type.
unsafe impl Send for TensorRef<'_> {}
unsafe impl Sync for TensorRef<'_> {}

impl<'a> TensorRef<'a> {
    pub fn info(&self) -> &'a TensorInfo {
        self.info
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Bytes addressable through this handle.
    pub fn len_bytes(&self) -> usize {
        self.info.total_size()
    }
}
