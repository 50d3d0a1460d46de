//! Multi-dimensional iteration spaces.
//!
//! A [`Window`] describes a rectangular index space per dimension as
//! `(start, end, step)`. The GEMM wrappers use two of them: the block
//! walker over `(N blocks, K blocks, multis)` and the batch window over
//! `(M blocks, batches)`.

pub mod iterator;

pub use iterator::WindowIterator;

/// Number of dimensions a window can describe.
pub const MAX_DIMS: usize = 6;

pub const DIM_X: usize = 0;
pub const DIM_Y: usize = 1;
pub const DIM_Z: usize = 2;

/// One dimension of a [`Window`]: `[start, end)` visited in `step` increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    start: i32,
    end: i32,
    step: i32,
}

impl Dimension {
    pub fn new(start: i32, end: i32, step: i32) -> Self {
        assert!(step > 0, "window step must be positive, got {}", step);
        assert!(start <= end, "window start {} is past end {}", start, end);
        Self { start, end, step }
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// Number of steps needed to cover `[start, end)`.
    pub fn num_iterations(&self) -> usize {
        ((self.end - self.start) as usize).div_ceil(self.step as usize)
    }

    /// Last position visited.
    fn last(&self) -> i32 {
        self.start + (self.num_iterations() as i32 - 1) * self.step
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Self::new(0, 1, 1)
    }
}

/// An N-dimensional rectangular iteration space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    dims: [Dimension; MAX_DIMS],
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, dim: usize, dimension: Dimension) {
        self.dims[dim] = dimension;
    }

    /// Change only the step of one dimension.
    pub fn set_dimension_step(&mut self, dim: usize, step: i32) {
        let d = self.dims[dim];
        self.dims[dim] = Dimension::new(d.start, d.end, step);
    }

    #[inline]
    pub fn dim(&self, dim: usize) -> &Dimension {
        &self.dims[dim]
    }

    pub fn x(&self) -> &Dimension {
        &self.dims[DIM_X]
    }

    pub fn y(&self) -> &Dimension {
        &self.dims[DIM_Y]
    }

    pub fn z(&self) -> &Dimension {
        &self.dims[DIM_Z]
    }

    pub fn num_iterations(&self, dim: usize) -> usize {
        self.dims[dim].num_iterations()
    }

    pub fn num_iterations_total(&self) -> usize {
        self.dims.iter().map(Dimension::num_iterations).product()
    }

    /// Iteration counts per dimension.
    pub fn shape(&self) -> [usize; MAX_DIMS] {
        let mut shape = [0; MAX_DIMS];
        for (s, d) in shape.iter_mut().zip(self.dims.iter()) {
            *s = d.num_iterations();
        }
        shape
    }

    /// Drop the first `n` dimensions, moving the rest down.
    pub fn shift_dimensions(&self, n: usize) -> Window {
        let mut shifted = Window::default();
        for d in n..MAX_DIMS {
            shifted.dims[d - n] = self.dims[d];
        }
        shifted
    }

    /// Absolute position of the point with iteration indices `coords`.
    pub fn position(&self, coords: &Coordinates) -> Coordinates {
        let mut pos = Coordinates::default();
        for d in 0..MAX_DIMS {
            let dim = &self.dims[d];
            pos[d] = dim.start + coords[d] * dim.step;
        }
        pos
    }

    /// Visit every point of the window, dimension 0 fastest.
    pub fn for_each<F: FnMut(&Coordinates)>(&self, mut f: F) {
        if self.num_iterations_total() == 0 {
            return;
        }
        let mut pos = Coordinates::default();
        for d in 0..MAX_DIMS {
            pos[d] = self.dims[d].start;
        }
        loop {
            f(&pos);
            let mut d = 0;
            loop {
                pos[d] += self.dims[d].step;
                if pos[d] < self.dims[d].end {
                    break;
                }
                pos[d] = self.dims[d].start;
                d += 1;
                if d == MAX_DIMS {
                    return;
                }
            }
        }
    }

    pub(crate) fn last(&self, dim: usize) -> i32 {
        self.dims[dim].last()
    }
}

/// A point in a window, either as absolute positions or as iteration indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct Coordinates {
    values: [i32; MAX_DIMS],
}

impl Coordinates {
    pub fn new(values: &[i32]) -> Self {
        let mut c = Self::default();
        c.values[..values.len()].copy_from_slice(values);
        c
    }

    pub fn x(&self) -> i32 {
        self.values[0]
    }

    pub fn y(&self) -> i32 {
        self.values[1]
    }

    pub fn z(&self) -> i32 {
        self.values[2]
    }

    pub fn w(&self) -> i32 {
        self.values[3]
    }

    /// Coordinates of linear index `index` in a space of the given shape.
    pub fn from_index(shape: &[usize; MAX_DIMS], mut index: usize) -> Self {
        let mut c = Self::default();
        for d in 0..MAX_DIMS - 1 {
            let extent = shape[d].max(1);
            c.values[d] = (index % extent) as i32;
            index /= extent;
        }
        // The outermost dimension keeps the carry, so one-past-the-end
        // indices stay representable.
        c.values[MAX_DIMS - 1] = index as i32;
        c
    }

    /// Linear index of these coordinates in a space of the given shape.
    pub fn to_index(&self, shape: &[usize; MAX_DIMS]) -> usize {
        let mut index = 0;
        for d in (0..MAX_DIMS).rev() {
            index = index * shape[d].max(1) + self.values[d] as usize;
        }
        index
    }
}

impl std::ops::Index<usize> for Coordinates {
    type Output = i32;

    fn index(&self, dim: usize) -> &i32 {
        &self.values[dim]
    }
}

impl std::ops::IndexMut<usize> for Coordinates {
    fn index_mut(&mut self, dim: usize) -> &mut i32 {
        &mut self.values[dim]
    }
}
