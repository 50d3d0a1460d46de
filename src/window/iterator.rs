//! Row-aware iteration over a sub-range of a window.

use super::{Coordinates, DIM_X, DIM_Y, DIM_Z, Window};

/// Walks the points of `window` from `start` up to (excluding) `end`, in
/// row-major order, calling `f` on each absolute position.
///
/// `start` and `end` are iteration indices (window-step units), not
/// absolute positions. The range usually comes from splitting
/// `0..window.num_iterations_total()` between threads, so it can begin and
/// end in the middle of a row. The row-size callback given to
/// [`iterate_2d`](Self::iterate_2d) / [`iterate_3d`](Self::iterate_3d) is
/// told `(start_x, end_x)` of each contiguous run before any point of that
/// run is visited. Callers use it to pick a full-row or partial-row path.
pub struct WindowIterator<F: FnMut(&Coordinates)> {
    window: Window,
    position: Coordinates,
    // Last point to visit (inclusive), as an absolute position.
    end: Coordinates,
    empty: bool,
    f: F,
}

impl<F: FnMut(&Coordinates)> WindowIterator<F> {
    pub fn new(window: &Window, start: &Coordinates, end: &Coordinates, f: F) -> Self {
        let shape = window.shape();
        Self::from_linear(window, start.to_index(&shape), end.to_index(&shape), f)
    }

    /// Same as [`WindowIterator::new`] with the range given as linear indices.
    pub fn from_linear(window: &Window, start: usize, end: usize, f: F) -> Self {
        assert!(
            start <= end && end <= window.num_iterations_total(),
            "range {}..{} does not fit a window of {} iterations",
            start,
            end,
            window.num_iterations_total()
        );
        let shape = window.shape();
        let position = window.position(&Coordinates::from_index(&shape, start));
        let empty = start == end;
        let end = if empty {
            position
        } else {
            window.position(&Coordinates::from_index(&shape, end - 1))
        };
        Self {
            window: *window,
            position,
            end,
            empty,
            f,
        }
    }

    /// Iterate with a different step on `dim`; start and end are unchanged.
    pub fn set_step(&mut self, dim: usize, step: i32) {
        self.window.set_dimension_step(dim, step);
    }

    pub fn position(&self) -> Coordinates {
        self.position
    }

    pub fn x(&self) -> i32 {
        self.position.x()
    }

    pub fn y(&self) -> i32 {
        self.position.y()
    }

    /// Visit the range within a single depth slice.
    pub fn iterate_2d<M: FnMut(i32, i32)>(&mut self, mut on_new_row_size: M) {
        if self.empty {
            return;
        }
        debug_assert_eq!(
            self.position.z(),
            self.end.z(),
            "iterate_2d range spans several slices, use iterate_3d"
        );
        let (end_x, end_y) = (self.end.x(), self.end.y());
        self.iterate_2d_internal(&mut on_new_row_size, end_x, end_y);
        self.empty = true;
    }

    /// Visit the range across depth slices: every slice before the last one
    /// is finished to its final row, the last one stops at `end`.
    pub fn iterate_3d<M: FnMut(i32, i32)>(&mut self, mut on_new_row_size: M) {
        if self.empty {
            return;
        }
        let (last_x, last_y) = (self.window.last(DIM_X), self.window.last(DIM_Y));
        while self.position.z() < self.end.z() {
            self.iterate_2d_internal(&mut on_new_row_size, last_x, last_y);
            self.position[DIM_Z] += self.window.z().step();
            self.position[DIM_Y] = self.window.y().start();
            self.position[DIM_X] = self.window.x().start();
        }
        self.iterate_2d(on_new_row_size);
    }

    fn iterate_2d_internal<M: FnMut(i32, i32)>(
        &mut self,
        on_new_row_size: &mut M,
        end_x: i32,
        end_y: i32,
    ) {
        let wx = *self.window.x();
        let wy = *self.window.y();

        if self.position.y() == end_y {
            // Start and end share a row.
            self.iterate_over_dim0_notify(end_x, on_new_row_size);
            return;
        }

        if self.position.x() != wx.start() {
            // Finish the partial first row.
            let last_x = self.window.last(DIM_X);
            self.iterate_over_dim0_notify(last_x, on_new_row_size);
            self.position[DIM_Y] += wy.step();
        }

        let no_leftover = end_x == self.window.last(DIM_X);
        if no_leftover {
            // Every remaining row is full width.
            assert!(
                self.position.y() <= end_y,
                "window iterator has no full row left to process"
            );
            on_new_row_size(wx.start(), wx.end());
            self.iterate_over_dim1(end_y + wy.step());
        } else {
            if self.position.y() != end_y {
                on_new_row_size(wx.start(), wx.end());
                self.iterate_over_dim1(end_y);
            }
            // Partial last row.
            self.position[DIM_X] = wx.start();
            self.iterate_over_dim0_notify(end_x, on_new_row_size);
        }
    }

    fn iterate_over_dim1(&mut self, end: i32) {
        let (x_start, x_end) = (self.window.x().start(), self.window.x().end());
        let step = self.window.y().step();
        while self.position.y() < end {
            self.position[DIM_X] = x_start;
            self.iterate_over_dim0(x_end);
            self.position[DIM_Y] += step;
        }
    }

    // `last_x` is inclusive; the run reported to the callback ends one step
    // after it, clipped to the window.
    fn iterate_over_dim0_notify<M: FnMut(i32, i32)>(
        &mut self,
        last_x: i32,
        on_new_row_size: &mut M,
    ) {
        let wx = self.window.x();
        let run_end = (last_x + wx.step()).min(wx.end());
        on_new_row_size(self.position.x(), run_end);
        self.iterate_over_dim0(last_x + 1);
    }

    fn iterate_over_dim0(&mut self, end: i32) {
        assert!(
            (self.position.z(), self.position.y()) <= (self.end.z(), self.end.y()),
            "window iterator advanced past its end: at {:?}, end {:?}",
            self.position,
            self.end
        );
        let step = self.window.x().step();
        while self.position.x() < end {
            (self.f)(&self.position);
            self.position[DIM_X] += step;
        }
    }
}
