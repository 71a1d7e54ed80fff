//! Aligned scalar storage and non-owning views over it.
//!
//! Every layer allocates its [`Buffer`]s once at `initialize` and hands out
//! [`Map`]s to its neighbours. A `Map` borrows the producer's storage, so the
//! consumer reads the interface between two layers without copying it and the
//! borrow checker rules out a second writer.

use crate::error::{NetError, NetResult};
use crate::shape::Dims;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

const LANE_WIDTH: usize = 8;

/// Eight scalars on a 32-byte boundary.
#[derive(Clone, Copy, Default)]
#[repr(C, align(32))]
struct Lane([f32; LANE_WIDTH]);

/// Owned block of `f32` storage whose first element is 32-byte aligned.
///
/// The allocation is rounded up to whole lanes; only the first `len` scalars
/// are visible and the padding stays zero.
#[derive(Clone, Default)]
pub struct Buffer {
    lanes: Vec<Lane>,
    len: usize,
}

impl Buffer {
    /// Allocates `len` zeroed scalars.
    pub fn zeros(len: usize) -> Self {
        let lane_count = (len + LANE_WIDTH - 1) / LANE_WIDTH;
        Self {
            lanes: vec![Lane::default(); lane_count],
            len,
        }
    }

    pub fn from_slice(data: &[f32]) -> Self {
        let mut buffer = Self::zeros(data.len());
        buffer.as_mut_slice().copy_from_slice(data);
        buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: `Lane` is `repr(C)` around `[f32; 8]` with size 32 and
        // alignment 32, so the lanes form one contiguous run of f32 values
        // without padding, and `len <= lanes.len() * 8`.
        unsafe { std::slice::from_raw_parts(self.lanes.as_ptr() as *const f32, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        // SAFETY: see `as_slice`; the `&mut self` borrow makes this the only view.
        unsafe { std::slice::from_raw_parts_mut(self.lanes.as_mut_ptr() as *mut f32, self.len) }
    }

    /// Sets every scalar to zero without reallocating.
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0.0);
    }

    /// Overwrites the contents with `data`, which must have exactly `len` scalars.
    pub fn copy_from(&mut self, data: &[f32], context: &str) -> NetResult<()> {
        if data.len() != self.len {
            return Err(NetError::shape_mismatch(context, self.len, data.len()));
        }
        self.as_mut_slice().copy_from_slice(data);
        Ok(())
    }

    /// Borrows the storage as a `dims`-shaped view.
    pub fn map(&self, dims: Dims, ordering: DataOrdering) -> NetResult<Map<'_>> {
        Map::new(self.as_slice(), dims, ordering)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Memory layout of a `height × width × depth` volume.
///
/// Depth is always the innermost axis; the ordering decides whether rows or
/// columns of the spatial plane are contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrdering {
    #[default]
    RowMajor,
    ColMajor,
}

impl DataOrdering {
    /// Flat index of element `(row, col, channel)`.
    #[inline]
    pub fn offset(self, dims: Dims, row: usize, col: usize, channel: usize) -> usize {
        match self {
            DataOrdering::RowMajor => (row * dims.width + col) * dims.depth + channel,
            DataOrdering::ColMajor => (col * dims.height + row) * dims.depth + channel,
        }
    }
}

/// Non-owning, reshaped view into a layer's buffer.
#[derive(Debug, Clone, Copy)]
pub struct Map<'a> {
    data: &'a [f32],
    dims: Dims,
    ordering: DataOrdering,
}

impl<'a> Map<'a> {
    /// Wraps `data`, checking that it holds exactly `dims.size()` scalars.
    pub fn new(data: &'a [f32], dims: Dims, ordering: DataOrdering) -> NetResult<Self> {
        if data.len() != dims.size() {
            return Err(NetError::shape_mismatch("map view", dims, data.len()));
        }
        Ok(Self {
            data,
            dims,
            ordering,
        })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn ordering(&self) -> DataOrdering {
        self.ordering
    }

    pub fn as_slice(&self) -> &'a [f32] {
        self.data
    }

    /// Element at `(row, col, channel)` under this view's ordering.
    pub fn at(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.data[self.ordering.offset(self.dims, row, col, channel)]
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.to_vec()
    }
}

impl Deref for Map<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        self.data
    }
}
