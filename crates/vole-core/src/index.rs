use std::ops::{
    Bound, Range, RangeBounds, RangeFrom, RangeFull, RangeInclusive, RangeTo, RangeToInclusive,
};

use crate::error::{Error, Result};
use crate::tensor::Tensor;

// Indexing algebra
//
// An index program is a sequence of atoms applied left to right to a tensor,
// with a cursor `d` naming the dimension the next atom works on:
//
//   atom              engine call                        cursor after
//   NewAxis           unsqueeze(C, d)                    d + 1
//   Select(i)         select(C, d, i)                    d
//   Narrow(s, e)      narrow(C, d, s, e - s)             d + 1
//   IndexSelect(ix)   index_select(C, d, ix on C's dev)  d + 1
//
// Select removes dimension d, so the cursor already points at what used to be
// d + 1 and stays put. The walk starts from a shallow clone of the input, so
// the result shares storage with the input everywhere except along gather
// axes, where the engine copies.
//
// Before anything runs, the program is checked: at most `rank` atoms other
// than NewAxis, and every gather index is a 1-D tensor of kind i8, i16, i32
// or i64. A failing check produces no tensor at all.
//
// Programs are written as tuples:
//
//   t.i((.., 1..3, NewAxis))?    // narrow dim 1, then append an axis
//   t.i((0, &idx))?              // select row 0, gather columns by idx

/// Marker for inserting a length-1 dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAxis;

/// One atom of an index program.
#[derive(Debug)]
pub enum TensorIndexer {
    /// Pick one index, removing the dimension.
    Select(i64),
    /// Keep a half-open range of the dimension. Negative bounds count from
    /// the end.
    Narrow(Bound<i64>, Bound<i64>),
    /// Gather with a 1-D integer tensor.
    IndexSelect(Tensor),
    /// Insert a length-1 dimension before the cursor.
    InsertNewAxis,
}

impl From<NewAxis> for TensorIndexer {
    fn from(_: NewAxis) -> Self {
        TensorIndexer::InsertNewAxis
    }
}

impl From<i64> for TensorIndexer {
    fn from(index: i64) -> Self {
        TensorIndexer::Select(index)
    }
}

impl From<&Tensor> for TensorIndexer {
    fn from(index: &Tensor) -> Self {
        // A released handle fails again, with its name, when the program runs.
        let index = index
            .shallow_clone()
            .unwrap_or_else(|_| Tensor::released(index.name()));
        TensorIndexer::IndexSelect(index)
    }
}

impl From<Tensor> for TensorIndexer {
    fn from(index: Tensor) -> Self {
        TensorIndexer::IndexSelect(index)
    }
}

macro_rules! impl_from_range {
    ($range_type:ty) => {
        impl From<$range_type> for TensorIndexer {
            fn from(range: $range_type) -> Self {
                let start = match range.start_bound() {
                    Bound::Included(&i) => Bound::Included(i),
                    Bound::Excluded(&i) => Bound::Excluded(i),
                    Bound::Unbounded => Bound::Unbounded,
                };
                let end = match range.end_bound() {
                    Bound::Included(&i) => Bound::Included(i),
                    Bound::Excluded(&i) => Bound::Excluded(i),
                    Bound::Unbounded => Bound::Unbounded,
                };
                TensorIndexer::Narrow(start, end)
            }
        }
    };
}

impl_from_range!(Range<i64>);
impl_from_range!(RangeFrom<i64>);
impl_from_range!(RangeFull);
impl_from_range!(RangeInclusive<i64>);
impl_from_range!(RangeTo<i64>);
impl_from_range!(RangeToInclusive<i64>);

/// Resolve narrow bounds against a dimension of `size` into `(start, len)`.
fn resolve_range(start: &Bound<i64>, end: &Bound<i64>, size: i64) -> (i64, i64) {
    let wrap = |i: i64| if i < 0 { i + size } else { i };
    let start = match *start {
        Bound::Included(i) => wrap(i),
        Bound::Excluded(i) => wrap(i) + 1,
        Bound::Unbounded => 0,
    };
    let end = match *end {
        Bound::Included(i) => wrap(i) + 1,
        Bound::Excluded(i) => wrap(i),
        Bound::Unbounded => size,
    };
    (start, end - start)
}

impl Tensor {
    /// Run an index program given as a slice of atoms.
    pub fn indexer(&self, index_spec: &[TensorIndexer]) -> Result<Tensor> {
        let rank = self.dim()?;
        let atoms = index_spec
            .iter()
            .filter(|s| !matches!(s, TensorIndexer::InsertNewAxis))
            .count();
        if atoms > rank {
            return Err(Error::IndexArity { atoms, rank });
        }
        for spec in index_spec {
            if let TensorIndexer::IndexSelect(index) = spec {
                let dim = index.dim()?;
                if dim != 1 {
                    return Err(Error::IndexType(format!(
                        "expected a 1-D index tensor, got {dim} dimensions"
                    )));
                }
                let kind = index.kind()?;
                if !kind.is_index() {
                    return Err(Error::IndexType(format!(
                        "expected an index tensor of kind i8, i16, i32 or i64, got {kind}"
                    )));
                }
            }
        }

        let mut curr = self.shallow_clone()?;
        let mut d: i64 = 0;
        for spec in index_spec {
            let (next, next_d) = match spec {
                TensorIndexer::InsertNewAxis => (curr.unsqueeze(d)?, d + 1),
                TensorIndexer::Select(i) => (curr.select(d, *i)?, d),
                TensorIndexer::Narrow(start, end) => {
                    let size = curr.size()?[d as usize];
                    let (start, len) = resolve_range(start, end, size);
                    (curr.narrow(d, start, len)?, d + 1)
                }
                TensorIndexer::IndexSelect(index) => {
                    let index = index.to_device(curr.device()?)?;
                    (curr.index_select(d, &index)?, d + 1)
                }
            };
            curr = next;
            d = next_d;
        }
        Ok(curr)
    }
}

/// Indexing with a single atom or a tuple of atoms.
pub trait IndexOp<T> {
    fn i(&self, index: T) -> Result<Tensor>;
}

impl IndexOp<&[TensorIndexer]> for Tensor {
    fn i(&self, index: &[TensorIndexer]) -> Result<Tensor> {
        self.indexer(index)
    }
}

impl IndexOp<Vec<TensorIndexer>> for Tensor {
    fn i(&self, index: Vec<TensorIndexer>) -> Result<Tensor> {
        self.indexer(&index)
    }
}

macro_rules! index_op_single {
    ($t:ty) => {
        impl IndexOp<$t> for Tensor {
            fn i(&self, index: $t) -> Result<Tensor> {
                self.indexer(&[index.into()])
            }
        }
    };
}

index_op_single!(i64);
index_op_single!(NewAxis);
index_op_single!(&Tensor);
index_op_single!(Range<i64>);
index_op_single!(RangeFrom<i64>);
index_op_single!(RangeFull);
index_op_single!(RangeInclusive<i64>);
index_op_single!(RangeTo<i64>);
index_op_single!(RangeToInclusive<i64>);

macro_rules! index_op_tuple {
    ($($name:ident),+) => {
        #[allow(non_snake_case)]
        impl<$($name),+> IndexOp<($($name,)+)> for Tensor
        where
            $($name: Into<TensorIndexer>,)+
        {
            fn i(&self, index: ($($name,)+)) -> Result<Tensor> {
                let ($($name,)+) = index;
                self.indexer(&[$($name.into(),)+])
            }
        }
    };
}

index_op_tuple!(A);
index_op_tuple!(A, B);
index_op_tuple!(A, B, C);
index_op_tuple!(A, B, C, D);
index_op_tuple!(A, B, C, D, E);
index_op_tuple!(A, B, C, D, E, F);
index_op_tuple!(A, B, C, D, E, F, G);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, Kind};

    fn grid() -> Tensor {
        Tensor::arange(0.0, 6.0, 1.0, (Kind::Float, Device::Cpu))
            .unwrap()
            .as_strided(&[2, 3], &[3, 1], 0)
            .unwrap()
    }

    #[test]
    fn test_new_axis_bookkeeping() {
        let t = grid();
        assert_eq!(t.i(NewAxis).unwrap().size().unwrap(), vec![1, 2, 3]);
        assert_eq!(t.i((0..2, NewAxis)).unwrap().size().unwrap(), vec![2, 1, 3]);
        assert_eq!(
            t.i((0..2, 0..3, NewAxis)).unwrap().size().unwrap(),
            vec![2, 3, 1]
        );
    }

    #[test]
    fn test_select_keeps_cursor() {
        let t = grid();
        let r = t.i((1, 1..)).unwrap();
        assert_eq!(r.size().unwrap(), vec![2]);
        assert_eq!(r.to_vec::<f32>().unwrap(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_negative_bounds() {
        let t = grid();
        let r = t.i((.., -2..)).unwrap();
        assert_eq!(r.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 4.0, 5.0]);
        let r = t.i((-1, ..=1)).unwrap();
        assert_eq!(r.to_vec::<f32>().unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_views_share_storage() {
        let t = grid();
        let r = t.i((NewAxis, 1, 0..2)).unwrap();
        assert_eq!(r.size().unwrap(), vec![1, 2]);
        assert_eq!(r.storage_ptr().unwrap(), t.storage_ptr().unwrap());
    }

    #[test]
    fn test_gather_copies() {
        let t = grid();
        let idx = Tensor::from_slice(&[2i32, 0]).unwrap();
        let r = t.i((.., &idx)).unwrap();
        assert_eq!(r.size().unwrap(), vec![2, 2]);
        assert_eq!(r.to_vec::<f32>().unwrap(), vec![2.0, 0.0, 5.0, 3.0]);
        assert_ne!(r.storage_ptr().unwrap(), t.storage_ptr().unwrap());
    }

    #[test]
    fn test_too_many_atoms() {
        let t = grid();
        let r = t.i((0, 0, 0));
        assert!(matches!(r, Err(Error::IndexArity { atoms: 3, rank: 2 })));
        assert!(t.i((0, NewAxis, 0, NewAxis)).is_ok());
    }

    #[test]
    fn test_bad_gather_index() {
        let t = grid();
        let float_idx = Tensor::from_slice(&[0.0f32]).unwrap();
        assert!(matches!(t.i(&float_idx), Err(Error::IndexType(_))));
        let matrix_idx = Tensor::zeros(&[1, 1], (Kind::Int64, Device::Cpu)).unwrap();
        assert!(matches!(t.i(&matrix_idx), Err(Error::IndexType(_))));
    }

    #[test]
    fn test_slice_of_atoms() {
        let t = grid();
        let spec = vec![TensorIndexer::Select(0), TensorIndexer::InsertNewAxis];
        // Select leaves the cursor at 0, so the new axis lands in front.
        assert_eq!(t.i(spec).unwrap().size().unwrap(), vec![1, 3]);
    }
}
