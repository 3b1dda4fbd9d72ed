// Layout: shape + strides + offset over a flat storage buffer
//
// Every engine tensor is a Layout laid over a shared byte buffer. Views
// (select, narrow, unsqueeze, as_strided) only compute a new Layout, which is
// why they share storage with their source:
//
//   narrow(dim=1, start=2, len=3) on [4, 6] strides [6, 1]
//     -> shape [4, 3], strides [6, 1], offset += 2 * 1
//
//   select(dim=0, index=1) on [4, 6] strides [6, 1]
//     -> shape [6], strides [1], offset += 1 * 6
//
// Offsets and strides are counted in elements, never in bytes. Strides are
// signed so that `as_strided` can express any view the native engine can.

/// Normalize a possibly negative dimension against `rank`.
pub(crate) fn wrap_dim(dim: i64, rank: usize) -> Result<usize, String> {
    let r = rank as i64;
    let d = if dim < 0 { dim + r } else { dim };
    if d < 0 || d >= r {
        return Err(format!(
            "dimension out of range (expected to be in range of [{}, {}], but got {dim})",
            -r,
            r - 1
        ));
    }
    Ok(d as usize)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    shape: Vec<i64>,
    strides: Vec<i64>,
    offset: i64,
}

impl Layout {
    /// Row-major layout for `shape`, starting at element 0.
    pub(crate) fn contiguous(shape: &[i64]) -> Self {
        let mut strides = vec![0i64; shape.len()];
        let mut acc = 1i64;
        for i in (0..shape.len()).rev() {
            strides[i] = acc;
            acc *= shape[i].max(1);
        }
        Layout {
            shape: shape.to_vec(),
            strides,
            offset: 0,
        }
    }

    pub(crate) fn new(shape: Vec<i64>, strides: Vec<i64>, offset: i64) -> Self {
        Layout {
            shape,
            strides,
            offset,
        }
    }

    pub(crate) fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub(crate) fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub(crate) fn offset(&self) -> i64 {
        self.offset
    }

    pub(crate) fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of logical elements. A rank-0 layout holds one element.
    pub(crate) fn numel(&self) -> usize {
        self.shape.iter().product::<i64>().max(0) as usize
    }

    pub(crate) fn is_contiguous(&self) -> bool {
        let expected = Layout::contiguous(&self.shape);
        self.shape
            .iter()
            .zip(self.strides.iter().zip(expected.strides.iter()))
            .all(|(&d, (&s, &e))| d <= 1 || s == e)
    }

    /// Largest element offset touched by this layout, if it touches any.
    pub(crate) fn max_offset(&self) -> Option<i64> {
        if self.numel() == 0 {
            return None;
        }
        let mut hi = self.offset;
        for (&d, &s) in self.shape.iter().zip(self.strides.iter()) {
            if s > 0 {
                hi += (d - 1) * s;
            }
        }
        Some(hi)
    }

    /// Smallest element offset touched by this layout.
    pub(crate) fn min_offset(&self) -> i64 {
        let mut lo = self.offset;
        for (&d, &s) in self.shape.iter().zip(self.strides.iter()) {
            if s < 0 && d > 0 {
                lo += (d - 1) * s;
            }
        }
        lo
    }

    /// Pick `index` along `dim`, dropping that dimension.
    pub(crate) fn select(&self, dim: i64, index: i64) -> Result<Layout, String> {
        if self.rank() == 0 {
            return Err("select() cannot be applied to a 0-dim tensor".to_string());
        }
        let d = wrap_dim(dim, self.rank())?;
        let size = self.shape[d];
        let idx = if index < 0 { index + size } else { index };
        if idx < 0 || idx >= size {
            return Err(format!(
                "select(): index {index} out of range for tensor of size {size} at dimension {d}"
            ));
        }
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.remove(d);
        let stride = strides.remove(d);
        Ok(Layout::new(shape, strides, self.offset + idx * stride))
    }

    /// Keep `length` entries of `dim` starting at `start`.
    pub(crate) fn narrow(&self, dim: i64, start: i64, length: i64) -> Result<Layout, String> {
        if self.rank() == 0 {
            return Err("narrow() cannot be applied to a 0-dim tensor".to_string());
        }
        let d = wrap_dim(dim, self.rank())?;
        let size = self.shape[d];
        let start = if start < 0 { start + size } else { start };
        if start < 0 || length < 0 || start + length > size {
            return Err(format!(
                "start ({start}) + length ({length}) exceeds dimension size ({size})"
            ));
        }
        let mut shape = self.shape.clone();
        shape[d] = length;
        Ok(Layout::new(
            shape,
            self.strides.clone(),
            self.offset + start * self.strides[d],
        ))
    }

    /// Insert a length-1 dimension at `dim` (which may equal the rank).
    pub(crate) fn unsqueeze(&self, dim: i64) -> Result<Layout, String> {
        let d = wrap_dim(dim, self.rank() + 1)?;
        let new_stride = if d < self.rank() {
            self.shape[d].max(1) * self.strides[d]
        } else {
            1
        };
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.insert(d, 1);
        strides.insert(d, new_stride);
        Ok(Layout::new(shape, strides, self.offset))
    }

    /// Flat element offsets of every logical element, in row-major order.
    pub(crate) fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

/// Walks the logical elements of a layout and yields their storage offsets.
pub(crate) struct StridedIter {
    current: Vec<i64>,
    dims: Vec<i64>,
    strides: Vec<i64>,
    offset: i64,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.shape.clone(),
            strides: layout.strides.clone(),
            offset: layout.offset,
            remaining: layout.numel(),
            started: false,
        }
    }

    fn flat_index(&self) -> i64 {
        self.current
            .iter()
            .zip(self.strides.iter())
            .fold(self.offset, |acc, (&i, &s)| acc + i * s)
    }

    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.flat_index() as usize)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_indices() {
        let layout = Layout::contiguous(&[2, 3]);
        assert!(layout.is_contiguous());
        assert_eq!(layout.strides(), &[3, 1]);
        let indices: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_narrow_keeps_strides() {
        let layout = Layout::contiguous(&[4, 6]);
        let narrowed = layout.narrow(1, 2, 3).unwrap();
        assert_eq!(narrowed.shape(), &[4, 3]);
        assert_eq!(narrowed.offset(), 2);
        assert_eq!(narrowed.strides(), &[6, 1]);
        assert!(!narrowed.is_contiguous());
        assert!(layout.narrow(1, 5, 3).is_err());
    }

    #[test]
    fn test_select_negative_index() {
        let layout = Layout::contiguous(&[4, 6]);
        let row = layout.select(0, -1).unwrap();
        assert_eq!(row.shape(), &[6]);
        assert_eq!(row.offset(), 18);
        assert!(layout.select(0, 4).is_err());
    }

    #[test]
    fn test_unsqueeze_positions() {
        let layout = Layout::contiguous(&[2, 3]);
        assert_eq!(layout.unsqueeze(0).unwrap().shape(), &[1, 2, 3]);
        assert_eq!(layout.unsqueeze(1).unwrap().shape(), &[2, 1, 3]);
        let last = layout.unsqueeze(2).unwrap();
        assert_eq!(last.shape(), &[2, 3, 1]);
        let indices: Vec<usize> = last.strided_indices().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(layout.unsqueeze(3).is_err());
    }

    #[test]
    fn test_scalar_layout() {
        let layout = Layout::contiguous(&[]);
        assert_eq!(layout.numel(), 1);
        assert_eq!(layout.strided_indices().collect::<Vec<_>>(), vec![0]);
    }
}
