//! Packed column store for many signatures.
//!
//! All signatures of one collection share a single contiguous `values`
//! buffer; a `bounds` array of length `n + 1` delimits the slice belonging
//! to each signature. Random access hands out borrows into the shared
//! buffer rather than copies.

use crate::signatures::{Coord, Dtype, Signature, SignatureError, SignatureSlice};

/// The generic backing store: shared value buffer plus slice bounds.
///
/// Invariants: `bounds[0] == 0`, `bounds` is non-decreasing, and
/// `bounds[n] == values.len()`. Each delimited slice is strictly
/// increasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedSignatures<C: Coord> {
    values: Vec<C>,
    bounds: Vec<usize>,
}

impl<C: Coord> PackedSignatures<C> {
    /// An array of `lengths.len()` signatures with known sizes and
    /// zero-filled values, to be filled slice by slice during loading.
    pub fn with_lengths(lengths: &[usize]) -> Self {
        let mut bounds = Vec::with_capacity(lengths.len() + 1);
        let mut total = 0usize;
        bounds.push(0);
        for &len in lengths {
            total += len;
            bounds.push(total);
        }
        PackedSignatures {
            values: vec![C::ZERO; total],
            bounds,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn total_elems(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    #[inline]
    pub fn values(&self) -> &[C] {
        &self.values
    }

    /// Element count of signature `i`. Panics if out of range.
    #[inline]
    pub fn size_of(&self, index: usize) -> usize {
        self.bounds[index + 1] - self.bounds[index]
    }

    /// Borrow of signature `i`. Panics if out of range; bounds were
    /// validated at construction.
    #[inline]
    pub fn slice(&self, index: usize) -> &[C] {
        &self.values[self.bounds[index]..self.bounds[index + 1]]
    }

    pub fn get(&self, index: usize) -> Option<&[C]> {
        if index < self.len() {
            Some(self.slice(index))
        } else {
            None
        }
    }

    /// Mutable access to the value range of signature `i`, for fill-in
    /// during file loads.
    pub(crate) fn slice_mut(&mut self, index: usize) -> &mut [C] {
        let (a, b) = (self.bounds[index], self.bounds[index + 1]);
        &mut self.values[a..b]
    }

    /// Mutable access to the values spanning signatures `[from, to)`.
    pub(crate) fn range_mut(&mut self, from: usize, to: usize) -> &mut [C] {
        let (a, b) = (self.bounds[from], self.bounds[to]);
        &mut self.values[a..b]
    }

    fn subset(&self, indices: &[usize]) -> Result<Self, SignatureError> {
        let len = self.len();
        let mut values = Vec::new();
        let mut bounds = Vec::with_capacity(indices.len() + 1);
        bounds.push(0);
        for &i in indices {
            if i >= len {
                return Err(SignatureError::IndexOutOfRange { index: i, len });
            }
            values.extend_from_slice(self.slice(i));
            bounds.push(values.len());
        }
        Ok(PackedSignatures { values, bounds })
    }

    fn filter(&self, mask: &[bool]) -> Result<Self, SignatureError> {
        if mask.len() != self.len() {
            return Err(SignatureError::MaskLengthMismatch {
                mask: mask.len(),
                len: self.len(),
            });
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        self.subset(&indices)
    }
}

/// A column store of signatures, tagged by element width.
///
/// Logically immutable once constructed; the only mutation path is the
/// crate-internal fill used while loading from a signature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureArray {
    U8(PackedSignatures<u8>),
    U16(PackedSignatures<u16>),
    U32(PackedSignatures<u32>),
    U64(PackedSignatures<u64>),
}

macro_rules! each_variant {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            SignatureArray::U8($inner) => $body,
            SignatureArray::U16($inner) => $body,
            SignatureArray::U32($inner) => $body,
            SignatureArray::U64($inner) => $body,
        }
    };
}

impl SignatureArray {
    /// An empty array of the given width.
    pub fn empty(dtype: Dtype) -> SignatureArray {
        SignatureArray::with_lengths(&[], dtype)
    }

    /// Zero-filled array with the given signature lengths, for fill-in
    /// during loading.
    pub fn with_lengths(lengths: &[usize], dtype: Dtype) -> SignatureArray {
        match dtype {
            Dtype::U8 => SignatureArray::U8(PackedSignatures::with_lengths(lengths)),
            Dtype::U16 => SignatureArray::U16(PackedSignatures::with_lengths(lengths)),
            Dtype::U32 => SignatureArray::U32(PackedSignatures::with_lengths(lengths)),
            Dtype::U64 => SignatureArray::U64(PackedSignatures::with_lengths(lengths)),
        }
    }

    /// Packs a sequence of signatures into one array.
    ///
    /// The element width is the widest among the inputs (32-bit for an
    /// empty input, matching the historical default). Construction is
    /// all-or-nothing.
    pub fn from_signatures(signatures: &[Signature]) -> Result<SignatureArray, SignatureError> {
        let dtype = signatures
            .iter()
            .map(|s| s.dtype())
            .max_by_key(|d| d.size())
            .unwrap_or(Dtype::U32);

        fn build<C: Coord>(signatures: &[Signature]) -> Result<PackedSignatures<C>, SignatureError> {
            let total: usize = signatures.iter().map(|s| s.len()).sum();
            let mut values = Vec::with_capacity(total);
            let mut bounds = Vec::with_capacity(signatures.len() + 1);
            bounds.push(0);
            for sig in signatures {
                for v in sig.iter() {
                    values.push(C::from_u64(v).ok_or(SignatureError::ValueOverflow {
                        value: v,
                        dtype: C::DTYPE,
                    })?);
                }
                bounds.push(values.len());
            }
            Ok(PackedSignatures { values, bounds })
        }

        Ok(match dtype {
            Dtype::U8 => SignatureArray::U8(build(signatures)?),
            Dtype::U16 => SignatureArray::U16(build(signatures)?),
            Dtype::U32 => SignatureArray::U32(build(signatures)?),
            Dtype::U64 => SignatureArray::U64(build(signatures)?),
        })
    }

    #[inline]
    pub fn dtype(&self) -> Dtype {
        match self {
            SignatureArray::U8(_) => Dtype::U8,
            SignatureArray::U16(_) => Dtype::U16,
            SignatureArray::U32(_) => Dtype::U32,
            SignatureArray::U64(_) => Dtype::U64,
        }
    }

    /// Number of signatures.
    #[inline]
    pub fn len(&self) -> usize {
        each_variant!(self, p => p.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total element count across all signatures.
    #[inline]
    pub fn total_elems(&self) -> usize {
        each_variant!(self, p => p.total_elems())
    }

    /// Element count of signature `index`.
    pub fn size_of(&self, index: usize) -> Option<usize> {
        if index < self.len() {
            Some(each_variant!(self, p => p.size_of(index)))
        } else {
            None
        }
    }

    /// Per-signature element counts.
    pub fn lengths(&self) -> Vec<usize> {
        (0..self.len())
            .map(|i| each_variant!(self, p => p.size_of(i)))
            .collect()
    }

    /// Borrowed view of signature `index`.
    pub fn get(&self, index: usize) -> Option<SignatureSlice<'_>> {
        match self {
            SignatureArray::U8(p) => p.get(index).map(SignatureSlice::U8),
            SignatureArray::U16(p) => p.get(index).map(SignatureSlice::U16),
            SignatureArray::U32(p) => p.get(index).map(SignatureSlice::U32),
            SignatureArray::U64(p) => p.get(index).map(SignatureSlice::U64),
        }
    }

    /// New array holding the signatures at `indices`, in that order.
    /// Repeats are allowed; an out-of-range index is an error.
    pub fn subset(&self, indices: &[usize]) -> Result<SignatureArray, SignatureError> {
        Ok(match self {
            SignatureArray::U8(p) => SignatureArray::U8(p.subset(indices)?),
            SignatureArray::U16(p) => SignatureArray::U16(p.subset(indices)?),
            SignatureArray::U32(p) => SignatureArray::U32(p.subset(indices)?),
            SignatureArray::U64(p) => SignatureArray::U64(p.subset(indices)?),
        })
    }

    /// New array keeping signatures where `mask` is true, in original
    /// order. The mask length must match the signature count.
    pub fn filter(&self, mask: &[bool]) -> Result<SignatureArray, SignatureError> {
        Ok(match self {
            SignatureArray::U8(p) => SignatureArray::U8(p.filter(mask)?),
            SignatureArray::U16(p) => SignatureArray::U16(p.filter(mask)?),
            SignatureArray::U32(p) => SignatureArray::U32(p.filter(mask)?),
            SignatureArray::U64(p) => SignatureArray::U64(p.filter(mask)?),
        })
    }

    /// Iterates over signature views in order.
    pub fn iter(&self) -> impl Iterator<Item = SignatureSlice<'_>> {
        (0..self.len()).map(move |i| {
            // In-range by construction of the iterator.
            match self.get(i) {
                Some(slice) => slice,
                None => unreachable!("index {i} within array length"),
            }
        })
    }
}
