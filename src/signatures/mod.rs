//! Sparse k-mer signature representations.
//!
//! A signature is the set of tail indices observed for one genome, kept as
//! a strictly increasing integer sequence. Signatures are stored in the
//! smallest unsigned width that holds the index space of their k-mer spec,
//! so most public types here are tagged variants over the four widths
//! (see [`Dtype`]); operations dispatch on the tag once and run
//! monomorphized code underneath.

pub mod array;
pub mod file;
pub mod meta;

pub use array::{PackedSignatures, SignatureArray};
pub use file::{SignatureFile, SignatureFileError, SignatureIds};
pub use meta::{SignatureSetRecord, SignaturesMeta};

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// Errors from constructing or indexing signature containers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature values are not strictly increasing at position {0}")]
    NotSorted(usize),

    #[error("value {value} does not fit in coordinate type {dtype}")]
    ValueOverflow { value: u64, dtype: Dtype },

    #[error("index {index} out of range for {len} signatures")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("mask length {mask} does not match signature count {len}")]
    MaskLengthMismatch { mask: usize, len: usize },
}

/// Runtime descriptor of a signature element width.
///
/// The two-byte tags follow the NumPy convention used in the signature
/// file format: `u1`, `u2`, `u4`, `u8` name the width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    U8,
    U16,
    U32,
    U64,
}

impl Dtype {
    /// Element size in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::U16 => 2,
            Dtype::U32 => 4,
            Dtype::U64 => 8,
        }
    }

    /// Two-byte format tag, e.g. `b"u4"` for 32-bit elements.
    pub const fn tag(self) -> [u8; 2] {
        match self {
            Dtype::U8 => *b"u1",
            Dtype::U16 => *b"u2",
            Dtype::U32 => *b"u4",
            Dtype::U64 => *b"u8",
        }
    }

    /// Parses a two-byte format tag.
    pub fn from_tag(tag: [u8; 2]) -> Option<Dtype> {
        match &tag {
            b"u1" => Some(Dtype::U8),
            b"u2" => Some(Dtype::U16),
            b"u4" => Some(Dtype::U32),
            b"u8" => Some(Dtype::U64),
            _ => None,
        }
    }

    /// Smallest width holding every tail index for the given `k`.
    pub fn for_k(k: usize) -> Dtype {
        if k <= 4 {
            Dtype::U8
        } else if k <= 8 {
            Dtype::U16
        } else if k <= 16 {
            Dtype::U32
        } else {
            Dtype::U64
        }
    }

    /// Largest value representable in this width.
    #[inline]
    pub const fn max_value(self) -> u64 {
        match self {
            Dtype::U8 => u8::MAX as u64,
            Dtype::U16 => u16::MAX as u64,
            Dtype::U32 => u32::MAX as u64,
            Dtype::U64 => u64::MAX,
        }
    }

    /// Writes one value in this width, little-endian. The caller must have
    /// checked that the value fits (`value <= self.max_value()`).
    pub(crate) fn write_value<W: Write>(self, out: &mut W, value: u64) -> io::Result<()> {
        match self {
            Dtype::U8 => out.write_u8(value as u8),
            Dtype::U16 => out.write_u16::<LittleEndian>(value as u16),
            Dtype::U32 => out.write_u32::<LittleEndian>(value as u32),
            Dtype::U64 => out.write_u64::<LittleEndian>(value),
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = self.tag();
        write!(f, "{}{}", tag[0] as char, tag[1] as char)
    }
}

/// A fixed-width signature element.
///
/// Implemented for `u8`, `u16`, `u32` and `u64`; all comparisons and
/// conversions go through `u64` so mixed-width values compare exactly.
pub trait Coord: Copy + Ord + Send + Sync + std::fmt::Debug + 'static {
    const DTYPE: Dtype;
    const ZERO: Self;

    fn to_u64(self) -> u64;
    fn from_u64(value: u64) -> Option<Self>;

    /// Fills `buf` with little-endian values from `reader`.
    fn read_from<R: Read>(reader: &mut R, buf: &mut [Self]) -> io::Result<()>;

    /// Writes `values` little-endian to `writer`.
    fn write_to<W: Write>(writer: &mut W, values: &[Self]) -> io::Result<()>;
}

impl Coord for u8 {
    const DTYPE: Dtype = Dtype::U8;
    const ZERO: Self = 0;

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        u8::try_from(value).ok()
    }

    fn read_from<R: Read>(reader: &mut R, buf: &mut [Self]) -> io::Result<()> {
        reader.read_exact(buf)
    }

    fn write_to<W: Write>(writer: &mut W, values: &[Self]) -> io::Result<()> {
        writer.write_all(values)
    }
}

impl Coord for u16 {
    const DTYPE: Dtype = Dtype::U16;
    const ZERO: Self = 0;

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        u16::try_from(value).ok()
    }

    fn read_from<R: Read>(reader: &mut R, buf: &mut [Self]) -> io::Result<()> {
        reader.read_u16_into::<LittleEndian>(buf)
    }

    fn write_to<W: Write>(writer: &mut W, values: &[Self]) -> io::Result<()> {
        for &v in values {
            writer.write_u16::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

impl Coord for u32 {
    const DTYPE: Dtype = Dtype::U32;
    const ZERO: Self = 0;

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        u32::try_from(value).ok()
    }

    fn read_from<R: Read>(reader: &mut R, buf: &mut [Self]) -> io::Result<()> {
        reader.read_u32_into::<LittleEndian>(buf)
    }

    fn write_to<W: Write>(writer: &mut W, values: &[Self]) -> io::Result<()> {
        for &v in values {
            writer.write_u32::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

impl Coord for u64 {
    const DTYPE: Dtype = Dtype::U64;
    const ZERO: Self = 0;

    #[inline]
    fn to_u64(self) -> u64 {
        self
    }

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        Some(value)
    }

    fn read_from<R: Read>(reader: &mut R, buf: &mut [Self]) -> io::Result<()> {
        reader.read_u64_into::<LittleEndian>(buf)
    }

    fn write_to<W: Write>(writer: &mut W, values: &[Self]) -> io::Result<()> {
        for &v in values {
            writer.write_u64::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

/// Checks that a slice is strictly increasing; returns the offending index.
fn check_sorted<C: Coord>(values: &[C]) -> Result<(), SignatureError> {
    for (i, pair) in values.windows(2).enumerate() {
        if pair[0] >= pair[1] {
            return Err(SignatureError::NotSorted(i + 1));
        }
    }
    Ok(())
}

/// One owned k-mer signature: a strictly increasing sequence of indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl Signature {
    /// An empty signature of the given width.
    pub fn empty(dtype: Dtype) -> Signature {
        match dtype {
            Dtype::U8 => Signature::U8(Vec::new()),
            Dtype::U16 => Signature::U16(Vec::new()),
            Dtype::U32 => Signature::U32(Vec::new()),
            Dtype::U64 => Signature::U64(Vec::new()),
        }
    }

    /// Builds a signature from already-sorted, deduplicated indices,
    /// validating order and that every value fits the width.
    pub fn from_sorted(values: &[u64], dtype: Dtype) -> Result<Signature, SignatureError> {
        fn build<C: Coord>(values: &[u64]) -> Result<Vec<C>, SignatureError> {
            let mut out = Vec::with_capacity(values.len());
            for &v in values {
                out.push(C::from_u64(v).ok_or(SignatureError::ValueOverflow {
                    value: v,
                    dtype: C::DTYPE,
                })?);
            }
            check_sorted(&out)?;
            Ok(out)
        }

        Ok(match dtype {
            Dtype::U8 => Signature::U8(build(values)?),
            Dtype::U16 => Signature::U16(build(values)?),
            Dtype::U32 => Signature::U32(build(values)?),
            Dtype::U64 => Signature::U64(build(values)?),
        })
    }

    /// Builds a signature from values the caller guarantees to be sorted,
    /// deduplicated, and within range of `dtype`.
    pub(crate) fn from_sorted_unchecked(values: Vec<u64>, dtype: Dtype) -> Signature {
        debug_assert!(values.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(values.last().map_or(true, |&v| v <= dtype.max_value()));
        match dtype {
            Dtype::U8 => Signature::U8(values.into_iter().map(|v| v as u8).collect()),
            Dtype::U16 => Signature::U16(values.into_iter().map(|v| v as u16).collect()),
            Dtype::U32 => Signature::U32(values.into_iter().map(|v| v as u32).collect()),
            Dtype::U64 => Signature::U64(values),
        }
    }

    #[inline]
    pub fn dtype(&self) -> Dtype {
        match self {
            Signature::U8(_) => Dtype::U8,
            Signature::U16(_) => Dtype::U16,
            Signature::U32(_) => Dtype::U32,
            Signature::U64(_) => Dtype::U64,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrowed view of the signature values.
    #[inline]
    pub fn as_slice(&self) -> SignatureSlice<'_> {
        match self {
            Signature::U8(v) => SignatureSlice::U8(v),
            Signature::U16(v) => SignatureSlice::U16(v),
            Signature::U32(v) => SignatureSlice::U32(v),
            Signature::U64(v) => SignatureSlice::U64(v),
        }
    }

    /// Iterates values widened to `u64`.
    pub fn iter(&self) -> Coords<'_> {
        self.as_slice().iter()
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.as_slice().get(index)
    }

    /// All values widened to `u64`.
    pub fn to_vec(&self) -> Vec<u64> {
        self.iter().collect()
    }
}

/// Borrowed view of one signature, any width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureSlice<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
}

impl<'a> SignatureSlice<'a> {
    #[inline]
    pub fn dtype(&self) -> Dtype {
        match self {
            SignatureSlice::U8(_) => Dtype::U8,
            SignatureSlice::U16(_) => Dtype::U16,
            SignatureSlice::U32(_) => Dtype::U32,
            SignatureSlice::U64(_) => Dtype::U64,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            SignatureSlice::U8(v) => v.len(),
            SignatureSlice::U16(v) => v.len(),
            SignatureSlice::U32(v) => v.len(),
            SignatureSlice::U64(v) => v.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        match self {
            SignatureSlice::U8(v) => v.get(index).map(|&x| x as u64),
            SignatureSlice::U16(v) => v.get(index).map(|&x| x as u64),
            SignatureSlice::U32(v) => v.get(index).map(|&x| x as u64),
            SignatureSlice::U64(v) => v.get(index).copied(),
        }
    }

    /// Iterates values widened to `u64`.
    pub fn iter(&self) -> Coords<'a> {
        Coords {
            slice: *self,
            pos: 0,
        }
    }

    pub fn to_owned(&self) -> Signature {
        match self {
            SignatureSlice::U8(v) => Signature::U8(v.to_vec()),
            SignatureSlice::U16(v) => Signature::U16(v.to_vec()),
            SignatureSlice::U32(v) => Signature::U32(v.to_vec()),
            SignatureSlice::U64(v) => Signature::U64(v.to_vec()),
        }
    }

    /// Element-wise equality ignoring storage width.
    pub fn eq_values(&self, other: &SignatureSlice<'_>) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

/// Iterator over signature values widened to `u64`.
pub struct Coords<'a> {
    slice: SignatureSlice<'a>,
    pos: usize,
}

impl Iterator for Coords<'_> {
    type Item = u64;

    #[inline]
    fn next(&mut self) -> Option<u64> {
        let value = self.slice.get(self.pos)?;
        self.pos += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.slice.len() - self.pos;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for Coords<'_> {}
