//! Binary container for signature sets.
//!
//! The format is self-describing and random-access friendly: a fixed
//! 82-byte header carries a magic number, format version, signature count,
//! element dtype, and a table of `(begin, end)` byte offsets for the four
//! optional/required sections (lengths, metadata, IDs, data). All integers
//! are little-endian; the stored `end` offset points at the *last* byte of
//! its section, and `begin == 0` marks an absent section.
//!
//! Layout:
//!
//! | offset | size | field                                     |
//! |--------|------|-------------------------------------------|
//! | 0      | 4    | magic `4D 53 46 FF`                       |
//! | 4      | 4    | version, ASCII `1.00`                     |
//! | 8      | 8    | signature count, `i8`                     |
//! | 16     | 2    | element dtype tag, e.g. `u4`              |
//! | 18     | 64   | offsets: 4 × `(i8, i8)`                   |
//!
//! The lengths section holds one `i4` element count per signature; the
//! metadata section a format tag byte (`j` = JSON) plus payload; the IDs
//! section a tag byte (`s` = NUL-terminated strings, `i` = dtype tag plus
//! packed integers); the data section the concatenated signature values
//! in the header dtype.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use thiserror::Error;

use crate::signatures::{
    Coord, Dtype, PackedSignatures, Signature, SignatureArray, SignatureError,
};

/// Magic number at the start of every signature file.
pub const MAGIC: [u8; 4] = [0x4D, 0x53, 0x46, 0xFF];

/// Current format version, as four ASCII bytes.
pub const VERSION: [u8; 4] = *b"1.00";

/// Conventional file extension for signature files.
pub const DEFAULT_EXT: &str = "sigs";

const HEADER_LEN: u64 = 82;
const OFFSETS_POS: u64 = 18;

/// Errors from reading or writing signature files.
#[derive(Error, Debug)]
pub enum SignatureFileError {
    #[error("not a signature file (bad magic number)")]
    BadMagic,

    #[error("unsupported signature file version {0:?}")]
    UnsupportedVersion(String),

    #[error("unknown signature dtype tag {0:?}")]
    UnknownDtype(String),

    #[error("unknown metadata format tag {0:#04x}")]
    UnknownMetadataFormat(u8),

    #[error("unknown ID format tag {0:#04x}")]
    UnknownIdFormat(u8),

    #[error("malformed ID section")]
    MalformedIds,

    #[error("number of IDs ({ids}) does not match number of signatures ({count})")]
    IdCountMismatch { ids: usize, count: usize },

    #[error("negative signature length in lengths section")]
    NegativeLength,

    #[error("signature index {index} out of range ({count} signatures)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("signature data: {0}")]
    Signature(#[from] SignatureError),

    #[error("metadata is not valid JSON: {0}")]
    MetadataJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Byte range of one file section; `end` is inclusive as stored on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Section {
    begin: i64,
    end: i64,
}

impl Section {
    fn present(&self) -> bool {
        self.begin > 0
    }

    /// Section length in bytes.
    fn byte_len(&self) -> u64 {
        (self.end - self.begin + 1) as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    count: usize,
    dtype: Dtype,
    lengths: Section,
    metadata: Section,
    ids: Section,
    data: Section,
}

fn read_section<R: Read>(reader: &mut R) -> io::Result<Section> {
    let begin = reader.read_i64::<LittleEndian>()?;
    let end = reader.read_i64::<LittleEndian>()?;
    Ok(Section { begin, end })
}

fn write_section<W: Write>(writer: &mut W, section: Section) -> io::Result<()> {
    writer.write_i64::<LittleEndian>(section.begin)?;
    writer.write_i64::<LittleEndian>(section.end)
}

impl Header {
    fn read<R: Read>(reader: &mut R) -> Result<Header, SignatureFileError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(SignatureFileError::BadMagic);
        }

        let mut version = [0u8; 4];
        reader.read_exact(&mut version)?;
        if version != VERSION {
            return Err(SignatureFileError::UnsupportedVersion(
                String::from_utf8_lossy(&version).into_owned(),
            ));
        }

        let count = reader.read_i64::<LittleEndian>()?;
        if count < 0 {
            return Err(SignatureFileError::NegativeLength);
        }

        let mut tag = [0u8; 2];
        reader.read_exact(&mut tag)?;
        let dtype = Dtype::from_tag(tag).ok_or_else(|| {
            SignatureFileError::UnknownDtype(String::from_utf8_lossy(&tag).into_owned())
        })?;

        Ok(Header {
            count: count as usize,
            dtype,
            lengths: read_section(reader)?,
            metadata: read_section(reader)?,
            ids: read_section(reader)?,
            data: read_section(reader)?,
        })
    }

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION)?;
        writer.write_i64::<LittleEndian>(self.count as i64)?;
        writer.write_all(&self.dtype.tag())?;
        self.write_offsets(writer)
    }

    fn write_offsets<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_section(writer, self.lengths)?;
        write_section(writer, self.metadata)?;
        write_section(writer, self.ids)?;
        write_section(writer, self.data)
    }
}

/// Per-signature IDs as stored in a file: all strings, or all integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureIds {
    Strings(Vec<String>),
    Ints(Vec<i64>),
}

impl SignatureIds {
    pub fn len(&self) -> usize {
        match self {
            SignatureIds::Strings(v) => v.len(),
            SignatureIds::Ints(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Open handle on a signature file.
///
/// Opening validates the header and reads the (small) lengths section
/// eagerly; metadata, IDs, and signature data are read on demand.
#[derive(Debug)]
pub struct SignatureFile<R> {
    stream: R,
    header: Header,
    lengths: Vec<usize>,
    /// Cumulative element offsets within the data section, length count+1.
    bounds: Vec<u64>,
}

impl<R: Read + Seek> SignatureFile<R> {
    pub fn open(mut stream: R) -> Result<Self, SignatureFileError> {
        let header = Header::read(&mut stream)?;

        stream.seek(SeekFrom::Start(header.lengths.begin as u64))?;
        let mut lengths = Vec::with_capacity(header.count);
        for _ in 0..header.count {
            let len = stream.read_i32::<LittleEndian>()?;
            if len < 0 {
                return Err(SignatureFileError::NegativeLength);
            }
            lengths.push(len as usize);
        }

        let mut bounds = Vec::with_capacity(header.count + 1);
        let mut total = 0u64;
        bounds.push(0);
        for &len in &lengths {
            total += len as u64;
            bounds.push(total);
        }

        debug!(
            "opened signature file: {} signatures, dtype {}, {} elements",
            header.count, header.dtype, total
        );

        Ok(SignatureFile {
            stream,
            header,
            lengths,
            bounds,
        })
    }

    /// Number of signatures in the file.
    pub fn count(&self) -> usize {
        self.header.count
    }

    /// Element type of the stored signatures.
    pub fn dtype(&self) -> Dtype {
        self.header.dtype
    }

    /// Per-signature element counts.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Total element count over all signatures.
    pub fn nelems(&self) -> u64 {
        *self.bounds.last().unwrap_or(&0)
    }

    pub fn has_ids(&self) -> bool {
        self.header.ids.present()
    }

    pub fn has_metadata(&self) -> bool {
        self.header.metadata.present()
    }

    fn data_start(&self) -> u64 {
        self.header.data.begin as u64
    }

    /// Byte offset of signature `index` within the stream.
    fn data_offset(&self, index: usize) -> u64 {
        self.data_start() + self.bounds[index] * self.header.dtype.size() as u64
    }

    /// Reads all signatures in file order.
    ///
    /// `chunk` bounds how many signatures are read per step; `progress`
    /// is called with `(signatures_read, total)` after each chunk.
    pub fn get_all(
        &mut self,
        chunk: Option<usize>,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<SignatureArray, SignatureFileError> {
        fn read_all<C: Coord, R: Read + Seek>(
            file: &mut SignatureFile<R>,
            chunk: usize,
            progress: &mut dyn FnMut(usize, usize),
        ) -> Result<PackedSignatures<C>, SignatureFileError> {
            let count = file.count();
            let mut packed = PackedSignatures::<C>::with_lengths(&file.lengths);

            file.stream.seek(SeekFrom::Start(file.data_start()))?;
            let mut begin = 0;
            while begin < count {
                let end = (begin + chunk).min(count);
                C::read_from(&mut file.stream, packed.range_mut(begin, end))?;
                progress(end, count);
                begin = end;
            }
            Ok(packed)
        }

        let chunk = chunk.unwrap_or(self.count()).max(1);
        Ok(match self.header.dtype {
            Dtype::U8 => SignatureArray::U8(read_all(self, chunk, &mut progress)?),
            Dtype::U16 => SignatureArray::U16(read_all(self, chunk, &mut progress)?),
            Dtype::U32 => SignatureArray::U32(read_all(self, chunk, &mut progress)?),
            Dtype::U64 => SignatureArray::U64(read_all(self, chunk, &mut progress)?),
        })
    }

    /// Reads the signatures at `indices`, producing an array whose `i`-th
    /// entry corresponds to `indices[i]`.
    ///
    /// Indices may repeat and appear in any order; the file itself is
    /// visited in ascending position with a single forward pass of seeks.
    /// `progress` is called with `(signatures_read, total)` per signature.
    pub fn get_subset(
        &mut self,
        indices: &[usize],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<SignatureArray, SignatureFileError> {
        for &index in indices {
            if index >= self.count() {
                return Err(SignatureFileError::IndexOutOfRange {
                    index,
                    count: self.count(),
                });
            }
        }

        fn read_subset<C: Coord, R: Read + Seek>(
            file: &mut SignatureFile<R>,
            indices: &[usize],
            progress: &mut dyn FnMut(usize, usize),
        ) -> Result<PackedSignatures<C>, SignatureFileError> {
            let out_lengths: Vec<usize> = indices.iter().map(|&i| file.lengths[i]).collect();
            let mut packed = PackedSignatures::<C>::with_lengths(&out_lengths);

            // Visit file positions in ascending order, scattering each
            // signature into its output slot.
            let mut order: Vec<(usize, usize)> =
                indices.iter().copied().zip(0..indices.len()).collect();
            order.sort_unstable();

            for (done, &(file_index, out_index)) in order.iter().enumerate() {
                let offset = file.data_offset(file_index);
                file.stream.seek(SeekFrom::Start(offset))?;
                C::read_from(&mut file.stream, packed.slice_mut(out_index))?;
                progress(done + 1, order.len());
            }
            Ok(packed)
        }

        Ok(match self.header.dtype {
            Dtype::U8 => SignatureArray::U8(read_subset(self, indices, &mut progress)?),
            Dtype::U16 => SignatureArray::U16(read_subset(self, indices, &mut progress)?),
            Dtype::U32 => SignatureArray::U32(read_subset(self, indices, &mut progress)?),
            Dtype::U64 => SignatureArray::U64(read_subset(self, indices, &mut progress)?),
        })
    }

    /// Lazy sequential iterator over the stored signatures.
    pub fn iter(&mut self) -> Result<SignatureIter<'_, R>, SignatureFileError> {
        let start = self.data_start();
        self.stream.seek(SeekFrom::Start(start))?;
        Ok(SignatureIter {
            file: self,
            next: 0,
        })
    }

    /// Reads the metadata section, if present.
    pub fn read_metadata(&mut self) -> Result<Option<serde_json::Value>, SignatureFileError> {
        if !self.has_metadata() {
            return Ok(None);
        }
        let section = self.header.metadata;
        self.stream.seek(SeekFrom::Start(section.begin as u64))?;

        let tag = self.stream.read_u8()?;
        if tag != b'j' {
            return Err(SignatureFileError::UnknownMetadataFormat(tag));
        }

        let mut payload = vec![0u8; (section.byte_len() - 1) as usize];
        self.stream.read_exact(&mut payload)?;
        Ok(Some(serde_json::from_slice(&payload)?))
    }

    /// Reads the IDs section, if present.
    pub fn read_ids(&mut self) -> Result<Option<SignatureIds>, SignatureFileError> {
        if !self.has_ids() {
            return Ok(None);
        }
        let section = self.header.ids;
        let count = self.count();
        self.stream.seek(SeekFrom::Start(section.begin as u64))?;

        let tag = self.stream.read_u8()?;
        match tag {
            b'i' => {
                let mut dtype_tag = [0u8; 2];
                self.stream.read_exact(&mut dtype_tag)?;
                let ids = read_int_ids(&mut self.stream, dtype_tag, count)?;
                Ok(Some(SignatureIds::Ints(ids)))
            }
            b's' => {
                let mut data = vec![0u8; (section.byte_len() - 1) as usize];
                self.stream.read_exact(&mut data)?;
                if count == 0 {
                    return if data.is_empty() {
                        Ok(Some(SignatureIds::Strings(Vec::new())))
                    } else {
                        Err(SignatureFileError::MalformedIds)
                    };
                }
                if data.last() != Some(&0) {
                    return Err(SignatureFileError::MalformedIds);
                }

                let mut ids = Vec::with_capacity(count);
                for chunk in data.split(|&b| b == 0).take(count) {
                    ids.push(
                        String::from_utf8(chunk.to_vec())
                            .map_err(|_| SignatureFileError::MalformedIds)?,
                    );
                }
                // Exactly count strings, ending at the section end.
                if ids.len() != count || data.iter().filter(|&&b| b == 0).count() != count {
                    return Err(SignatureFileError::MalformedIds);
                }
                Ok(Some(SignatureIds::Strings(ids)))
            }
            other => Err(SignatureFileError::UnknownIdFormat(other)),
        }
    }

    /// Consumes the handle, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.stream
    }
}

fn read_int_ids<R: Read>(
    reader: &mut R,
    tag: [u8; 2],
    count: usize,
) -> Result<Vec<i64>, SignatureFileError> {
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let value = match &tag {
            b"u1" => reader.read_u8()? as i64,
            b"u2" => reader.read_u16::<LittleEndian>()? as i64,
            b"u4" => reader.read_u32::<LittleEndian>()? as i64,
            b"u8" => reader.read_u64::<LittleEndian>()? as i64,
            b"i1" => reader.read_i8()? as i64,
            b"i2" => reader.read_i16::<LittleEndian>()? as i64,
            b"i4" => reader.read_i32::<LittleEndian>()? as i64,
            b"i8" => reader.read_i64::<LittleEndian>()?,
            _ => {
                return Err(SignatureFileError::UnknownDtype(
                    String::from_utf8_lossy(&tag).into_owned(),
                ))
            }
        };
        ids.push(value);
    }
    Ok(ids)
}

/// Iterator over signatures in file order; see [`SignatureFile::iter`].
pub struct SignatureIter<'a, R> {
    file: &'a mut SignatureFile<R>,
    next: usize,
}

impl<R: Read + Seek> Iterator for SignatureIter<'_, R> {
    type Item = Result<Signature, SignatureFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.file.count() {
            return None;
        }
        let len = self.file.lengths[self.next];
        self.next += 1;

        fn read_one<C: Coord, R: Read>(
            stream: &mut R,
            len: usize,
        ) -> Result<Vec<C>, SignatureFileError> {
            let mut values = vec![C::ZERO; len];
            C::read_from(stream, &mut values)?;
            Ok(values)
        }

        let result = match self.file.header.dtype {
            Dtype::U8 => read_one(&mut self.file.stream, len).map(Signature::U8),
            Dtype::U16 => read_one(&mut self.file.stream, len).map(Signature::U16),
            Dtype::U32 => read_one(&mut self.file.stream, len).map(Signature::U32),
            Dtype::U64 => read_one(&mut self.file.stream, len).map(Signature::U64),
        };
        Some(result)
    }
}

/// Writes a signature set to `out`.
///
/// Sections are streamed in order (header, lengths, metadata, IDs, data);
/// the header's offset table is patched in afterwards with one seek back.
/// `dtype` defaults to the array's element type; a narrower choice is
/// validated against every value. `ids`, when given, must have exactly one
/// entry per signature.
pub fn write<W: Write + Seek>(
    out: &mut W,
    signatures: &SignatureArray,
    dtype: Option<Dtype>,
    ids: Option<&SignatureIds>,
    metadata: Option<&serde_json::Value>,
) -> Result<(), SignatureFileError> {
    let count = signatures.len();
    if let Some(ids) = ids {
        if ids.len() != count {
            return Err(SignatureFileError::IdCountMismatch {
                ids: ids.len(),
                count,
            });
        }
    }

    let dtype = dtype.unwrap_or_else(|| signatures.dtype());
    let mut header = Header {
        count,
        dtype,
        lengths: Section::default(),
        metadata: Section::default(),
        ids: Section::default(),
        data: Section::default(),
    };

    // Provisional header; offsets are patched at the end.
    header.write(out)?;
    debug_assert_eq!(out.stream_position()?, HEADER_LEN);

    // Lengths.
    header.lengths.begin = out.stream_position()? as i64;
    for i in 0..count {
        let len = signatures.size_of(i).unwrap_or(0);
        out.write_i32::<LittleEndian>(len as i32)?;
    }
    header.lengths.end = out.stream_position()? as i64 - 1;

    // Metadata.
    if let Some(metadata) = metadata {
        header.metadata.begin = out.stream_position()? as i64;
        out.write_all(b"j")?;
        let payload = serde_json::to_vec(metadata)?;
        out.write_all(&payload)?;
        header.metadata.end = out.stream_position()? as i64 - 1;
    }

    // IDs.
    if let Some(ids) = ids {
        header.ids.begin = out.stream_position()? as i64;
        match ids {
            SignatureIds::Strings(strings) => {
                out.write_all(b"s")?;
                for s in strings {
                    out.write_all(s.as_bytes())?;
                    out.write_all(b"\0")?;
                }
            }
            SignatureIds::Ints(ints) => {
                out.write_all(b"i")?;
                out.write_all(b"i8")?;
                for &v in ints {
                    out.write_i64::<LittleEndian>(v)?;
                }
            }
        }
        header.ids.end = out.stream_position()? as i64 - 1;
    }

    // Data.
    header.data.begin = out.stream_position()? as i64;
    if dtype == signatures.dtype() {
        // Fast path: the packed values buffer is already the concatenated
        // data section.
        match signatures {
            SignatureArray::U8(p) => u8::write_to(out, p.values())?,
            SignatureArray::U16(p) => u16::write_to(out, p.values())?,
            SignatureArray::U32(p) => u32::write_to(out, p.values())?,
            SignatureArray::U64(p) => u64::write_to(out, p.values())?,
        }
    } else {
        for sig in signatures.iter() {
            for value in sig.iter() {
                if value > dtype.max_value() {
                    return Err(SignatureError::ValueOverflow { value, dtype }.into());
                }
                dtype.write_value(out, value)?;
            }
        }
    }
    header.data.end = out.stream_position()? as i64 - 1;

    // Patch the offsets table.
    out.seek(SeekFrom::Start(OFFSETS_POS))?;
    header.write_offsets(out)?;
    out.flush()?;

    debug!(
        "wrote signature file: {} signatures, dtype {}",
        count, dtype
    );
    Ok(())
}
