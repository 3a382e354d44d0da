//! K-mer search parameters and integer codecs.
//!
//! A [`KmerSpec`] fixes the two parameters of a signature scan: the prefix
//! that every counted k-mer must follow, and the length `k` of the tail
//! that is encoded. Tails are packed into integers base-4 (A=0, C=1, G=2,
//! T=3) with the first tail base in the highest-order bits, so the set of
//! observable indices is `[0, 4^k)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bio::{reverse_complement, NUCLEOTIDES};
use crate::signatures::Dtype;

/// Largest supported tail length; keeps every index within 64 bits.
pub const MAX_K: usize = 32;

/// Errors from constructing a [`KmerSpec`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KmerSpecError {
    #[error("k-mer prefix must not be empty")]
    EmptyPrefix,

    #[error("invalid character {:?} in k-mer prefix", char::from(*.0))]
    InvalidPrefixBase(u8),

    #[error("k must be in 1..={MAX_K}, got {0}")]
    KOutOfRange(usize),
}

/// Parameters for a k-mer signature scan.
///
/// Instances are immutable once constructed and cheap to clone. Two specs
/// compare equal iff they search for the same prefixed k-mers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "KmerSpecRepr", into = "KmerSpecRepr")]
pub struct KmerSpec {
    k: usize,
    prefix: Vec<u8>,
}

/// Two-field serialized form of a [`KmerSpec`].
#[derive(Serialize, Deserialize)]
struct KmerSpecRepr {
    k: usize,
    prefix: String,
}

impl KmerSpec {
    /// Creates a spec for tails of length `k` following `prefix`.
    ///
    /// The prefix may be given in either case and is stored upper-case.
    pub fn new(k: usize, prefix: &[u8]) -> Result<Self, KmerSpecError> {
        if k == 0 || k > MAX_K {
            return Err(KmerSpecError::KOutOfRange(k));
        }
        if prefix.is_empty() {
            return Err(KmerSpecError::EmptyPrefix);
        }

        let mut upper = Vec::with_capacity(prefix.len());
        for &b in prefix {
            let u = b.to_ascii_uppercase();
            if !NUCLEOTIDES.contains(&u) {
                return Err(KmerSpecError::InvalidPrefixBase(b));
            }
            upper.push(u);
        }

        Ok(KmerSpec { k, prefix: upper })
    }

    /// Tail length.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Upper-case search prefix.
    #[inline]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Reverse complement of the prefix, as searched for on the minus strand.
    pub fn rc_prefix(&self) -> Vec<u8> {
        reverse_complement(&self.prefix)
    }

    #[inline]
    pub fn prefix_len(&self) -> usize {
        self.prefix.len()
    }

    /// Combined length of prefix and tail.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.prefix.len() + self.k
    }

    /// Number of possible tail indices, `4^k`.
    #[inline]
    pub fn index_space(&self) -> u64 {
        // k <= 32, but 4^32 itself does not fit in u64; saturate for that
        // single case. Indices are still all < 2^64.
        if self.k == MAX_K {
            u64::MAX
        } else {
            1u64 << (2 * self.k)
        }
    }

    /// Smallest coordinate type that holds every index for this spec.
    pub fn coord_dtype(&self) -> Dtype {
        Dtype::for_k(self.k)
    }
}

impl std::fmt::Display for KmerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", String::from_utf8_lossy(&self.prefix), self.k)
    }
}

impl TryFrom<KmerSpecRepr> for KmerSpec {
    type Error = KmerSpecError;

    fn try_from(repr: KmerSpecRepr) -> Result<Self, Self::Error> {
        KmerSpec::new(repr.k, repr.prefix.as_bytes())
    }
}

impl From<KmerSpec> for KmerSpecRepr {
    fn from(spec: KmerSpec) -> Self {
        KmerSpecRepr {
            k: spec.k,
            prefix: String::from_utf8_lossy(&spec.prefix).into_owned(),
        }
    }
}

/// Base-4 code of a single nucleotide, case-insensitive.
#[inline]
fn base_code(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Encodes a k-mer as its integer index, most significant base first.
///
/// Returns `None` if any byte is not an unambiguous base. The caller is
/// responsible for keeping `kmer.len() <= 32`.
#[inline]
pub fn kmer_to_index(kmer: &[u8]) -> Option<u64> {
    debug_assert!(kmer.len() <= MAX_K);
    let mut index = 0u64;
    for &b in kmer {
        index = (index << 2) | base_code(b)?;
    }
    Some(index)
}

/// Encodes the reverse complement of a k-mer without materializing it.
///
/// `revcomp_kmer_to_index(s) == kmer_to_index(reverse_complement(s))` for
/// any sequence of unambiguous bases.
#[inline]
pub fn revcomp_kmer_to_index(kmer: &[u8]) -> Option<u64> {
    debug_assert!(kmer.len() <= MAX_K);
    let mut index = 0u64;
    for &b in kmer.iter().rev() {
        // Complement swaps A<->T and C<->G, i.e. code -> 3 - code.
        index = (index << 2) | (3 - base_code(b)?);
    }
    Some(index)
}

/// Decodes an index back into its upper-case k-mer of length `k`.
pub fn index_to_kmer(index: u64, k: usize) -> Vec<u8> {
    debug_assert!(k <= MAX_K);
    let mut out = vec![0u8; k];
    let mut rest = index;
    for slot in out.iter_mut().rev() {
        *slot = NUCLEOTIDES[(rest & 3) as usize];
        rest >>= 2;
    }
    out
}
