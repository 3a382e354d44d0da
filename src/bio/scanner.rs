//! Prefix scanning of nucleotide sequences into signatures.
//!
//! The scanner walks a sequence looking for the spec's prefix on the plus
//! strand and its reverse complement on the minus strand, encodes the `k`
//! bases following (respectively preceding) each hit, and accumulates the
//! distinct indices. Tails containing ambiguity codes are skipped without
//! error. Repeated [`KmerScanner::scan`] calls share one accumulator, so
//! the contigs of a draft genome fold into a single signature.

use bit_vec::BitVec;
use fxhash::FxHashSet;
use log::trace;

use crate::bio::kmers::{kmer_to_index, revcomp_kmer_to_index, KmerSpec};
use crate::signatures::Signature;

/// Largest `k` for which the dense bit-set accumulator is used; 4^12 bits
/// is 2 MiB. Above this the index space is tracked sparsely.
const DENSE_MAX_K: usize = 12;

enum Accumulator {
    Dense(BitVec),
    Sparse(FxHashSet<u64>),
}

impl Accumulator {
    fn for_spec(spec: &KmerSpec) -> Accumulator {
        if spec.k() <= DENSE_MAX_K {
            Accumulator::Dense(BitVec::from_elem(spec.index_space() as usize, false))
        } else {
            Accumulator::Sparse(FxHashSet::default())
        }
    }

    #[inline]
    fn record(&mut self, index: u64) {
        match self {
            Accumulator::Dense(bits) => bits.set(index as usize, true),
            Accumulator::Sparse(set) => {
                set.insert(index);
            }
        }
    }

    fn into_sorted_indices(self) -> Vec<u64> {
        match self {
            Accumulator::Dense(bits) => bits
                .iter()
                .enumerate()
                .filter_map(|(i, set)| set.then_some(i as u64))
                .collect(),
            Accumulator::Sparse(set) => {
                let mut indices: Vec<u64> = set.into_iter().collect();
                indices.sort_unstable();
                indices
            }
        }
    }
}

/// Accumulating scanner for one k-mer spec.
pub struct KmerScanner {
    spec: KmerSpec,
    rc_prefix: Vec<u8>,
    acc: Accumulator,
}

impl KmerScanner {
    pub fn new(spec: KmerSpec) -> KmerScanner {
        let rc_prefix = spec.rc_prefix();
        let acc = Accumulator::for_spec(&spec);
        KmerScanner {
            spec,
            rc_prefix,
            acc,
        }
    }

    pub fn spec(&self) -> &KmerSpec {
        &self.spec
    }

    /// Scans one sequence fragment (e.g. a contig), accumulating every
    /// valid tail index found on either strand. Matching is
    /// case-insensitive; overlapping prefix hits all count.
    pub fn scan(&mut self, seq: &[u8]) {
        let k = self.spec.k();
        let prefix = self.spec.prefix();
        let prefix_len = prefix.len();
        let total_len = self.spec.total_len();
        let n = seq.len();

        // Plus strand: prefix followed by a full tail.
        if n >= total_len {
            for p in 0..=(n - total_len) {
                if seq[p..p + prefix_len].eq_ignore_ascii_case(prefix) {
                    if let Some(index) = kmer_to_index(&seq[p + prefix_len..p + total_len]) {
                        self.acc.record(index);
                    }
                }
            }
        }

        // Minus strand: reverse-complemented prefix preceded by a full
        // tail, which encodes as the reverse complement of those bases.
        if n >= total_len {
            for p in k..=(n - prefix_len) {
                if seq[p..p + prefix_len].eq_ignore_ascii_case(&self.rc_prefix) {
                    if let Some(index) = revcomp_kmer_to_index(&seq[p - k..p]) {
                        self.acc.record(index);
                    }
                }
            }
        }

        trace!("scanned fragment of {} bases", n);
    }

    /// Extracts the accumulated signature, sorted and deduplicated, in
    /// the spec's canonical coordinate type.
    pub fn finish(self) -> Signature {
        let dtype = self.spec.coord_dtype();
        // Indices are < 4^k by construction, so they fit the canonical
        // dtype, and the accumulator yields them sorted and distinct.
        Signature::from_sorted_unchecked(self.acc.into_sorted_indices(), dtype)
    }
}

/// Scans a single sequence in one shot.
pub fn find_kmers(spec: &KmerSpec, seq: &[u8]) -> Signature {
    let mut scanner = KmerScanner::new(spec.clone());
    scanner.scan(seq);
    scanner.finish()
}
