//! Shared test fixtures: randomly generated signature collections.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::signatures::{Dtype, Signature, SignatureArray};

/// Generates one random signature over the index space of tail length
/// `k`, containing roughly `density * 4^k` values.
pub fn make_signature(rng: &mut StdRng, k: usize, density: f64) -> Signature {
    let space = 1u64 << (2 * k);
    let mut values: Vec<u64> = (0..space).filter(|_| rng.random_bool(density)).collect();
    values.sort_unstable();
    values.dedup();
    Signature::from_sorted(&values, Dtype::for_k(k)).unwrap()
}

/// Generates `n` random signatures packed into one array, mirroring the
/// fixture collections the reference tests run over.
pub fn make_signatures(seed: u64, k: usize, n: usize, density: f64) -> SignatureArray {
    let mut rng = StdRng::seed_from_u64(seed);
    let sigs: Vec<Signature> = (0..n).map(|_| make_signature(&mut rng, k, density)).collect();
    SignatureArray::from_signatures(&sigs).unwrap()
}
