//! Jaccard similarity between sparse sorted k-mer sets.
//!
//! Signatures are strictly increasing integer sequences, so intersection
//! and union sizes come out of a single linear two-pointer merge.
//! Comparisons go through `u64`, making mixed-width pairs exact. By
//! convention two empty sets have similarity `1.0` (distance `0.0`);
//! no code path can produce `NaN`.

use rayon::prelude::*;

use crate::signatures::{Coord, PackedSignatures, SignatureArray, SignatureSlice};

/// Score element type for one-vs-many results.
pub type Score = f32;

fn jaccard_typed<A: Coord, B: Coord>(a: &[A], b: &[B]) -> Score {
    let mut i = 0;
    let mut j = 0;
    let mut intersection: u64 = 0;

    while i < a.len() && j < b.len() {
        match a[i].to_u64().cmp(&b[j].to_u64()) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                intersection += 1;
                i += 1;
                j += 1;
            }
        }
    }

    let union = (a.len() + b.len()) as u64 - intersection;
    if union == 0 {
        // Both sets empty.
        1.0
    } else {
        intersection as Score / union as Score
    }
}

macro_rules! with_slice_pair {
    ($a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {{
        use SignatureSlice::*;
        match ($a, $b) {
            (U8($x), U8($y)) => $body,
            (U8($x), U16($y)) => $body,
            (U8($x), U32($y)) => $body,
            (U8($x), U64($y)) => $body,
            (U16($x), U8($y)) => $body,
            (U16($x), U16($y)) => $body,
            (U16($x), U32($y)) => $body,
            (U16($x), U64($y)) => $body,
            (U32($x), U8($y)) => $body,
            (U32($x), U16($y)) => $body,
            (U32($x), U32($y)) => $body,
            (U32($x), U64($y)) => $body,
            (U64($x), U8($y)) => $body,
            (U64($x), U16($y)) => $body,
            (U64($x), U32($y)) => $body,
            (U64($x), U64($y)) => $body,
        }
    }};
}

/// Jaccard similarity `|A ∩ B| / |A ∪ B|` of two signatures.
pub fn jaccard(a: SignatureSlice<'_>, b: SignatureSlice<'_>) -> Score {
    with_slice_pair!(a, b, |x, y| jaccard_typed(x, y))
}

/// Jaccard distance `1 - J`.
pub fn jaccard_distance(a: SignatureSlice<'_>, b: SignatureSlice<'_>) -> Score {
    1.0 - jaccard(a, b)
}

fn jaccard_array_typed<A: Coord, B: Coord>(
    query: &[A],
    refs: &PackedSignatures<B>,
    distance: bool,
) -> Vec<Score> {
    (0..refs.len())
        .into_par_iter()
        .map(|i| {
            let score = jaccard_typed(query, refs.slice(i));
            if distance {
                1.0 - score
            } else {
                score
            }
        })
        .collect()
}

/// Scores one query signature against every signature in `refs`,
/// in parallel over the references.
///
/// The output is ordered by reference index and identical for any thread
/// count. With `distance` set, elements are Jaccard distances.
pub fn jaccard_array(
    query: SignatureSlice<'_>,
    refs: &SignatureArray,
    distance: bool,
) -> Vec<Score> {
    macro_rules! dispatch {
        ($q:expr) => {
            match refs {
                SignatureArray::U8(p) => jaccard_array_typed($q, p, distance),
                SignatureArray::U16(p) => jaccard_array_typed($q, p, distance),
                SignatureArray::U32(p) => jaccard_array_typed($q, p, distance),
                SignatureArray::U64(p) => jaccard_array_typed($q, p, distance),
            }
        };
    }

    match query {
        SignatureSlice::U8(q) => dispatch!(q),
        SignatureSlice::U16(q) => dispatch!(q),
        SignatureSlice::U32(q) => dispatch!(q),
        SignatureSlice::U64(q) => dispatch!(q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{Dtype, Signature};
    use approx::assert_relative_eq;

    fn sig(values: &[u64], dtype: Dtype) -> Signature {
        Signature::from_sorted(values, dtype).unwrap()
    }

    #[test]
    fn test_jaccard_identical() {
        let a = sig(&[1, 2, 3, 4, 5], Dtype::U16);
        assert_eq!(jaccard(a.as_slice(), a.as_slice()), 1.0);
        assert_eq!(jaccard_distance(a.as_slice(), a.as_slice()), 0.0);
    }

    #[test]
    fn test_jaccard_disjoint() {
        let a = sig(&[1, 2, 3], Dtype::U16);
        let b = sig(&[4, 5, 6], Dtype::U16);
        assert_eq!(jaccard(a.as_slice(), b.as_slice()), 0.0);
        assert_eq!(jaccard_distance(a.as_slice(), b.as_slice()), 1.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        let a = sig(&[1, 2, 3, 4, 5], Dtype::U16);
        let b = sig(&[1, 2, 3, 9, 10], Dtype::U16);
        // Intersection 3, union 7.
        assert_relative_eq!(jaccard(a.as_slice(), b.as_slice()), 3.0 / 7.0);
    }

    #[test]
    fn test_jaccard_symmetric() {
        let a = sig(&[0, 3, 9, 20], Dtype::U8);
        let b = sig(&[3, 20, 21], Dtype::U8);
        assert_eq!(
            jaccard(a.as_slice(), b.as_slice()),
            jaccard(b.as_slice(), a.as_slice())
        );
    }

    #[test]
    fn test_jaccard_both_empty_is_one() {
        let a = Signature::empty(Dtype::U32);
        let b = Signature::empty(Dtype::U32);
        assert_eq!(jaccard(a.as_slice(), b.as_slice()), 1.0);
        assert_eq!(jaccard_distance(a.as_slice(), b.as_slice()), 0.0);
    }

    #[test]
    fn test_jaccard_one_empty_is_zero() {
        let a = Signature::empty(Dtype::U16);
        let b = sig(&[1, 2], Dtype::U16);
        assert_eq!(jaccard(a.as_slice(), b.as_slice()), 0.0);
    }

    #[test]
    fn test_jaccard_mixed_dtypes() {
        let narrow = sig(&[1, 2, 3, 4, 5], Dtype::U8);
        let wide = sig(&[1, 2, 3, 9, 10], Dtype::U64);
        assert_eq!(
            jaccard(narrow.as_slice(), wide.as_slice()),
            jaccard(wide.as_slice(), narrow.as_slice())
        );
        assert_relative_eq!(jaccard(narrow.as_slice(), wide.as_slice()), 3.0 / 7.0);
    }

    #[test]
    fn test_jaccard_range() {
        let sigs = [
            sig(&[], Dtype::U16),
            sig(&[1], Dtype::U16),
            sig(&[0, 1, 2, 3, 50], Dtype::U16),
            sig(&[2, 50, 1000], Dtype::U16),
        ];
        for a in &sigs {
            for b in &sigs {
                let score = jaccard(a.as_slice(), b.as_slice());
                assert!((0.0..=1.0).contains(&score));
                assert!(!score.is_nan());
            }
        }
    }

    #[test]
    fn test_jaccard_array_matches_pairwise() {
        let sigs = vec![
            sig(&[1, 2, 3], Dtype::U16),
            sig(&[], Dtype::U16),
            sig(&[2, 3, 4, 5], Dtype::U16),
            sig(&[100, 200], Dtype::U16),
        ];
        let array = SignatureArray::from_signatures(&sigs).unwrap();
        let query = sig(&[2, 3, 100], Dtype::U16);

        let scores = jaccard_array(query.as_slice(), &array, false);
        assert_eq!(scores.len(), 4);
        for (i, sig) in sigs.iter().enumerate() {
            assert_eq!(scores[i], jaccard(query.as_slice(), sig.as_slice()));
        }

        let dists = jaccard_array(query.as_slice(), &array, true);
        for (s, d) in scores.iter().zip(&dists) {
            assert_relative_eq!(s + d, 1.0);
        }
    }

    #[test]
    fn test_jaccard_array_empty_query() {
        let sigs = vec![sig(&[1, 2], Dtype::U16), sig(&[], Dtype::U16)];
        let array = SignatureArray::from_signatures(&sigs).unwrap();
        let query = Signature::empty(Dtype::U16);

        let dists = jaccard_array(query.as_slice(), &array, true);
        assert_eq!(dists, vec![1.0, 0.0]);
    }

    #[test]
    fn test_jaccard_array_empty_refs() {
        let array = SignatureArray::empty(Dtype::U32);
        let query = sig(&[1], Dtype::U32);
        assert!(jaccard_array(query.as_slice(), &array, false).is_empty());
    }

    #[test]
    fn test_jaccard_random_collection_matches_naive() {
        use crate::testutil::make_signatures;
        use std::collections::BTreeSet;

        let array = make_signatures(1, 6, 12, 0.03);
        let sets: Vec<BTreeSet<u64>> = array.iter().map(|s| s.iter().collect()).collect();

        for i in 0..array.len() {
            let scores = jaccard_array(array.get(i).unwrap(), &array, false);
            for j in 0..array.len() {
                let inter = sets[i].intersection(&sets[j]).count();
                let union = sets[i].union(&sets[j]).count();
                let expected = if union == 0 {
                    1.0
                } else {
                    inter as f32 / union as f32
                };
                assert_eq!(scores[j], expected, "pair ({i}, {j})");
            }
            // Self-similarity is exact for non-empty signatures.
            if !array.get(i).unwrap().is_empty() {
                assert_eq!(scores[i], 1.0);
            }
        }
    }
}
