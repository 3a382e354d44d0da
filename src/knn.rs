//! Nearest-neighbor search over reference signatures.
//!
//! A thin layer over the one-vs-many Jaccard scoring: find the closest
//! reference(s) to a query signature, or to a whole collection of query
//! signatures. Useful for exploring a reference set directly, without
//! taxonomy-based classification.

use thiserror::Error;

use crate::metric::{jaccard_array, Score};
use crate::signatures::{SignatureArray, SignatureSlice};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KnnError {
    #[error("k must be > 0 and <= the number of reference signatures ({refs}), got {k}")]
    InvalidK { k: usize, refs: usize },
}

/// One neighbor: reference index plus its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub score: Score,
}

/// Finds the `k` references most similar to the query, in order of
/// decreasing similarity. With `distance` set, scores are reported as
/// Jaccard distances (the order is unchanged).
///
/// Ties are broken by reference index, so results are deterministic.
pub fn nn_search(
    query: SignatureSlice<'_>,
    refs: &SignatureArray,
    k: usize,
    distance: bool,
) -> Result<Vec<Neighbor>, KnnError> {
    if k == 0 || k > refs.len() {
        return Err(KnnError::InvalidK { k, refs: refs.len() });
    }

    let scores = jaccard_array(query, refs, false);

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    Ok(order
        .into_iter()
        .take(k)
        .map(|index| Neighbor {
            index,
            score: if distance {
                1.0 - scores[index]
            } else {
                scores[index]
            },
        })
        .collect())
}

/// The single closest reference to the query.
pub fn nn_closest(
    query: SignatureSlice<'_>,
    refs: &SignatureArray,
    distance: bool,
) -> Result<Neighbor, KnnError> {
    let neighbors = nn_search(query, refs, 1, distance)?;
    // nn_search with k == 1 returns exactly one neighbor.
    Ok(neighbors[0])
}

/// Runs [`nn_search`] for every query in a collection; row `i` of the
/// result holds the neighbors of query `i`.
pub fn nn_search_multi(
    queries: &SignatureArray,
    refs: &SignatureArray,
    k: usize,
    distance: bool,
) -> Result<Vec<Vec<Neighbor>>, KnnError> {
    queries
        .iter()
        .map(|query| nn_search(query, refs, k, distance))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{Dtype, Signature};

    fn refs() -> SignatureArray {
        let sigs = vec![
            Signature::from_sorted(&[1, 2, 3, 4], Dtype::U16).unwrap(),
            Signature::from_sorted(&[1, 2, 3, 9], Dtype::U16).unwrap(),
            Signature::from_sorted(&[50, 51], Dtype::U16).unwrap(),
        ];
        SignatureArray::from_signatures(&sigs).unwrap()
    }

    #[test]
    fn test_closest() {
        let refs = refs();
        let query = Signature::from_sorted(&[1, 2, 3, 4], Dtype::U16).unwrap();
        let hit = nn_closest(query.as_slice(), &refs, false).unwrap();
        assert_eq!(hit.index, 0);
        assert_eq!(hit.score, 1.0);

        let hit = nn_closest(query.as_slice(), &refs, true).unwrap();
        assert_eq!(hit.index, 0);
        assert_eq!(hit.score, 0.0);
    }

    #[test]
    fn test_top_k_ordering() {
        let refs = refs();
        let query = Signature::from_sorted(&[1, 2, 3, 4], Dtype::U16).unwrap();
        let hits = nn_search(query.as_slice(), &refs, 3, false).unwrap();
        assert_eq!(
            hits.iter().map(|n| n.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[1].score >= hits[2].score);
    }

    #[test]
    fn test_tie_broken_by_index() {
        let sigs = vec![
            Signature::from_sorted(&[7], Dtype::U16).unwrap(),
            Signature::from_sorted(&[7], Dtype::U16).unwrap(),
        ];
        let refs = SignatureArray::from_signatures(&sigs).unwrap();
        let query = Signature::from_sorted(&[7], Dtype::U16).unwrap();
        let hits = nn_search(query.as_slice(), &refs, 2, false).unwrap();
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[1].index, 1);
    }

    #[test]
    fn test_invalid_k() {
        let refs = refs();
        let query = Signature::from_sorted(&[1], Dtype::U16).unwrap();
        assert_eq!(
            nn_search(query.as_slice(), &refs, 0, false).unwrap_err(),
            KnnError::InvalidK { k: 0, refs: 3 }
        );
        assert_eq!(
            nn_search(query.as_slice(), &refs, 4, false).unwrap_err(),
            KnnError::InvalidK { k: 4, refs: 3 }
        );
    }

    #[test]
    fn test_multi_rows_align() {
        let refs = refs();
        let queries = SignatureArray::from_signatures(&[
            Signature::from_sorted(&[1, 2, 3, 4], Dtype::U16).unwrap(),
            Signature::from_sorted(&[50, 51], Dtype::U16).unwrap(),
        ])
        .unwrap();
        let rows = nn_search_multi(&queries, &refs, 1, false).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0].index, 0);
        assert_eq!(rows[1][0].index, 2);
    }
}
