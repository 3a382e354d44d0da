//! Driving queries against a reference database.
//!
//! A single query is: score the query signature against every reference
//! signature (parallel over references), then classify the distance
//! vector against the taxonomy. Batches run their inputs independently in
//! a dedicated worker pool; results always line up with the input order,
//! whatever the completion order. A shared [`CancellationToken`] cuts a
//! batch short without corrupting anything: inputs not yet started are
//! reported as cancelled items and the results are flagged.

pub mod results;

pub use results::{QueryInput, QueryResultItem, QueryResults, TaxonSummary};

use chrono::Utc;
use log::{debug, info};
use rayon::prelude::*;
use thiserror::Error;

use crate::classify::{consensus_taxon, find_matches, reportable_taxon};
use crate::database::ReferenceDb;
use crate::io::{signature_from_file, SequenceFile};
use crate::metric::jaccard_array;
use crate::signatures::{Signature, SignatureSlice};
use crate::taxonomy::TaxonId;
use crate::utils::{CancellationToken, ParallelConfig, ParallelError};

/// Error message attached to items skipped due to cancellation.
pub const CANCELLED_MSG: &str = "query cancelled";

/// Batch-level failures; per-item problems are captured in the items.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("must supply at least one query")]
    NoQueries,

    #[error("number of inputs ({inputs}) does not match number of queries ({queries})")]
    InputCountMismatch { inputs: usize, queries: usize },

    #[error(transparent)]
    Parallel(#[from] ParallelError),
}

/// Parameters controlling batch execution.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub parallel: ParallelConfig,
}

impl QueryParams {
    pub fn with_threads(threads: usize) -> QueryParams {
        QueryParams {
            parallel: ParallelConfig::with_threads(threads),
        }
    }
}

fn taxon_repr(db: &ReferenceDb, taxon: TaxonId) -> String {
    match db.taxonomy.get(taxon) {
        Some(t) => t.short_repr(),
        None => taxon.to_string(),
    }
}

fn summary(db: &ReferenceDb, taxon: TaxonId) -> Option<TaxonSummary> {
    db.taxonomy.get(taxon).map(TaxonSummary::from_taxon)
}

/// Runs one query signature against the database.
pub fn query_single(
    db: &ReferenceDb,
    signature: SignatureSlice<'_>,
    input: QueryInput,
) -> QueryResultItem {
    let distances = jaccard_array(signature, &db.signatures, true);
    classify_distances(db, &distances, input)
}

/// Classifies an already-computed distance vector.
pub fn classify_distances(
    db: &ReferenceDb,
    distances: &[f32],
    input: QueryInput,
) -> QueryResultItem {
    let matches = match find_matches(&db.taxonomy, &db.genomes, distances) {
        Ok(matches) => matches,
        Err(e) => return QueryResultItem::failed(input, e.to_string()),
    };

    // No matches: a successful query with no prediction.
    if matches.is_empty() {
        debug!("query {:?}: no matches", input.label);
        return QueryResultItem {
            input,
            success: true,
            predicted_taxon: None,
            report_taxon: None,
            warnings: Vec::new(),
            error: None,
        };
    }

    let matched = matches.taxa();
    let (consensus, others) = consensus_taxon(&db.taxonomy, &matched);

    let mut item = QueryResultItem {
        input,
        success: true,
        predicted_taxon: consensus.and_then(|t| summary(db, t)),
        report_taxon: consensus
            .and_then(|t| reportable_taxon(&db.taxonomy, t))
            .and_then(|t| summary(db, t)),
        warnings: Vec::new(),
        error: None,
    };

    if !others.is_empty() {
        let listed: Vec<String> = others.iter().map(|&t| taxon_repr(db, t)).collect();
        item.warnings.push(format!(
            "Query matched {} inconsistent taxa: {}. Reporting lowest common ancestor of this set.",
            others.len(),
            listed.join(", ")
        ));
    }

    match consensus {
        None => {
            item.success = false;
            item.error = Some("Matched taxa have no common ancestor.".into());
        }
        Some(consensus) if item.report_taxon.is_none() => {
            item.success = false;
            item.error = Some(format!(
                "Matched taxon {} has no reportable ancestor. \
                 This indicates a problem with the database.",
                taxon_repr(db, consensus)
            ));
        }
        Some(_) => {}
    }

    item
}

fn assemble(db: &ReferenceDb, items: Vec<QueryResultItem>, cancelled: bool) -> QueryResults {
    QueryResults {
        items,
        genome_set: db.genome_set.clone(),
        signatures_meta: db.signatures_meta.clone(),
        timestamp: Utc::now(),
        cancelled,
    }
}

/// Queries a batch of precomputed signatures.
///
/// `items[i]` of the result corresponds to `inputs[i]`. Inputs are
/// processed in parallel; any input not yet started when `cancel` fires
/// is reported as a failed item with [`CANCELLED_MSG`].
pub fn query_batch(
    db: &ReferenceDb,
    signatures: &[Signature],
    inputs: Vec<QueryInput>,
    params: &QueryParams,
    cancel: &CancellationToken,
) -> Result<QueryResults, QueryError> {
    if signatures.is_empty() {
        return Err(QueryError::NoQueries);
    }
    if inputs.len() != signatures.len() {
        return Err(QueryError::InputCountMismatch {
            inputs: inputs.len(),
            queries: signatures.len(),
        });
    }

    info!(
        "querying {} signatures against {} references",
        signatures.len(),
        db.len()
    );

    let pool = params.parallel.build_pool()?;
    let items: Vec<QueryResultItem> = pool.install(|| {
        signatures
            .par_iter()
            .zip(inputs.into_par_iter())
            .map(|(signature, input)| {
                if cancel.is_cancelled() {
                    QueryResultItem::failed(input, CANCELLED_MSG)
                } else {
                    query_single(db, signature.as_slice(), input)
                }
            })
            .collect()
    });

    Ok(assemble(db, items, cancel.is_cancelled()))
}

/// Queries a batch of sequence files: parse, scan, then classify.
///
/// Parsing and scanning run in the same worker pool as the queries. A
/// file that fails to parse produces a failed item without aborting the
/// batch.
pub fn query_files(
    db: &ReferenceDb,
    files: &[SequenceFile],
    params: &QueryParams,
    cancel: &CancellationToken,
) -> Result<QueryResults, QueryError> {
    if files.is_empty() {
        return Err(QueryError::NoQueries);
    }

    info!(
        "querying {} sequence files against {} references",
        files.len(),
        db.len()
    );

    let pool = params.parallel.build_pool()?;
    let items: Vec<QueryResultItem> = pool.install(|| {
        files
            .par_iter()
            .map(|file| {
                let input = QueryInput::from_file(file);
                if cancel.is_cancelled() {
                    return QueryResultItem::failed(input, CANCELLED_MSG);
                }
                match signature_from_file(&db.kmerspec, file) {
                    Ok(signature) => query_single(db, signature.as_slice(), input),
                    Err(e) => QueryResultItem::failed(input, e.to_string()),
                }
            })
            .collect()
    });

    Ok(assemble(db, items, cancel.is_cancelled()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{GenomeSet, ReferenceGenome};
    use crate::signatures::{Dtype, SignatureArray, SignaturesMeta};
    use crate::taxonomy::tests::taxon;
    use crate::taxonomy::Taxonomy;
    use crate::bio::kmers::KmerSpec;

    fn genome(key: &str, taxon_id: TaxonId) -> ReferenceGenome {
        ReferenceGenome {
            key: key.into(),
            description: None,
            refseq_acc: None,
            genbank_acc: None,
            ncbi_id: None,
            taxon_id,
        }
    }

    /// Database over a two-genus tree:
    ///
    /// root(1) -> genus-a(2, thr 0.5) -> species-a1(4, thr 0.3)
    ///         -> genus-b(3, thr 0.5) -> species-b1(5, thr 0.3)
    ///
    /// Reference signatures (k=3, prefix "AT"):
    ///   r0 (species-a1): {0, 1, 2, 3}
    ///   r1 (species-b1): {10, 11, 12, 13}
    fn sample_db() -> ReferenceDb {
        let mut taxa = vec![
            taxon(1, "root", None),
            taxon(2, "genus-a", Some(1)),
            taxon(3, "genus-b", Some(1)),
            taxon(4, "species-a1", Some(2)),
            taxon(5, "species-b1", Some(3)),
        ];
        taxa[1].distance_threshold = Some(0.5);
        taxa[2].distance_threshold = Some(0.5);
        taxa[3].distance_threshold = Some(0.3);
        taxa[4].distance_threshold = Some(0.3);

        let sigs = vec![
            Signature::from_sorted(&[0, 1, 2, 3], Dtype::U8).unwrap(),
            Signature::from_sorted(&[10, 11, 12, 13], Dtype::U8).unwrap(),
        ];

        ReferenceDb::from_parts(
            KmerSpec::new(3, b"AT").unwrap(),
            SignatureArray::from_signatures(&sigs).unwrap(),
            SignaturesMeta {
                name: Some("test refs".into()),
                ..Default::default()
            },
            vec![genome("g-a1", 4), genome("g-b1", 5)],
            Taxonomy::new(taxa).unwrap(),
            GenomeSet {
                key: "testdb".into(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn sig(values: &[u64]) -> Signature {
        Signature::from_sorted(values, Dtype::U8).unwrap()
    }

    #[test]
    fn test_single_exact_match() {
        let db = sample_db();
        let query = sig(&[0, 1, 2, 3]);
        let item = query_single(&db, query.as_slice(), QueryInput::new("q"));
        assert!(item.success);
        assert_eq!(item.predicted_taxon.as_ref().unwrap().id, 4);
        assert_eq!(item.report_taxon.as_ref().unwrap().id, 4);
        assert!(item.warnings.is_empty());
        assert!(item.error.is_none());
    }

    #[test]
    fn test_single_no_match() {
        let db = sample_db();
        let query = sig(&[40, 41, 42, 43]);
        let item = query_single(&db, query.as_slice(), QueryInput::new("q"));
        assert!(item.success);
        assert!(item.predicted_taxon.is_none());
        assert!(item.report_taxon.is_none());
        assert!(item.warnings.is_empty());
    }

    #[test]
    fn test_single_near_match_within_threshold() {
        let db = sample_db();
        // 4 of 5 values shared with r0: distance 0.2, within the species
        // threshold of 0.3.
        let query = sig(&[0, 1, 2, 3, 4]);
        let item = query_single(&db, query.as_slice(), QueryInput::new("q"));
        assert!(item.success);
        assert_eq!(item.predicted_taxon.as_ref().unwrap().id, 4);
    }

    #[test]
    fn test_single_inconsistent_matches_warn() {
        let mut db = sample_db();
        // Loosen the species thresholds so a query halfway between both
        // references matches both species.
        let taxa: Vec<crate::taxonomy::Taxon> = db
            .taxonomy
            .iter()
            .cloned()
            .map(|mut t| {
                if t.distance_threshold == Some(0.3) {
                    t.distance_threshold = Some(0.5);
                }
                t
            })
            .collect();
        db.taxonomy = Taxonomy::new(taxa).unwrap();

        // Union of both references: distance 0.5 to each.
        let query = sig(&[0, 1, 2, 3, 10, 11, 12, 13]);
        let item = query_single(&db, query.as_slice(), QueryInput::new("q"));

        assert!(item.success);
        assert_eq!(item.predicted_taxon.as_ref().unwrap().id, 1);
        assert_eq!(item.warnings.len(), 1);
        let warning = &item.warnings[0];
        assert!(warning.contains("2 inconsistent taxa"));
        assert!(warning.contains("4:species-a1"));
        assert!(warning.contains("5:species-b1"));
    }

    #[test]
    fn test_single_colinear_matches_no_warning() {
        // One reference assigned at genus level, one at the descendant
        // species level, both identical to the query: the matches are
        // colinear, so the prediction is the genus and no inconsistency
        // warning is emitted.
        let base = sample_db();
        let sigs = vec![
            Signature::from_sorted(&[0, 1, 2, 3], Dtype::U8).unwrap(),
            Signature::from_sorted(&[0, 1, 2, 3], Dtype::U8).unwrap(),
        ];
        let db = ReferenceDb::from_parts(
            base.kmerspec.clone(),
            SignatureArray::from_signatures(&sigs).unwrap(),
            base.signatures_meta.clone(),
            vec![genome("g-a", 2), genome("g-a1", 4)],
            base.taxonomy,
            base.genome_set,
        )
        .unwrap();

        let query = sig(&[0, 1, 2, 3]);
        let item = query_single(&db, query.as_slice(), QueryInput::new("q"));
        assert!(item.success);
        assert_eq!(item.predicted_taxon.as_ref().unwrap().id, 2);
        assert_eq!(item.report_taxon.as_ref().unwrap().id, 2);
        assert!(item.warnings.is_empty());
        assert!(item.error.is_none());
    }

    #[test]
    fn test_single_report_fallback() {
        let mut db = sample_db();
        // Hide species-a1; its genus becomes the reported taxon.
        let taxa: Vec<crate::taxonomy::Taxon> = db
            .taxonomy
            .iter()
            .cloned()
            .map(|mut t| {
                if t.id == 4 {
                    t.report = false;
                }
                t
            })
            .collect();
        db.taxonomy = Taxonomy::new(taxa).unwrap();

        let query = sig(&[0, 1, 2, 3]);
        let item = query_single(&db, query.as_slice(), QueryInput::new("q"));
        assert!(item.success);
        assert_eq!(item.predicted_taxon.as_ref().unwrap().id, 4);
        assert_eq!(item.report_taxon.as_ref().unwrap().id, 2);
    }

    #[test]
    fn test_single_no_reportable_ancestor() {
        let mut db = sample_db();
        let taxa: Vec<crate::taxonomy::Taxon> = db
            .taxonomy
            .iter()
            .cloned()
            .map(|mut t| {
                if [1, 2, 4].contains(&t.id) {
                    t.report = false;
                }
                t
            })
            .collect();
        db.taxonomy = Taxonomy::new(taxa).unwrap();

        let query = sig(&[0, 1, 2, 3]);
        let item = query_single(&db, query.as_slice(), QueryInput::new("q"));
        assert!(!item.success);
        assert_eq!(item.predicted_taxon.as_ref().unwrap().id, 4);
        assert!(item.report_taxon.is_none());
        assert!(item
            .error
            .as_deref()
            .unwrap()
            .contains("no reportable ancestor"));
    }

    #[test]
    fn test_classify_distance_count_mismatch() {
        let db = sample_db();
        let item = classify_distances(&db, &[0.1], QueryInput::new("q"));
        assert!(!item.success);
        assert!(item.error.as_deref().unwrap().contains("distances"));
    }

    #[test]
    fn test_identical_distances_identical_items() {
        let db = sample_db();
        let distances = vec![0.25, 0.9];
        let a = classify_distances(&db, &distances, QueryInput::new("q"));
        let b = classify_distances(&db, &distances, QueryInput::new("q"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_batch_preserves_order() {
        let db = sample_db();
        let signatures = vec![
            sig(&[0, 1, 2, 3]),
            sig(&[40, 41]),
            sig(&[10, 11, 12, 13]),
        ];
        let inputs = vec![
            QueryInput::new("a"),
            QueryInput::new("b"),
            QueryInput::new("c"),
        ];
        let results = query_batch(
            &db,
            &signatures,
            inputs,
            &QueryParams::with_threads(2),
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(!results.cancelled);
        assert_eq!(results.items.len(), 3);
        assert_eq!(results.items[0].input.label, "a");
        assert_eq!(results.items[0].predicted_taxon.as_ref().unwrap().id, 4);
        assert!(results.items[1].predicted_taxon.is_none());
        assert_eq!(results.items[2].input.label, "c");
        assert_eq!(results.items[2].predicted_taxon.as_ref().unwrap().id, 5);
        assert_eq!(results.genome_set.key, "testdb");
        assert_eq!(results.signatures_meta.name.as_deref(), Some("test refs"));
    }

    #[test]
    fn test_batch_rejects_empty() {
        let db = sample_db();
        let err = query_batch(
            &db,
            &[],
            vec![],
            &QueryParams::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::NoQueries));
    }

    #[test]
    fn test_batch_rejects_length_mismatch() {
        let db = sample_db();
        let err = query_batch(
            &db,
            &[sig(&[1])],
            vec![QueryInput::new("a"), QueryInput::new("b")],
            &QueryParams::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            QueryError::InputCountMismatch {
                inputs: 2,
                queries: 1
            }
        ));
    }

    #[test]
    fn test_batch_cancelled_before_start() {
        let db = sample_db();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = query_batch(
            &db,
            &[sig(&[0, 1]), sig(&[2, 3])],
            vec![QueryInput::new("a"), QueryInput::new("b")],
            &QueryParams::with_threads(1),
            &cancel,
        )
        .unwrap();

        assert!(results.cancelled);
        assert_eq!(results.items.len(), 2);
        for item in &results.items {
            assert!(!item.success);
            assert_eq!(item.error.as_deref(), Some(CANCELLED_MSG));
        }
    }
}
