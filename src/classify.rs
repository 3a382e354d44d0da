//! Turning per-reference distances into a predicted taxon.
//!
//! Classification runs in three steps: match each reference against the
//! effective distance threshold of its primary taxon, reduce the matched
//! taxa to a single consensus, then walk up from the consensus to the
//! first taxon that may be reported to the user.

use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use thiserror::Error;

use crate::database::ReferenceGenome;
use crate::metric::Score;
use crate::taxonomy::{TaxonId, Taxonomy};

/// Integrity failures while matching references.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("got {actual} distances for {expected} reference genomes")]
    DistanceCountMismatch { expected: usize, actual: usize },

    #[error("reference genome {genome:?} is assigned to unknown taxon {taxon}")]
    UnknownTaxon { genome: String, taxon: TaxonId },
}

/// References matched per taxon, in first-match order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonMatches {
    matches: IndexMap<TaxonId, Vec<usize>>,
}

impl TaxonMatches {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Distinct matched taxa, in first-match order.
    pub fn taxa(&self) -> Vec<TaxonId> {
        self.matches.keys().copied().collect()
    }

    /// Indices of the references matching `taxon`.
    pub fn references(&self, taxon: TaxonId) -> &[usize] {
        self.matches.get(&taxon).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Whether a query at distance `distance` matches `taxon`: the taxon's
/// lineage must define a threshold and the distance must be within the
/// tightest one. Returns the taxon itself on a match.
pub fn matching_taxon(taxonomy: &Taxonomy, taxon: TaxonId, distance: Score) -> Option<TaxonId> {
    let threshold = taxonomy.threshold(taxon)?;
    (distance <= threshold).then_some(taxon)
}

/// Matches every reference genome against the query's distance to it.
pub fn find_matches(
    taxonomy: &Taxonomy,
    genomes: &[ReferenceGenome],
    distances: &[Score],
) -> Result<TaxonMatches, ClassifyError> {
    if genomes.len() != distances.len() {
        return Err(ClassifyError::DistanceCountMismatch {
            expected: genomes.len(),
            actual: distances.len(),
        });
    }

    let mut matches: IndexMap<TaxonId, Vec<usize>> = IndexMap::new();
    for (i, (genome, &distance)) in genomes.iter().zip(distances).enumerate() {
        if !taxonomy.contains(genome.taxon_id) {
            return Err(ClassifyError::UnknownTaxon {
                genome: genome.key.clone(),
                taxon: genome.taxon_id,
            });
        }
        if let Some(taxon) = matching_taxon(taxonomy, genome.taxon_id, distance) {
            matches.entry(taxon).or_default().push(i);
        }
    }

    debug!("{} taxa matched", matches.len());
    Ok(TaxonMatches { matches })
}

/// Reduces a set of matched taxa to a single consensus.
///
/// The consensus is the deepest taxon that is an inclusive ancestor of
/// every match, i.e. the deepest node in the intersection of the
/// matches' inclusive ancestor sets (`None` if the matches span multiple
/// trees of the forest). The second return value lists the matched taxa
/// off the consensus-to-root path; it is empty when the matches are
/// totally ordered by ancestry, since a colinear set is internally
/// consistent.
pub fn consensus_taxon(taxonomy: &Taxonomy, taxa: &[TaxonId]) -> (Option<TaxonId>, Vec<TaxonId>) {
    let distinct: Vec<TaxonId> = taxa.iter().copied().unique().collect();

    if distinct.is_empty() {
        return (None, Vec::new());
    }

    let lineages: Vec<Vec<TaxonId>> = distinct.iter().map(|&t| taxonomy.lineage(t)).collect();

    // The intersection of the inclusive ancestor sets is the longest
    // common prefix of the lineages; its last entry is the consensus.
    let mut common = 0;
    let shortest = lineages.iter().map(|l| l.len()).min().unwrap_or(0);
    while common < shortest && lineages.iter().all(|l| l[common] == lineages[0][common]) {
        common += 1;
    }

    if common == 0 {
        // Matches lie in different trees of the forest.
        return (None, distinct);
    }

    let consensus = lineages[0][common - 1];

    // Colinear matches (every taxon on the deepest match's lineage) are
    // internally consistent: nothing to warn about.
    let deepest: &[TaxonId] = lineages
        .iter()
        .max_by_key(|l| l.len())
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    if distinct.iter().all(|t| deepest.contains(t)) {
        return (Some(consensus), Vec::new());
    }

    let inconsistent = distinct
        .iter()
        .copied()
        .filter(|&t| !taxonomy.is_ancestor(t, consensus, true))
        .collect();
    (Some(consensus), inconsistent)
}

/// First taxon on the inclusive lineage, bottom-up, with `report == true`.
pub fn reportable_taxon(taxonomy: &Taxonomy, taxon: TaxonId) -> Option<TaxonId> {
    taxonomy
        .ancestors(taxon, true)
        .find(|t| t.report)
        .map(|t| t.id)
}
