//! The read-only reference database bundle.
//!
//! A [`ReferenceDb`] joins three things loaded once per run and shared by
//! every query without locking: the reference [`SignatureArray`] (from a
//! signature file), the taxonomy forest with the per-genome primary-taxon
//! assignment (from a taxonomy snapshot), and the signature-set metadata
//! describing how the two link together.
//!
//! Signature files carry per-signature IDs; the snapshot's genome records
//! carry several candidate identifiers (key, accessions, NCBI taxid). The
//! metadata's `id_attr` names which identifier the file IDs refer to.
//! Cross-linking resolves every file ID to a genome record; strict mode
//! fails on the first unresolved ID, permissive mode narrows both sides
//! to the intersection (loading only the matched signatures via a subset
//! read).

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bio::kmers::KmerSpec;
use crate::signatures::{
    SignatureArray, SignatureFile, SignatureFileError, SignatureIds, SignatureSetRecord,
    SignaturesMeta,
};
use crate::taxonomy::{TaxonId, Taxonomy, TaxonomyError};

/// Errors while loading or validating a reference database.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("signature file has no metadata section")]
    MissingMetadata,

    #[error("signature file metadata does not define a k-mer spec")]
    MissingKmerSpec,

    #[error("signature file has no IDs; cannot link signatures to genomes")]
    MissingIds,

    #[error("unsupported id_attr {0:?}")]
    UnsupportedIdAttr(String),

    #[error("signature IDs are {found} but id_attr {attr:?} requires {expected} IDs")]
    IdTypeMismatch {
        attr: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("signature ID {0:?} does not match any reference genome")]
    UnknownSignatureId(String),

    #[error("no signature IDs matched the reference genomes")]
    NoSignaturesMatched,

    #[error("{count} signatures for {genomes} reference genomes")]
    CountMismatch { count: usize, genomes: usize },

    #[error("genome {genome:?} references unknown taxon {taxon}")]
    UnknownTaxon { genome: String, taxon: TaxonId },

    #[error("signature file: {0}")]
    File(#[from] SignatureFileError),

    #[error("taxonomy: {0}")]
    Taxonomy(#[from] TaxonomyError),

    #[error("invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Identity snapshot of the genome set behind a reference database,
/// carried into query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenomeSet {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One reference genome: its identifiers plus its primary taxon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGenome {
    /// Unique key within the genome set.
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refseq_acc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genbank_acc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncbi_id: Option<i64>,

    /// Primary taxon this genome is assigned to.
    pub taxon_id: TaxonId,
}

/// Genome attribute that signature file IDs refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdAttr {
    Key,
    RefseqAcc,
    GenbankAcc,
    NcbiId,
}

impl IdAttr {
    pub fn parse(name: &str) -> Option<IdAttr> {
        match name {
            "key" => Some(IdAttr::Key),
            "refseq_acc" => Some(IdAttr::RefseqAcc),
            "genbank_acc" => Some(IdAttr::GenbankAcc),
            "ncbi_id" => Some(IdAttr::NcbiId),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdAttr::Key => "key",
            IdAttr::RefseqAcc => "refseq_acc",
            IdAttr::GenbankAcc => "genbank_acc",
            IdAttr::NcbiId => "ncbi_id",
        }
    }
}

/// External taxonomy snapshot: the genome set identity, the taxon forest,
/// and the genome records with their primary-taxon assignments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    #[serde(default)]
    pub genome_set: GenomeSet,
    pub taxa: Vec<crate::taxonomy::Taxon>,
    pub genomes: Vec<ReferenceGenome>,
}

impl TaxonomySnapshot {
    /// Loads a snapshot from a JSON file, transparently handling `.gz`.
    pub fn load(path: &Path) -> Result<TaxonomySnapshot, DatabaseError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let gzipped = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let snapshot = if gzipped {
            Self::from_reader(MultiGzDecoder::new(reader))?
        } else {
            Self::from_reader(reader)?
        };
        debug!(
            "loaded taxonomy snapshot: {} taxa, {} genomes",
            snapshot.taxa.len(),
            snapshot.genomes.len()
        );
        Ok(snapshot)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<TaxonomySnapshot, DatabaseError> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// The loaded reference database. Immutable for the lifetime of a run.
#[derive(Debug)]
pub struct ReferenceDb {
    pub kmerspec: KmerSpec,
    pub signatures: SignatureArray,
    pub signatures_meta: SignaturesMeta,
    pub genomes: Vec<ReferenceGenome>,
    pub taxonomy: Taxonomy,
    pub genome_set: GenomeSet,
}

impl ReferenceDb {
    /// Number of reference genomes (equal to the signature count).
    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// Loads a database from a signature file plus a taxonomy snapshot.
    ///
    /// In strict mode every signature ID must resolve to a genome record;
    /// otherwise unmatched signatures are dropped with a warning.
    pub fn load(
        signatures_path: &Path,
        taxonomy_path: &Path,
        strict: bool,
    ) -> Result<ReferenceDb, DatabaseError> {
        let snapshot = TaxonomySnapshot::load(taxonomy_path)?;
        let stream = BufReader::new(File::open(signatures_path)?);
        let file = SignatureFile::open(stream)?;
        Self::from_signature_file(file, snapshot, strict)
    }

    /// Loads a database from an open signature file handle and an
    /// already-parsed snapshot, cross-linking signature IDs to genome
    /// records.
    pub fn from_signature_file<R: io::Read + io::Seek>(
        mut file: SignatureFile<R>,
        snapshot: TaxonomySnapshot,
        strict: bool,
    ) -> Result<ReferenceDb, DatabaseError> {
        let metadata = file
            .read_metadata()?
            .ok_or(DatabaseError::MissingMetadata)?;
        let record: SignatureSetRecord = serde_json::from_value(metadata)?;
        let kmerspec = record.kmerspec.ok_or(DatabaseError::MissingKmerSpec)?;
        let meta = record.meta;

        let ids = file.read_ids()?.ok_or(DatabaseError::MissingIds)?;

        let id_attr = match &meta.id_attr {
            None => IdAttr::Key,
            Some(name) => {
                IdAttr::parse(name).ok_or_else(|| DatabaseError::UnsupportedIdAttr(name.clone()))?
            }
        };

        let resolved = resolve_ids(&ids, &snapshot.genomes, id_attr, strict)?;
        if resolved.is_empty() {
            return Err(DatabaseError::NoSignaturesMatched);
        }

        let genomes: Vec<ReferenceGenome> = resolved
            .iter()
            .map(|&(_, genome_index)| snapshot.genomes[genome_index].clone())
            .collect();

        let signatures = if resolved.len() == file.count()
            && resolved.iter().enumerate().all(|(i, &(sig, _))| sig == i)
        {
            file.get_all(None, |_, _| {})?
        } else {
            let indices: Vec<usize> = resolved.iter().map(|&(sig, _)| sig).collect();
            info!(
                "loading {} of {} signatures matched against genome records",
                indices.len(),
                file.count()
            );
            file.get_subset(&indices, |_, _| {})?
        };

        let taxonomy = Taxonomy::new(snapshot.taxa)?;
        Self::from_parts(
            kmerspec,
            signatures,
            meta,
            genomes,
            taxonomy,
            snapshot.genome_set,
        )
    }

    /// Assembles and validates a database from already-loaded parts.
    pub fn from_parts(
        kmerspec: KmerSpec,
        signatures: SignatureArray,
        signatures_meta: SignaturesMeta,
        genomes: Vec<ReferenceGenome>,
        taxonomy: Taxonomy,
        genome_set: GenomeSet,
    ) -> Result<ReferenceDb, DatabaseError> {
        if signatures.len() != genomes.len() {
            return Err(DatabaseError::CountMismatch {
                count: signatures.len(),
                genomes: genomes.len(),
            });
        }
        for genome in &genomes {
            if !taxonomy.contains(genome.taxon_id) {
                return Err(DatabaseError::UnknownTaxon {
                    genome: genome.key.clone(),
                    taxon: genome.taxon_id,
                });
            }
        }

        info!(
            "reference database ready: {} genomes, {} taxa, spec {}",
            genomes.len(),
            taxonomy.len(),
            kmerspec
        );
        Ok(ReferenceDb {
            kmerspec,
            signatures,
            signatures_meta,
            genomes,
            taxonomy,
            genome_set,
        })
    }
}

/// Resolves signature file IDs against genome records via `id_attr`.
///
/// Returns `(signature_index, genome_index)` pairs in signature order. In
/// strict mode an unresolved ID is an error; otherwise it is skipped with
/// a warning.
fn resolve_ids(
    ids: &SignatureIds,
    genomes: &[ReferenceGenome],
    id_attr: IdAttr,
    strict: bool,
) -> Result<Vec<(usize, usize)>, DatabaseError> {
    match (ids, id_attr) {
        (SignatureIds::Strings(values), IdAttr::Key | IdAttr::RefseqAcc | IdAttr::GenbankAcc) => {
            let index: IndexMap<&str, usize> = genomes
                .iter()
                .enumerate()
                .filter_map(|(i, g)| {
                    let value = match id_attr {
                        IdAttr::Key => Some(g.key.as_str()),
                        IdAttr::RefseqAcc => g.refseq_acc.as_deref(),
                        IdAttr::GenbankAcc => g.genbank_acc.as_deref(),
                        IdAttr::NcbiId => None,
                    };
                    value.map(|v| (v, i))
                })
                .collect();
            resolve_with(values.iter().map(String::as_str), &index, strict, |id| {
                id.to_string()
            })
        }
        (SignatureIds::Ints(values), IdAttr::NcbiId) => {
            let index: IndexMap<i64, usize> = genomes
                .iter()
                .enumerate()
                .filter_map(|(i, g)| g.ncbi_id.map(|v| (v, i)))
                .collect();
            resolve_with(values.iter().copied(), &index, strict, |id| id.to_string())
        }
        (SignatureIds::Strings(_), IdAttr::NcbiId) => Err(DatabaseError::IdTypeMismatch {
            attr: id_attr.as_str(),
            expected: "integer",
            found: "string",
        }),
        (SignatureIds::Ints(_), _) => Err(DatabaseError::IdTypeMismatch {
            attr: id_attr.as_str(),
            expected: "string",
            found: "integer",
        }),
    }
}

fn resolve_with<T, I>(
    values: I,
    index: &IndexMap<T, usize>,
    strict: bool,
    display: impl Fn(&T) -> String,
) -> Result<Vec<(usize, usize)>, DatabaseError>
where
    T: std::hash::Hash + Eq,
    I: Iterator<Item = T>,
{
    let mut resolved = Vec::new();
    for (sig_index, id) in values.enumerate() {
        match index.get(&id) {
            Some(&genome_index) => resolved.push((sig_index, genome_index)),
            None if strict => {
                return Err(DatabaseError::UnknownSignatureId(display(&id)));
            }
            None => {
                warn!("signature ID {:?} has no genome record; skipped", display(&id));
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{file, Dtype, Signature};
    use crate::taxonomy::tests::taxon;
    use std::io::Cursor;

    fn genome(key: &str, taxon_id: TaxonId) -> ReferenceGenome {
        ReferenceGenome {
            key: key.into(),
            description: None,
            refseq_acc: Some(format!("RS_{key}")),
            genbank_acc: None,
            ncbi_id: None,
            taxon_id,
        }
    }

    fn sample_snapshot() -> TaxonomySnapshot {
        let mut root = taxon(1, "root", None);
        root.distance_threshold = Some(0.5);
        TaxonomySnapshot {
            genome_set: GenomeSet {
                key: "testdb".into(),
                version: Some("1.0".into()),
                name: None,
                description: None,
            },
            taxa: vec![root, taxon(2, "leaf-a", Some(1)), taxon(3, "leaf-b", Some(1))],
            genomes: vec![genome("g1", 2), genome("g2", 3)],
        }
    }

    fn sample_file(ids: SignatureIds, id_attr: Option<&str>) -> Cursor<Vec<u8>> {
        let sigs = vec![
            Signature::from_sorted(&[1, 5, 9], Dtype::U16).unwrap(),
            Signature::from_sorted(&[2, 5], Dtype::U16).unwrap(),
        ];
        let array = SignatureArray::from_signatures(&sigs).unwrap();
        let record = SignatureSetRecord {
            kmerspec: Some(KmerSpec::new(8, b"ATGAC").unwrap()),
            meta: SignaturesMeta {
                id_attr: id_attr.map(Into::into),
                ..Default::default()
            },
        };
        let metadata = serde_json::to_value(&record).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        file::write(&mut cursor, &array, None, Some(&ids), Some(&metadata)).unwrap();
        cursor.set_position(0);
        cursor
    }

    fn load_from_cursor(
        cursor: Cursor<Vec<u8>>,
        snapshot: TaxonomySnapshot,
        strict: bool,
    ) -> Result<ReferenceDb, DatabaseError> {
        ReferenceDb::from_signature_file(SignatureFile::open(cursor)?, snapshot, strict)
    }

    #[test]
    fn test_load_by_key() {
        let ids = SignatureIds::Strings(vec!["g1".into(), "g2".into()]);
        let db = load_from_cursor(sample_file(ids, None), sample_snapshot(), true).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.kmerspec, KmerSpec::new(8, b"ATGAC").unwrap());
        assert_eq!(db.genomes[0].key, "g1");
        assert_eq!(db.genomes[1].taxon_id, 3);
        assert_eq!(
            db.signatures.get(0).unwrap().iter().collect::<Vec<_>>(),
            [1, 5, 9]
        );
    }

    #[test]
    fn test_load_by_refseq_acc_reorders() {
        // File stores g2's signature first; genome order must follow.
        let ids = SignatureIds::Strings(vec!["RS_g2".into(), "RS_g1".into()]);
        let db = load_from_cursor(
            sample_file(ids, Some("refseq_acc")),
            sample_snapshot(),
            true,
        )
        .unwrap();
        assert_eq!(db.genomes[0].key, "g2");
        assert_eq!(db.genomes[1].key, "g1");
        assert_eq!(
            db.signatures.get(1).unwrap().iter().collect::<Vec<_>>(),
            [2, 5]
        );
    }

    #[test]
    fn test_strict_mode_rejects_unknown_id() {
        let ids = SignatureIds::Strings(vec!["g1".into(), "nope".into()]);
        let err = load_from_cursor(sample_file(ids, None), sample_snapshot(), true).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::UnknownSignatureId(id) if id == "nope"
        ));
    }

    #[test]
    fn test_permissive_mode_filters() {
        let ids = SignatureIds::Strings(vec!["g1".into(), "nope".into()]);
        let db = load_from_cursor(sample_file(ids, None), sample_snapshot(), false).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.genomes[0].key, "g1");
        assert_eq!(
            db.signatures.get(0).unwrap().iter().collect::<Vec<_>>(),
            [1, 5, 9]
        );
    }

    #[test]
    fn test_permissive_mode_with_no_matches() {
        let ids = SignatureIds::Strings(vec!["x".into(), "y".into()]);
        let err = load_from_cursor(sample_file(ids, None), sample_snapshot(), false).unwrap_err();
        assert!(matches!(err, DatabaseError::NoSignaturesMatched));
    }

    #[test]
    fn test_id_type_mismatch() {
        let ids = SignatureIds::Ints(vec![1, 2]);
        let err = load_from_cursor(sample_file(ids, None), sample_snapshot(), true).unwrap_err();
        assert!(matches!(err, DatabaseError::IdTypeMismatch { .. }));
    }

    #[test]
    fn test_from_parts_count_mismatch() {
        let snapshot = sample_snapshot();
        let taxonomy = Taxonomy::new(snapshot.taxa).unwrap();
        let err = ReferenceDb::from_parts(
            KmerSpec::new(8, b"ATGAC").unwrap(),
            SignatureArray::empty(Dtype::U16),
            SignaturesMeta::default(),
            snapshot.genomes,
            taxonomy,
            snapshot.genome_set,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::CountMismatch { count: 0, genomes: 2 }
        ));
    }

    #[test]
    fn test_from_parts_unknown_taxon() {
        let snapshot = sample_snapshot();
        let taxonomy = Taxonomy::new(snapshot.taxa).unwrap();
        let sigs = vec![
            Signature::empty(Dtype::U16),
            Signature::empty(Dtype::U16),
        ];
        let mut genomes = snapshot.genomes;
        genomes[1].taxon_id = 42;
        let err = ReferenceDb::from_parts(
            KmerSpec::new(8, b"ATGAC").unwrap(),
            SignatureArray::from_signatures(&sigs).unwrap(),
            SignaturesMeta::default(),
            genomes,
            taxonomy,
            GenomeSet::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::UnknownTaxon { taxon: 42, .. }
        ));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = serde_json::json!({
            "genome_set": {"key": "db", "version": "1.0"},
            "taxa": [
                {"id": 1, "name": "root", "distance_threshold": 0.5},
                {"id": 2, "name": "leaf", "parent": 1}
            ],
            "genomes": [
                {"key": "g1", "taxon_id": 2, "refseq_acc": "RS_1"}
            ]
        });
        let snapshot: TaxonomySnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snapshot.genome_set.key, "db");
        assert_eq!(snapshot.taxa.len(), 2);
        assert_eq!(snapshot.genomes[0].taxon_id, 2);
    }

    #[test]
    fn test_id_attr_parse() {
        assert_eq!(IdAttr::parse("key"), Some(IdAttr::Key));
        assert_eq!(IdAttr::parse("refseq_acc"), Some(IdAttr::RefseqAcc));
        assert_eq!(IdAttr::parse("ncbi_id"), Some(IdAttr::NcbiId));
        assert_eq!(IdAttr::parse("bogus"), None);
    }
}
