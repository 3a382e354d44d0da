//! Sequence file handling and result export.
//!
//! Sequence parsing is delegated to needletail, which auto-detects FASTA
//! vs. FASTQ and transparent compression; this module only wraps it with
//! a file descriptor type and the fold-records-into-one-signature loop.
//! Result export covers JSON (the full results document) and a flat CSV
//! with one row per query.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use needletail::parse_fastx_file;
use serde::Serialize;
use thiserror::Error;

use crate::bio::kmers::KmerSpec;
use crate::bio::scanner::KmerScanner;
use crate::query::QueryResults;
use crate::signatures::Signature;

/// Errors while reading sequence files or exporting results.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to export results: {0}")]
    Export(String),
}

/// Declared format of a sequence file. Parsing auto-detects the actual
/// content; the declared format is kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqFormat {
    Fasta,
    Fastq,
}

impl SeqFormat {
    /// Guesses the format from a file name, defaulting to FASTA.
    pub fn from_path(path: &Path) -> SeqFormat {
        let name = path.to_string_lossy().to_ascii_lowercase();
        let stem = name
            .strip_suffix(".gz")
            .or_else(|| name.strip_suffix(".bz2"))
            .or_else(|| name.strip_suffix(".xz"))
            .unwrap_or(&name);
        if stem.ends_with(".fastq") || stem.ends_with(".fq") {
            SeqFormat::Fastq
        } else {
            SeqFormat::Fasta
        }
    }
}

/// A sequence file to be queried or signed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceFile {
    pub path: PathBuf,
    pub format: SeqFormat,
}

impl SequenceFile {
    pub fn new(path: impl Into<PathBuf>, format: SeqFormat) -> SequenceFile {
        SequenceFile {
            path: path.into(),
            format,
        }
    }

    /// Builds a descriptor with the format guessed from the extension.
    pub fn from_path(path: impl Into<PathBuf>) -> SequenceFile {
        let path = path.into();
        let format = SeqFormat::from_path(&path);
        SequenceFile { path, format }
    }

    /// Label used for this file in results: its file name.
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// Parses a sequence file and folds all of its records into a single
/// signature under `kspec`.
pub fn signature_from_file(
    kspec: &KmerSpec,
    file: &SequenceFile,
) -> Result<Signature, IoError> {
    let parse_err = |e: &dyn std::fmt::Display| IoError::Parse {
        path: file.path.clone(),
        message: e.to_string(),
    };

    let mut reader = parse_fastx_file(&file.path).map_err(|e| parse_err(&e))?;
    let mut scanner = KmerScanner::new(kspec.clone());
    let mut records = 0usize;

    while let Some(record) = reader.next() {
        let record = record.map_err(|e| parse_err(&e))?;
        scanner.scan(&record.seq());
        records += 1;
    }

    let signature = scanner.finish();
    debug!(
        "{}: {} records, {} distinct k-mers",
        file.label(),
        records,
        signature.len()
    );
    Ok(signature)
}

/// Writes the full results document as pretty-printed JSON.
pub fn write_results_json<W: Write>(results: &QueryResults, out: W) -> Result<(), IoError> {
    serde_json::to_writer_pretty(out, results).map_err(|e| IoError::Export(e.to_string()))
}

/// Writes one CSV row per query item.
pub fn write_results_csv<W: Write>(results: &QueryResults, out: W) -> Result<(), IoError> {
    let export = |e: csv::Error| IoError::Export(e.to_string());
    let mut writer = csv::Writer::from_writer(out);

    writer
        .write_record([
            "input",
            "success",
            "predicted_taxon",
            "predicted_rank",
            "report_taxon",
            "warnings",
            "error",
        ])
        .map_err(export)?;

    for item in &results.items {
        let predicted = item.predicted_taxon.as_ref();
        writer
            .write_record([
                item.input.label.as_str(),
                if item.success { "true" } else { "false" },
                predicted.map(|t| t.name.as_str()).unwrap_or(""),
                predicted
                    .and_then(|t| t.rank.as_deref())
                    .unwrap_or(""),
                item.report_taxon
                    .as_ref()
                    .map(|t| t.name.as_str())
                    .unwrap_or(""),
                item.warnings.join("; ").as_str(),
                item.error.as_deref().unwrap_or(""),
            ])
            .map_err(export)?;
    }

    writer.flush().map_err(|e| IoError::Export(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::GenomeSet;
    use crate::query::{QueryInput, QueryResultItem, TaxonSummary};
    use crate::signatures::SignaturesMeta;
    use chrono::Utc;
    use std::io::Write as _;

    #[test]
    fn test_format_guessing() {
        assert_eq!(
            SeqFormat::from_path(Path::new("a/genome.fasta")),
            SeqFormat::Fasta
        );
        assert_eq!(
            SeqFormat::from_path(Path::new("reads.fq.gz")),
            SeqFormat::Fastq
        );
        assert_eq!(
            SeqFormat::from_path(Path::new("reads.FASTQ")),
            SeqFormat::Fastq
        );
        assert_eq!(
            SeqFormat::from_path(Path::new("contigs.fna")),
            SeqFormat::Fasta
        );
    }

    #[test]
    fn test_sequence_file_label() {
        let file = SequenceFile::from_path("/data/genomes/abc.fasta");
        assert_eq!(file.label(), "abc.fasta");
        assert_eq!(file.format, SeqFormat::Fasta);
    }

    #[test]
    fn test_signature_from_fasta_file() {
        let mut tmp = tempfile::NamedTempFile::with_suffix(".fasta").unwrap();
        writeln!(tmp, ">contig1\nCCGAAA\n>contig2\nCCGTTT").unwrap();
        tmp.flush().unwrap();

        let kspec = KmerSpec::new(3, b"CCG").unwrap();
        let file = SequenceFile::from_path(tmp.path());
        let signature = signature_from_file(&kspec, &file).unwrap();

        // AAA = 0 and TTT = 63, folded across both contigs.
        assert_eq!(signature.to_vec(), vec![0, 63]);
    }

    #[test]
    fn test_signature_from_missing_file() {
        let kspec = KmerSpec::new(3, b"CCG").unwrap();
        let file = SequenceFile::from_path("/no/such/file.fasta");
        let err = signature_from_file(&kspec, &file).unwrap_err();
        assert!(matches!(err, IoError::Parse { .. }));
    }

    fn sample_results() -> QueryResults {
        QueryResults {
            items: vec![
                QueryResultItem {
                    input: QueryInput::new("a.fasta"),
                    success: true,
                    predicted_taxon: Some(TaxonSummary {
                        id: 4,
                        name: "species-a1".into(),
                        rank: Some("species".into()),
                        ncbi_id: None,
                    }),
                    report_taxon: Some(TaxonSummary {
                        id: 4,
                        name: "species-a1".into(),
                        rank: Some("species".into()),
                        ncbi_id: None,
                    }),
                    warnings: Vec::new(),
                    error: None,
                },
                QueryResultItem::failed(QueryInput::new("b.fasta"), "boom"),
            ],
            genome_set: GenomeSet {
                key: "testdb".into(),
                ..Default::default()
            },
            signatures_meta: SignaturesMeta::default(),
            timestamp: Utc::now(),
            cancelled: false,
        }
    }

    #[test]
    fn test_json_export() {
        let mut buf = Vec::new();
        write_results_json(&sample_results(), &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["items"][0]["predicted_taxon"]["name"], "species-a1");
        assert_eq!(value["items"][1]["error"], "boom");
        assert_eq!(value["genome_set"]["key"], "testdb");
        assert_eq!(value["cancelled"], false);
    }

    #[test]
    fn test_csv_export() {
        let mut buf = Vec::new();
        write_results_csv(&sample_results(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "input,success,predicted_taxon,predicted_rank,report_taxon,warnings,error"
        );
        assert_eq!(
            lines.next().unwrap(),
            "a.fasta,true,species-a1,species,species-a1,,"
        );
        assert_eq!(lines.next().unwrap(), "b.fasta,false,,,,,boom");
        assert!(lines.next().is_none());
    }
}
