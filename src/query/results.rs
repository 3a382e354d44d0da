//! Data model for query results.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::GenomeSet;
use crate::io::SequenceFile;
use crate::signatures::SignaturesMeta;
use crate::taxonomy::{Taxon, TaxonId};

/// Description of one query input, used only for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryInput {
    /// Unique label for the input, usually the file name.
    pub label: String,

    /// Source file, if the query came from one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl QueryInput {
    pub fn new(label: impl Into<String>) -> QueryInput {
        QueryInput {
            label: label.into(),
            path: None,
        }
    }

    pub fn from_file(file: &SequenceFile) -> QueryInput {
        QueryInput {
            label: file.label(),
            path: Some(file.path.clone()),
        }
    }
}

/// Serializable snapshot of a taxon referenced from a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonSummary {
    pub id: TaxonId,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncbi_id: Option<i64>,
}

impl TaxonSummary {
    pub fn from_taxon(taxon: &Taxon) -> TaxonSummary {
        TaxonSummary {
            id: taxon.id,
            name: taxon.name.clone(),
            rank: taxon.rank.clone(),
            ncbi_id: taxon.ncbi_id,
        }
    }
}

/// Result for a single query input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResultItem {
    pub input: QueryInput,

    /// Whether the query ran without fatal errors. A successful query may
    /// still have found no match.
    pub success: bool,

    /// Predicted (consensus) taxon, if any.
    pub predicted_taxon: Option<TaxonSummary>,

    /// The predicted taxon or its first reportable ancestor.
    pub report_taxon: Option<TaxonSummary>,

    /// Non-fatal warnings to surface alongside the prediction.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Fatal per-item error message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResultItem {
    /// A failed item carrying only an error message.
    pub fn failed(input: QueryInput, error: impl Into<String>) -> QueryResultItem {
        QueryResultItem {
            input,
            success: false,
            predicted_taxon: None,
            report_taxon: None,
            warnings: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Results for a whole batch, with the database identity used.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResults {
    /// Per-input results; `items[i]` corresponds to the i-th input.
    pub items: Vec<QueryResultItem>,

    /// Identity of the genome set queried against.
    pub genome_set: GenomeSet,

    /// Metadata of the signature set used.
    pub signatures_meta: SignaturesMeta,

    /// Time the batch completed.
    pub timestamp: DateTime<Utc>,

    /// Whether the batch was cut short by cancellation.
    pub cancelled: bool,
}
