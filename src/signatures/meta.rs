//! Metadata describing a set of k-mer signatures.

use serde::{Deserialize, Serialize};

use crate::bio::kmers::KmerSpec;

/// Descriptive metadata attached to a signature set. All fields optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignaturesMeta {
    /// String ID uniquely identifying the signature set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Short human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Version string of the set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Which genome attribute the per-signature IDs refer to (e.g.
    /// `"key"` or `"refseq_acc"`). Required for use as a query reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_attr: Option<String>,

    /// Longer human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Arbitrary extra metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The JSON document stored in a signature file's metadata section:
/// the k-mer spec the signatures were computed with, plus the
/// descriptive fields of [`SignaturesMeta`] inline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureSetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kmerspec: Option<KmerSpec>,

    #[serde(flatten)]
    pub meta: SignaturesMeta,
}
