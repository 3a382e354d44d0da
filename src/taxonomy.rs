//! Reference taxonomy: taxon records and the forest they form.
//!
//! Taxa form a forest (a reference set usually has several root taxa).
//! Each taxon optionally carries a `distance_threshold` — the maximum
//! Jaccard distance from a query to a reference genome in the taxon for
//! the query to be classified within it — and a `report` flag controlling
//! whether the taxon may be surfaced to the user directly.
//!
//! The forest is stored as an arena keyed by taxon ID; parent/child links
//! are IDs, so records stay plain data and serde-friendly.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a taxon within one reference set.
pub type TaxonId = u32;

fn default_report() -> bool {
    true
}

/// A single taxon record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxon {
    pub id: TaxonId,

    /// Scientific name, or any other unique descriptive name.
    pub name: String,

    /// Taxonomic rank (species, genus, ...), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Maximum query-to-reference distance for classification within this
    /// taxon. Inherited tightly: the effective threshold of a taxon is the
    /// minimum defined value along its lineage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_threshold: Option<f32>,

    /// Whether this taxon may be reported to the user directly. Hidden
    /// taxa are replaced by their first reportable ancestor.
    #[serde(default = "default_report")]
    pub report: bool,

    /// GenBank taxonomy ID, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncbi_id: Option<i64>,

    /// Parent taxon, absent for roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaxonId>,

    /// Additional arbitrary data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl Taxon {
    /// Short representation used in log and warning messages.
    pub fn short_repr(&self) -> String {
        format!("{}:{}", self.id, self.name)
    }
}

/// Errors from assembling a [`Taxonomy`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("duplicate taxon ID {0}")]
    DuplicateId(TaxonId),

    #[error("taxon {taxon} references unknown parent {parent}")]
    UnknownParent { taxon: TaxonId, parent: TaxonId },

    #[error("taxon {0} is part of a parent cycle")]
    ParentCycle(TaxonId),
}

#[derive(Debug)]
struct TaxonNode {
    taxon: Taxon,
    children: Vec<TaxonId>,
}

/// The taxonomy forest of one reference set. Immutable once built.
#[derive(Debug)]
pub struct Taxonomy {
    nodes: IndexMap<TaxonId, TaxonNode>,
    roots: Vec<TaxonId>,
}

impl Taxonomy {
    /// Builds the forest from a flat list of records, validating ID
    /// uniqueness, parent resolvability, and acyclicity.
    pub fn new(taxa: Vec<Taxon>) -> Result<Taxonomy, TaxonomyError> {
        let mut nodes: IndexMap<TaxonId, TaxonNode> = IndexMap::with_capacity(taxa.len());
        for taxon in taxa {
            let id = taxon.id;
            let node = TaxonNode {
                taxon,
                children: Vec::new(),
            };
            if nodes.insert(id, node).is_some() {
                return Err(TaxonomyError::DuplicateId(id));
            }
        }

        let mut roots = Vec::new();
        let links: Vec<(TaxonId, Option<TaxonId>)> = nodes
            .values()
            .map(|n| (n.taxon.id, n.taxon.parent))
            .collect();
        for (id, parent) in links {
            match parent {
                None => roots.push(id),
                Some(parent) => {
                    if parent == id {
                        return Err(TaxonomyError::ParentCycle(id));
                    }
                    match nodes.get_mut(&parent) {
                        Some(node) => node.children.push(id),
                        None => return Err(TaxonomyError::UnknownParent { taxon: id, parent }),
                    }
                }
            }
        }

        let taxonomy = Taxonomy { nodes, roots };

        // A parent chain longer than the taxon count must revisit a node.
        for &id in taxonomy.nodes.keys() {
            let mut steps = 0usize;
            let mut current = Some(id);
            while let Some(cur) = current {
                steps += 1;
                if steps > taxonomy.nodes.len() {
                    return Err(TaxonomyError::ParentCycle(id));
                }
                current = taxonomy.nodes[&cur].taxon.parent;
            }
        }

        Ok(taxonomy)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TaxonId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: TaxonId) -> Option<&Taxon> {
        self.nodes.get(&id).map(|n| &n.taxon)
    }

    pub fn parent(&self, id: TaxonId) -> Option<&Taxon> {
        let parent = self.nodes.get(&id)?.taxon.parent?;
        self.get(parent)
    }

    /// Direct children of a taxon, in insertion order.
    pub fn children(&self, id: TaxonId) -> &[TaxonId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Root taxa of the forest.
    pub fn roots(&self) -> &[TaxonId] {
        &self.roots
    }

    /// All taxa in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Taxon> {
        self.nodes.values().map(|n| &n.taxon)
    }

    /// Walks from a taxon towards its root, bottom-up.
    pub fn ancestors(&self, id: TaxonId, include_self: bool) -> Ancestors<'_> {
        let start = if include_self {
            self.contains(id).then_some(id)
        } else {
            self.nodes.get(&id).and_then(|n| n.taxon.parent)
        };
        Ancestors {
            taxonomy: self,
            next: start,
        }
    }

    /// The chain from root down to the taxon itself, as IDs.
    pub fn lineage(&self, id: TaxonId) -> Vec<TaxonId> {
        let mut chain: Vec<TaxonId> = self.ancestors(id, true).map(|t| t.id).collect();
        chain.reverse();
        chain
    }

    /// Root of the tree containing the taxon.
    pub fn root_of(&self, id: TaxonId) -> Option<TaxonId> {
        self.ancestors(id, true).last().map(|t| t.id)
    }

    /// Number of taxa on the root-to-taxon chain (roots have depth 1).
    pub fn depth(&self, id: TaxonId) -> Option<usize> {
        if self.contains(id) {
            Some(self.ancestors(id, true).count())
        } else {
            None
        }
    }

    /// Leaf taxa of the subtree rooted at `id` (the taxon itself if it
    /// has no children).
    pub fn leaves(&self, id: TaxonId) -> Vec<TaxonId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let children = self.children(current);
            if children.is_empty() {
                if self.contains(current) {
                    out.push(current);
                }
            } else {
                // Reverse keeps sibling order in the output.
                stack.extend(children.iter().rev().copied());
            }
        }
        out
    }

    /// Whether `ancestor` lies on the lineage of `id`.
    pub fn is_ancestor(&self, ancestor: TaxonId, id: TaxonId, include_self: bool) -> bool {
        self.ancestors(id, include_self).any(|t| t.id == ancestor)
    }

    /// Effective distance threshold: the minimum defined
    /// `distance_threshold` along the inclusive lineage. `None` means the
    /// taxon cannot match any query.
    pub fn threshold(&self, id: TaxonId) -> Option<f32> {
        self.ancestors(id, true)
            .filter_map(|t| t.distance_threshold)
            .fold(None, |acc: Option<f32>, t| {
                Some(acc.map_or(t, |a| a.min(t)))
            })
    }
}

/// Bottom-up iterator over a taxon's ancestors.
pub struct Ancestors<'a> {
    taxonomy: &'a Taxonomy,
    next: Option<TaxonId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Taxon;

    fn next(&mut self) -> Option<Self::Item> {
        let taxon = self.taxonomy.get(self.next?)?;
        self.next = taxon.parent;
        Some(taxon)
    }
}
