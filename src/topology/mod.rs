//! Topology Matcher
//!
//! Pure functions deciding whether a StorageClass' allowed topologies
//! cover the position of a node, as seen by a given CSI driver.

pub mod term;

pub use term::{TopologySegment, TopologyTerm};

use k8s_openapi::api::core::v1::{Node, TopologySelectorTerm};
use k8s_openapi::api::storage::v1::CSINode;
use std::collections::BTreeMap;

/// Expand allowed topologies into explicit conjunctive terms.
///
/// Selector terms are OR'd, expressions inside a term are AND'd and the
/// values of one expression are OR'd, so the value lists are distributed
/// over the expressions (cross product). Every output term is sorted.
pub fn flatten(allowed_topologies: &[TopologySelectorTerm]) -> Vec<TopologyTerm> {
    let mut final_terms = Vec::new();

    for selector_term in allowed_topologies {
        let mut old_terms: Vec<TopologyTerm> = Vec::new();

        for expression in selector_term.match_label_expressions.iter().flatten() {
            let mut new_terms = Vec::new();

            for value in &expression.values {
                if old_terms.is_empty() {
                    new_terms.push(TopologyTerm::from_pairs([(
                        expression.key.as_str(),
                        value.as_str(),
                    )]));
                } else {
                    for old_term in &old_terms {
                        let mut new_term = old_term.clone();
                        new_term.push(TopologySegment::new(&expression.key, value));
                        new_terms.push(new_term);
                    }
                }
            }

            old_terms = new_terms;
        }

        final_terms.extend(old_terms);
    }

    for term in &mut final_terms {
        term.sort();
    }
    final_terms
}

/// Topology keys a driver registered on a node, empty when not installed
pub fn topology_keys<'a>(csi_node: &'a CSINode, driver_name: &str) -> &'a [String] {
    csi_node
        .spec
        .drivers
        .iter()
        .find(|driver| driver.name == driver_name)
        .and_then(|driver| driver.topology_keys.as_deref())
        .unwrap_or(&[])
}

/// Whether the driver is registered on the node
pub fn has_driver(csi_node: &CSINode, driver_name: &str) -> bool {
    csi_node
        .spec
        .drivers
        .iter()
        .any(|driver| driver.name == driver_name)
}

/// Extract the node's position for the given topology keys.
///
/// Returns `None` when the node lacks any of the keys; such a node cannot
/// be matched against the driver's topology.
pub fn node_topology(labels: &BTreeMap<String, String>, topology_keys: &[String]) -> Option<TopologyTerm> {
    let mut term = TopologyTerm::with_capacity(topology_keys.len());
    for key in topology_keys {
        let value = labels.get(key)?;
        term.push(TopologySegment::new(key, value));
    }
    term.sort();
    Some(term)
}

/// [`node_topology`] for a Node object
pub fn node_topology_of(node: &Node, topology_keys: &[String]) -> Option<TopologyTerm> {
    let empty = BTreeMap::new();
    let labels = node.metadata.labels.as_ref().unwrap_or(&empty);
    node_topology(labels, topology_keys)
}

/// Whether any allowed term is satisfied by the node's position.
///
/// An empty constraint list allows every node.
pub fn allows(allowed: &[TopologyTerm], node_term: &TopologyTerm) -> bool {
    allowed.is_empty() || allowed.iter().any(|term| term.subset(node_term))
}

/// Convert terms into CSI topology segment maps
pub fn to_csi_topology(terms: &[TopologyTerm]) -> Vec<BTreeMap<String, String>> {
    terms
        .iter()
        .map(|term| {
            term.into_iter()
                .map(|segment| (segment.key.clone(), segment.value.clone()))
                .collect()
        })
        .collect()
}
