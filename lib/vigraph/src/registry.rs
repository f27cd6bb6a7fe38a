//! Prefix registry and subject blacklist.
//!
//! The registry maps prefixes to namespace IRIs and is merged on ingest only
//! for the data and ontologies graphs. The blacklist suppresses subject-event
//! emission for schema namespaces the editor never shows as instances.

use crate::model::{DATA_GRAPH, ONTOLOGIES_GRAPH};
use crate::vocab::{well_known_namespace, WELL_KNOWN_PREFIXES};
use indexmap::{IndexMap, IndexSet};
use oxrdf::GraphName;

/// Prefix → namespace bindings, insertion ordered.
#[derive(Debug, Clone)]
pub struct NamespaceRegistry {
    bindings: IndexMap<String, String>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        let mut bindings = IndexMap::new();
        for (prefix, namespace) in WELL_KNOWN_PREFIXES {
            bindings.insert(prefix.to_owned(), namespace.to_owned());
        }
        Self { bindings }
    }
}

impl NamespaceRegistry {
    pub fn bindings(&self) -> &IndexMap<String, String> {
        &self.bindings
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    /// Replaces or extends the bindings. With `replace`, the empty prefix is
    /// still preserved when the incoming map does not rebind it.
    pub fn set_all(&mut self, namespaces: IndexMap<String, String>, replace: bool) {
        if replace {
            let empty = self.bindings.get("").cloned();
            self.bindings = namespaces;
            if let Some(value) = empty {
                self.bindings.entry(String::new()).or_insert(value);
            }
        } else {
            self.merge(namespaces);
        }
    }

    /// Overwrites conflicting bindings with the incoming ones.
    pub fn merge(&mut self, namespaces: impl IntoIterator<Item = (String, String)>) {
        for (prefix, namespace) in namespaces {
            self.bindings.insert(prefix, namespace);
        }
    }

    /// Graph-scoped merge: only the data graph, the ontologies graph and the
    /// default graph take ingest prefixes.
    pub fn merge_for_graph(
        &mut self,
        namespaces: impl IntoIterator<Item = (String, String)>,
        graph: &GraphName,
    ) -> bool {
        if !Self::merges_prefixes(graph) {
            return false;
        }
        self.merge(namespaces);
        true
    }

    pub fn merges_prefixes(graph: &GraphName) -> bool {
        match graph {
            GraphName::DefaultGraph => true,
            GraphName::NamedNode(n) => {
                n.as_ref() == DATA_GRAPH || n.as_ref() == ONTOLOGIES_GRAPH
            }
            GraphName::BlankNode(_) => false,
        }
    }

    /// Removes one binding, returning its namespace.
    pub fn remove(&mut self, prefix: &str) -> Option<String> {
        self.bindings.shift_remove(prefix)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Subject-emission filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blacklist {
    pub prefixes: IndexSet<String>,
    pub uris: IndexSet<String>,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self {
            prefixes: WELL_KNOWN_PREFIXES
                .iter()
                .map(|(p, _)| (*p).to_owned())
                .collect(),
            uris: WELL_KNOWN_PREFIXES
                .iter()
                .map(|(_, ns)| (*ns).to_owned())
                .collect(),
        }
    }
}

impl Blacklist {
    pub fn set(&mut self, prefixes: Vec<String>, uris: Vec<String>) {
        self.prefixes = prefixes.into_iter().collect();
        self.uris = uris.into_iter().collect();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Ordered blacklist check:
    /// 1. blank nodes are never blacklisted;
    /// 2. a `prefix:` form with a blacklisted prefix is;
    /// 3. otherwise the value is matched against the normalised candidate
    ///    URI set (explicit URIs, current bindings of blacklisted prefixes,
    ///    and the well-known namespaces of those prefixes).
    pub fn is_blacklisted(&self, value: &str, namespaces: &NamespaceRegistry) -> bool {
        if value.starts_with("_:") {
            return false;
        }
        if !value.starts_with("http://") && !value.starts_with("https://") {
            if let Some((prefix, _)) = value.split_once(':') {
                if self.prefixes.contains(prefix) {
                    return true;
                }
            }
        }
        let mut candidates: IndexSet<String> = self.uris.iter().cloned().collect();
        for prefix in &self.prefixes {
            if let Some(bound) = namespaces.get(prefix) {
                candidates.insert(bound.to_owned());
            }
            if let Some(known) = well_known_namespace(prefix) {
                candidates.insert(known.to_owned());
            }
        }
        candidates
            .iter()
            .flat_map(|c| normalised_variants(c))
            .any(|candidate| value.starts_with(&candidate))
    }
}

/// A candidate namespace with and without its trailing `#`/`/`.
fn normalised_variants(candidate: &str) -> Vec<String> {
    let trimmed = candidate.trim_end_matches(['#', '/']);
    if trimmed.is_empty() {
        return vec![candidate.to_owned()];
    }
    vec![
        trimmed.to_owned(),
        format!("{trimmed}#"),
        format!("{trimmed}/"),
    ]
}
