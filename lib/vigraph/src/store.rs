//! In-memory quad storage partitioned by named graph.
//!
//! Each graph keeps a subject → predicate → objects index. Duplicate
//! detection is structural over all four terms, including literal datatype
//! and language. Iteration preserves insertion order within a graph.

use indexmap::IndexMap;
use oxrdf::{GraphName, NamedNode, NamedOrBlankNode, Quad, Term};
use rustc_hash::FxBuildHasher;

type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

#[derive(Debug, Default, Clone)]
struct GraphPartition {
    spo: FxIndexMap<NamedOrBlankNode, FxIndexMap<NamedNode, Vec<Term>>>,
    len: usize,
}

impl GraphPartition {
    fn insert(&mut self, subject: &NamedOrBlankNode, predicate: &NamedNode, object: &Term) -> bool {
        let objects = self
            .spo
            .entry(subject.clone())
            .or_default()
            .entry(predicate.clone())
            .or_default();
        if objects.contains(object) {
            return false;
        }
        objects.push(object.clone());
        self.len += 1;
        true
    }

    fn remove(&mut self, subject: &NamedOrBlankNode, predicate: &NamedNode, object: &Term) -> bool {
        let Some(predicates) = self.spo.get_mut(subject) else {
            return false;
        };
        let Some(objects) = predicates.get_mut(predicate) else {
            return false;
        };
        let Some(position) = objects.iter().position(|o| o == object) else {
            return false;
        };
        objects.remove(position);
        if objects.is_empty() {
            predicates.shift_remove(predicate);
        }
        if predicates.is_empty() {
            self.spo.shift_remove(subject);
        }
        self.len -= 1;
        true
    }

    fn contains(&self, subject: &NamedOrBlankNode, predicate: &NamedNode, object: &Term) -> bool {
        self.spo
            .get(subject)
            .and_then(|predicates| predicates.get(predicate))
            .is_some_and(|objects| objects.contains(object))
    }

    fn matching<'a>(
        &'a self,
        subject: Option<&'a NamedOrBlankNode>,
        predicate: Option<&'a NamedNode>,
        object: Option<&'a Term>,
    ) -> impl Iterator<Item = (&'a NamedOrBlankNode, &'a NamedNode, &'a Term)> + 'a {
        self.spo
            .iter()
            .filter(move |(s, _)| subject.is_none_or(|want| *s == want))
            .flat_map(move |(s, predicates)| {
                predicates
                    .iter()
                    .filter(move |(p, _)| predicate.is_none_or(|want| *p == want))
                    .flat_map(move |(p, objects)| {
                        objects
                            .iter()
                            .filter(move |o| object.is_none_or(|want| *o == want))
                            .map(move |o| (s, p, o))
                    })
            })
    }
}

/// The authoritative quad store.
#[derive(Debug, Default, Clone)]
pub struct QuadStore {
    graphs: FxIndexMap<GraphName, GraphPartition>,
}

impl QuadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a quad. Returns `false` without mutating anything if an
    /// identical quad already exists in the same graph.
    pub fn insert(&mut self, quad: &Quad) -> bool {
        self.graphs
            .entry(quad.graph_name.clone())
            .or_default()
            .insert(&quad.subject, &quad.predicate, &quad.object)
    }

    /// Removes the structural match of `quad`. Returns `false` if absent.
    pub fn remove(&mut self, quad: &Quad) -> bool {
        let Some(partition) = self.graphs.get_mut(&quad.graph_name) else {
            return false;
        };
        let removed = partition.remove(&quad.subject, &quad.predicate, &quad.object);
        if removed && partition.len == 0 {
            self.graphs.shift_remove(&quad.graph_name);
        }
        removed
    }

    pub fn contains(&self, quad: &Quad) -> bool {
        self.graphs
            .get(&quad.graph_name)
            .is_some_and(|p| p.contains(&quad.subject, &quad.predicate, &quad.object))
    }

    /// Quads matching the pattern; `None` positions are wildcards.
    pub fn quads_for_pattern(
        &self,
        subject: Option<&NamedOrBlankNode>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<&GraphName>,
    ) -> Vec<Quad> {
        let mut out = Vec::new();
        for (name, partition) in &self.graphs {
            if graph.is_some_and(|want| want != name) {
                continue;
            }
            for (s, p, o) in partition.matching(subject, predicate, object) {
                out.push(Quad::new(s.clone(), p.clone(), o.clone(), name.clone()));
            }
        }
        out
    }

    pub fn count_for_pattern(
        &self,
        subject: Option<&NamedOrBlankNode>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<&GraphName>,
    ) -> usize {
        self.graphs
            .iter()
            .filter(|(name, _)| graph.is_none_or(|want| want == *name))
            .map(|(_, partition)| partition.matching(subject, predicate, object).count())
            .sum()
    }

    /// All quads of one graph, in insertion order.
    pub fn graph_quads(&self, graph: &GraphName) -> Vec<Quad> {
        self.quads_for_pattern(None, None, None, Some(graph))
    }

    /// All quads whose subject is `subject`, across every graph.
    pub fn quads_for_subject(&self, subject: &NamedOrBlankNode) -> Vec<Quad> {
        self.quads_for_pattern(Some(subject), None, None, None)
    }

    /// Distinct subjects of a graph, in insertion order.
    pub fn subjects_in_graph(&self, graph: &GraphName) -> Vec<NamedOrBlankNode> {
        self.graphs
            .get(graph)
            .map(|partition| partition.spo.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of quads in one graph.
    pub fn graph_len(&self, graph: &GraphName) -> usize {
        self.graphs.get(graph).map_or(0, |p| p.len)
    }

    /// Per-graph quad counts for every non-empty graph.
    pub fn graph_counts(&self) -> Vec<(GraphName, usize)> {
        self.graphs
            .iter()
            .map(|(name, partition)| (name.clone(), partition.len))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graphs.values().map(|p| p.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.values().all(|p| p.len == 0)
    }

    /// Drops every quad of `graph`. Returns how many were removed.
    pub fn clear_graph(&mut self, graph: &GraphName) -> usize {
        self.graphs
            .shift_remove(graph)
            .map_or(0, |partition| partition.len)
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.graphs.clear();
    }

    /// Every quad in the store. Used by the reasoner to build working copies.
    pub fn iter(&self) -> impl Iterator<Item = Quad> + '_ {
        self.graphs.iter().flat_map(|(name, partition)| {
            partition
                .matching(None, None, None)
                .map(move |(s, p, o)| Quad::new(s.clone(), p.clone(), o.clone(), name.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::vocab::rdf;
    use oxrdf::{Literal, NamedNode};

    fn ex(local: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{local}")).unwrap()
    }

    fn data_graph() -> GraphName {
        crate::model::DATA_GRAPH.into_owned().into()
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = QuadStore::new();
        let quad = Quad::new(ex("a"), rdf::TYPE, ex("C"), data_graph());
        assert!(store.insert(&quad));
        assert!(!store.insert(&quad));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_triple_different_graph_is_not_a_duplicate() {
        let mut store = QuadStore::new();
        let a = Quad::new(ex("a"), rdf::TYPE, ex("C"), data_graph());
        let b = Quad::new(ex("a"), rdf::TYPE, ex("C"), GraphName::DefaultGraph);
        assert!(store.insert(&a));
        assert!(store.insert(&b));
        assert_eq!(store.len(), 2);
        let subject: NamedOrBlankNode = ex("a").into();
        assert_eq!(store.count_for_pattern(Some(&subject), None, None, None), 2);
        assert!(store.contains(&a));
        assert!(store.contains(&b));
    }

    #[test]
    fn literal_identity_includes_datatype() {
        use oxrdf::vocab::xsd;
        let mut store = QuadStore::new();
        let plain = Quad::new(
            ex("a"),
            ex("p"),
            Literal::new_simple_literal("1"),
            data_graph(),
        );
        let typed = Quad::new(
            ex("a"),
            ex("p"),
            Literal::new_typed_literal("1", xsd::INTEGER),
            data_graph(),
        );
        assert!(store.insert(&plain));
        assert!(store.insert(&typed));
        assert!(store.remove(&plain));
        assert!(!store.remove(&plain));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn pattern_wildcards_match() {
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), ex("p"), ex("o1"), data_graph()));
        store.insert(&Quad::new(ex("a"), ex("p"), ex("o2"), data_graph()));
        store.insert(&Quad::new(ex("b"), ex("p"), ex("o1"), data_graph()));

        let subject: NamedOrBlankNode = ex("a").into();
        assert_eq!(
            store
                .quads_for_pattern(Some(&subject), None, None, None)
                .len(),
            2
        );
        let object: Term = ex("o1").into();
        assert_eq!(store.count_for_pattern(None, None, Some(&object), None), 2);
        assert_eq!(store.count_for_pattern(None, None, None, None), 3);
    }

    #[test]
    fn clear_graph_reports_removed_count() {
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), ex("p"), ex("o1"), data_graph()));
        store.insert(&Quad::new(ex("a"), ex("p"), ex("o2"), data_graph()));
        assert_eq!(store.clear_graph(&data_graph()), 2);
        assert_eq!(store.clear_graph(&data_graph()), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn subjects_keep_insertion_order() {
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("b"), ex("p"), ex("o"), data_graph()));
        store.insert(&Quad::new(ex("a"), ex("p"), ex("o"), data_graph()));
        let subjects: Vec<_> = store
            .subjects_in_graph(&data_graph())
            .iter()
            .map(crate::model::subject_display)
            .collect();
        assert_eq!(
            subjects,
            vec!["http://example.org/b", "http://example.org/a"]
        );
    }
}
