//! Subject reconciliation: touched subjects → `subjects` event payloads.
//!
//! For every non-blacklisted touched subject the projector assembles the
//! subject's full current-store quads (across all graphs) and a fat-map
//! snapshot `{iri, types, label?}` derived from `rdf:type` and `rdfs:label`.

use crate::model::{subject_from_display, SerializedQuad};
use crate::protocol::{SubjectSnapshot, SubjectsPayload};
use crate::registry::{Blacklist, NamespaceRegistry};
use crate::store::QuadStore;
use indexmap::{IndexMap, IndexSet};
use oxrdf::vocab::{rdf, rdfs};
use oxrdf::{Quad, Term};

/// Builds the `subjects` payload for a touched-subject set.
///
/// Blacklisted subjects are silently dropped; insertion order is preserved.
pub fn project_subjects(
    store: &QuadStore,
    namespaces: &NamespaceRegistry,
    blacklist: &Blacklist,
    touched: &IndexSet<String>,
) -> SubjectsPayload {
    let mut subjects = Vec::new();
    let mut quads_by_subject: IndexMap<String, Vec<SerializedQuad>> = IndexMap::new();
    let mut snapshot = Vec::new();

    for key in touched {
        if blacklist.is_blacklisted(key, namespaces) {
            continue;
        }
        let Ok(subject) = subject_from_display(key) else {
            continue;
        };
        let quads = store.quads_for_subject(&subject);
        snapshot.push(snapshot_entry(key, &quads));
        quads_by_subject.insert(key.clone(), quads.iter().map(SerializedQuad::from).collect());
        subjects.push(key.clone());
    }

    SubjectsPayload {
        subjects,
        quads: Some(quads_by_subject),
        snapshot: Some(snapshot),
        meta: None,
    }
}

/// An empty payload, emitted after `clear`.
pub fn empty_subjects() -> SubjectsPayload {
    SubjectsPayload {
        subjects: Vec::new(),
        quads: Some(IndexMap::new()),
        snapshot: Some(Vec::new()),
        meta: None,
    }
}

fn snapshot_entry(key: &str, quads: &[Quad]) -> SubjectSnapshot {
    let mut types = Vec::new();
    let mut label = None;
    for quad in quads {
        if quad.predicate.as_ref() == rdf::TYPE {
            if let Term::NamedNode(class) = &quad.object {
                let iri = class.as_str().to_owned();
                if !types.contains(&iri) {
                    types.push(iri);
                }
            }
        } else if quad.predicate.as_ref() == rdfs::LABEL && label.is_none() {
            if let Term::Literal(value) = &quad.object {
                label = Some(value.value().to_owned());
            }
        }
    }
    SubjectSnapshot {
        iri: key.to_owned(),
        types,
        label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{GraphName, Literal, NamedNode};

    fn ex(local: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{local}")).unwrap()
    }

    fn data_graph() -> GraphName {
        crate::model::DATA_GRAPH.into_owned().into()
    }

    #[test]
    fn snapshot_collects_types_and_first_label() {
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), rdf::TYPE, ex("C"), data_graph()));
        store.insert(&Quad::new(ex("a"), rdf::TYPE, ex("D"), data_graph()));
        store.insert(&Quad::new(
            ex("a"),
            rdfs::LABEL,
            Literal::new_simple_literal("A"),
            data_graph(),
        ));
        store.insert(&Quad::new(
            ex("a"),
            rdfs::LABEL,
            Literal::new_simple_literal("second"),
            data_graph(),
        ));

        let touched: IndexSet<String> = ["http://example.org/a".to_owned()].into_iter().collect();
        let payload = project_subjects(
            &store,
            &NamespaceRegistry::default(),
            &Blacklist::default(),
            &touched,
        );
        assert_eq!(payload.subjects, vec!["http://example.org/a"]);
        let snapshot = payload.snapshot.unwrap();
        assert_eq!(
            snapshot[0].types,
            vec!["http://example.org/C", "http://example.org/D"]
        );
        assert_eq!(snapshot[0].label.as_deref(), Some("A"));
        assert_eq!(payload.quads.unwrap()["http://example.org/a"].len(), 4);
    }

    #[test]
    fn blacklisted_subjects_are_dropped() {
        let mut store = QuadStore::new();
        let owl_thing = NamedNode::new("http://www.w3.org/2002/07/owl#Thing").unwrap();
        store.insert(&Quad::new(owl_thing.clone(), rdf::TYPE, ex("C"), data_graph()));
        store.insert(&Quad::new(ex("b"), rdf::TYPE, ex("C"), data_graph()));

        let touched: IndexSet<String> = [
            "http://www.w3.org/2002/07/owl#Thing".to_owned(),
            "http://example.org/b".to_owned(),
        ]
        .into_iter()
        .collect();
        let payload = project_subjects(
            &store,
            &NamespaceRegistry::default(),
            &Blacklist::default(),
            &touched,
        );
        assert_eq!(payload.subjects, vec!["http://example.org/b"]);
    }

    #[test]
    fn subject_quads_span_graphs() {
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), rdf::TYPE, ex("C"), data_graph()));
        store.insert(&Quad::new(
            ex("a"),
            rdf::TYPE,
            ex("Inferred"),
            GraphName::from(crate::model::INFERRED_GRAPH.into_owned()),
        ));
        let touched: IndexSet<String> = ["http://example.org/a".to_owned()].into_iter().collect();
        let payload = project_subjects(
            &store,
            &NamespaceRegistry::default(),
            &Blacklist::default(),
            &touched,
        );
        assert_eq!(payload.quads.unwrap()["http://example.org/a"].len(), 2);
    }
}
