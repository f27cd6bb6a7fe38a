//! Batch mutation of the quad store.
//!
//! Every operation validates its terms before touching the store, so a bad
//! payload never leaves a half-applied batch behind. Within a batch, removes
//! are applied before adds. The worker layers change counting and event
//! emission on top of the outcomes returned here.

use crate::error::ProtocolError;
use crate::model::{
    self, graph_term, object_term, predicate_term, quad_from_serialized, resolve_graph_name,
    subject_display, subject_term, SerializedQuad,
};
use crate::protocol::{QuadUpdate, SyncBatchPayload, SyncLoadPayload};
use crate::registry::NamespaceRegistry;
use crate::store::QuadStore;
use indexmap::IndexSet;
use oxrdf::{GraphName, NamedNode, NamedOrBlankNode, Quad, Term};

/// Counters and touched subjects of one committed batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub added: usize,
    pub removed: usize,
    pub touched: IndexSet<String>,
}

struct ResolvedRemoval {
    subject: NamedOrBlankNode,
    predicate: NamedNode,
    object: Option<Term>,
    graph: GraphName,
}

fn fallback_graph(graph_name: Option<&str>) -> Result<GraphName, ProtocolError> {
    match graph_name {
        Some(name) => resolve_graph_name(name),
        None => Ok(model::DATA_GRAPH.into_owned().into()),
    }
}

fn resolve_removal(update: &QuadUpdate, fallback: &GraphName) -> Result<ResolvedRemoval, ProtocolError> {
    Ok(ResolvedRemoval {
        subject: subject_term(&update.subject)?,
        predicate: predicate_term(&update.predicate)?,
        object: update.object.as_ref().map(object_term).transpose()?,
        graph: graph_term(update.graph.as_ref(), fallback)?,
    })
}

/// Applies a `syncBatch`: removes first, then adds, both validated up front.
pub fn apply_batch(
    store: &mut QuadStore,
    payload: &SyncBatchPayload,
) -> Result<BatchOutcome, ProtocolError> {
    let fallback = fallback_graph(payload.graph_name.as_deref())?;

    let removals = payload
        .removes
        .iter()
        .map(|update| resolve_removal(update, &fallback))
        .collect::<Result<Vec<_>, _>>()?;
    let adds = payload
        .adds
        .iter()
        .map(|quad| quad_from_serialized(quad, &fallback))
        .collect::<Result<Vec<_>, _>>()?;

    let mut outcome = BatchOutcome::default();
    for removal in &removals {
        outcome.removed += apply_removal(store, removal, &mut outcome.touched);
    }
    for quad in &adds {
        if store.insert(quad) {
            outcome.added += 1;
            outcome.touched.insert(subject_display(&quad.subject));
        }
    }
    Ok(outcome)
}

fn apply_removal(
    store: &mut QuadStore,
    removal: &ResolvedRemoval,
    touched: &mut IndexSet<String>,
) -> usize {
    let mut removed = 0;
    match &removal.object {
        None => {
            for quad in store.quads_for_pattern(
                Some(&removal.subject),
                Some(&removal.predicate),
                None,
                Some(&removal.graph),
            ) {
                if store.remove(&quad) {
                    removed += 1;
                }
            }
        }
        Some(object) => {
            let exact = Quad::new(
                removal.subject.clone(),
                removal.predicate.clone(),
                object.clone(),
                removal.graph.clone(),
            );
            if store.remove(&exact) {
                removed += 1;
            } else if let Term::Literal(wanted) = object {
                // Hosts sometimes round-trip literals without their datatype;
                // fall back to the lexical value within (s, p, g).
                let candidates = store.quads_for_pattern(
                    Some(&removal.subject),
                    Some(&removal.predicate),
                    None,
                    Some(&removal.graph),
                );
                if let Some(quad) = candidates.iter().find(|quad| {
                    matches!(&quad.object, Term::Literal(found) if found.value() == wanted.value())
                }) {
                    if store.remove(quad) {
                        removed += 1;
                    }
                }
            }
        }
    }
    if removed > 0 {
        touched.insert(subject_display(&removal.subject));
    }
    removed
}

/// Replace-all load of one graph: drop everything in `graphName`, insert the
/// provided quads re-homed into it, and merge prefixes where the graph-scoped
/// policy allows.
pub fn apply_sync_load(
    store: &mut QuadStore,
    registry: &mut NamespaceRegistry,
    payload: &SyncLoadPayload,
) -> Result<(BatchOutcome, GraphName), ProtocolError> {
    let graph = resolve_graph_name(&payload.graph_name)?;
    let quads = payload
        .quads
        .iter()
        .map(|quad| {
            quad_from_serialized(quad, &graph).map(|q| {
                Quad::new(q.subject, q.predicate, q.object, graph.clone())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut outcome = BatchOutcome::default();
    for subject in store.subjects_in_graph(&graph) {
        outcome.touched.insert(subject_display(&subject));
    }
    outcome.removed = store.clear_graph(&graph);
    for quad in &quads {
        if store.insert(quad) {
            outcome.added += 1;
            outcome.touched.insert(subject_display(&quad.subject));
        }
    }
    if let Some(prefixes) = &payload.prefixes {
        registry.merge_for_graph(
            prefixes.iter().map(|(p, ns)| (p.clone(), ns.clone())),
            &graph,
        );
    }
    Ok((outcome, graph))
}

/// Outcome of `syncRemoveAllQuadsForIri`.
#[derive(Debug, Default)]
pub struct IriRemovalOutcome {
    pub removed_subjects: usize,
    pub removed_objects: usize,
    pub touched: IndexSet<String>,
}

/// Removes every quad where `iri` is the subject, and every quad where it is
/// the object, within one graph.
pub fn remove_all_for_iri(
    store: &mut QuadStore,
    iri: &str,
    graph_name: Option<&str>,
) -> Result<IriRemovalOutcome, ProtocolError> {
    let graph = fallback_graph(graph_name)?;
    let node =
        NamedNode::new(iri).map_err(|e| ProtocolError::InvalidIri(format!("{iri}: {e}")))?;
    let mut outcome = IriRemovalOutcome::default();

    let subject: NamedOrBlankNode = node.clone().into();
    for quad in store.quads_for_pattern(Some(&subject), None, None, Some(&graph)) {
        if store.remove(&quad) {
            outcome.removed_subjects += 1;
        }
    }
    let object: Term = node.into();
    for quad in store.quads_for_pattern(None, None, Some(&object), Some(&graph)) {
        if store.remove(&quad) {
            outcome.removed_objects += 1;
            outcome.touched.insert(subject_display(&quad.subject));
        }
    }
    if outcome.removed_subjects > 0 {
        outcome.touched.insert(iri.to_owned());
    }
    Ok(outcome)
}

fn quad_in_namespaces(quad: &Quad, namespaces: &[String]) -> bool {
    let subject_iri = match &quad.subject {
        NamedOrBlankNode::NamedNode(n) => Some(n.as_str()),
        NamedOrBlankNode::BlankNode(_) => None,
    };
    let object_iri = match &quad.object {
        Term::NamedNode(n) => Some(n.as_str()),
        _ => None,
    };
    namespaces.iter().any(|ns| {
        subject_iri.is_some_and(|iri| iri.starts_with(ns.as_str()))
            || quad.predicate.as_str().starts_with(ns.as_str())
            || object_iri.is_some_and(|iri| iri.starts_with(ns.as_str()))
    })
}

/// Removes every quad of `graph_name` mentioning one of the namespaces in
/// subject, predicate or object position.
pub fn remove_by_namespaces(
    store: &mut QuadStore,
    graph_name: &str,
    namespaces: &[String],
) -> Result<(usize, IndexSet<String>), ProtocolError> {
    let graph = resolve_graph_name(graph_name)?;
    let mut removed = 0;
    let mut touched = IndexSet::new();
    for quad in store.graph_quads(&graph) {
        if quad_in_namespaces(&quad, namespaces) && store.remove(&quad) {
            removed += 1;
            touched.insert(subject_display(&quad.subject));
        }
    }
    Ok((removed, touched))
}

/// Outcome of `purgeNamespace`.
#[derive(Debug)]
pub struct PurgeOutcome {
    pub removed: usize,
    pub namespace_uri: String,
    pub prefix_removed: bool,
    pub touched: IndexSet<String>,
}

/// Resolves a prefix (or takes a URI directly), drops the binding, and sweeps
/// every graph for quads mentioning the namespace.
pub fn purge_namespace(
    store: &mut QuadStore,
    registry: &mut NamespaceRegistry,
    prefix_or_uri: &str,
) -> PurgeOutcome {
    let (namespace_uri, prefix_removed) = match registry.remove(prefix_or_uri) {
        Some(bound) => (bound, true),
        None => (prefix_or_uri.to_owned(), false),
    };
    let namespaces = [namespace_uri.clone()];
    let mut removed = 0;
    let mut touched = IndexSet::new();
    let quads: Vec<_> = store.iter().collect();
    for quad in quads {
        if quad_in_namespaces(&quad, &namespaces) && store.remove(&quad) {
            removed += 1;
            touched.insert(subject_display(&quad.subject));
        }
    }
    PurgeOutcome {
        removed,
        namespace_uri,
        prefix_removed,
        touched,
    }
}

/// Dedups and inserts parser output; used by ingest paths. Returns the quads
/// actually inserted.
pub fn insert_new_quads<'a>(
    store: &mut QuadStore,
    quads: impl IntoIterator<Item = &'a Quad>,
    touched: &mut IndexSet<String>,
) -> Vec<SerializedQuad> {
    let mut inserted = Vec::new();
    for quad in quads {
        if store.insert(quad) {
            touched.insert(subject_display(&quad.subject));
            inserted.push(SerializedQuad::from(quad));
        }
    }
    inserted
}
