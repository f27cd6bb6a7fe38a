//! Cross-channel term and quad forms.
//!
//! The host exchanges terms in a tagged serialized shape close to the RDF/JS
//! data model. Blank node values travel without the `_:` prefix, and an
//! `xsd:string` datatype is elided on the wire and on storage.

use crate::error::ProtocolError;
use oxrdf::vocab::xsd;
use oxrdf::{
    BlankNode, GraphName, GraphNameRef, Literal, NamedNode, NamedNodeRef, NamedOrBlankNode, Quad,
    Term,
};
use serde::{Deserialize, Serialize};

/// Instance data, the default ingest target.
pub const DATA_GRAPH: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("urn:vg:data");
/// Schema/ontology statements.
pub const ONTOLOGIES_GRAPH: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("urn:vg:ontologies");
/// Auxiliary workflow state.
pub const WORKFLOWS_GRAPH: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("urn:vg:workflows");
/// Reasoner output.
pub const INFERRED_GRAPH: NamedNodeRef<'_> = NamedNodeRef::new_unchecked("urn:vg:inferred");

/// The literal graph name mapping to the default graph.
pub const DEFAULT_GRAPH_NAME: &str = "default";

/// A term as it crosses the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SerializedTerm {
    pub term_type: SerializedTermType,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializedTermType {
    NamedNode,
    BlankNode,
    Literal,
    DefaultGraph,
}

/// A quad as it crosses the channel. An absent graph falls back to the
/// request's target graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SerializedQuad {
    pub subject: SerializedTerm,
    pub predicate: SerializedTerm,
    pub object: SerializedTerm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<SerializedTerm>,
}

impl SerializedTerm {
    pub fn named(value: impl Into<String>) -> Self {
        Self {
            term_type: SerializedTermType::NamedNode,
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn blank(value: impl Into<String>) -> Self {
        Self {
            term_type: SerializedTermType::BlankNode,
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            term_type: SerializedTermType::Literal,
            value: value.into(),
            datatype: None,
            language: None,
        }
    }
}

impl From<&Term> for SerializedTerm {
    fn from(term: &Term) -> Self {
        match term {
            Term::NamedNode(n) => Self::named(n.as_str()),
            Term::BlankNode(b) => Self::blank(b.as_str()),
            Term::Literal(l) => {
                let mut out = Self::literal(l.value());
                if let Some(language) = l.language() {
                    out.language = Some(language.to_owned());
                } else if l.datatype() != xsd::STRING {
                    out.datatype = Some(l.datatype().as_str().to_owned());
                }
                out
            }
        }
    }
}

impl From<&NamedOrBlankNode> for SerializedTerm {
    fn from(node: &NamedOrBlankNode) -> Self {
        match node {
            NamedOrBlankNode::NamedNode(n) => Self::named(n.as_str()),
            NamedOrBlankNode::BlankNode(b) => Self::blank(b.as_str()),
        }
    }
}

impl From<&GraphName> for SerializedTerm {
    fn from(graph: &GraphName) -> Self {
        match graph {
            GraphName::NamedNode(n) => Self::named(n.as_str()),
            GraphName::BlankNode(b) => Self::blank(b.as_str()),
            GraphName::DefaultGraph => Self {
                term_type: SerializedTermType::DefaultGraph,
                value: String::new(),
                datatype: None,
                language: None,
            },
        }
    }
}

impl From<&Quad> for SerializedQuad {
    fn from(quad: &Quad) -> Self {
        Self {
            subject: (&quad.subject).into(),
            predicate: SerializedTerm::named(quad.predicate.as_str()),
            object: (&quad.object).into(),
            graph: Some((&quad.graph_name).into()),
        }
    }
}

fn named_node(value: &str) -> Result<NamedNode, ProtocolError> {
    NamedNode::new(value).map_err(|e| ProtocolError::InvalidIri(format!("{value}: {e}")))
}

fn blank_node(value: &str) -> Result<BlankNode, ProtocolError> {
    let value = value.strip_prefix("_:").unwrap_or(value);
    BlankNode::new(value)
        .map_err(|e| ProtocolError::BadPayload(format!("invalid blank node id {value}: {e}")))
}

fn literal(term: &SerializedTerm) -> Result<Literal, ProtocolError> {
    if let Some(language) = &term.language {
        if term
            .datatype
            .as_deref()
            .is_some_and(|dt| dt != "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString")
        {
            return Err(ProtocolError::BadPayload(
                "a language-tagged literal cannot also carry a datatype".into(),
            ));
        }
        return Literal::new_language_tagged_literal(&term.value, language)
            .map_err(|e| ProtocolError::BadPayload(format!("invalid language tag: {e}")));
    }
    Ok(match term.datatype.as_deref() {
        None | Some("http://www.w3.org/2001/XMLSchema#string") => {
            Literal::new_simple_literal(&term.value)
        }
        Some(datatype) => Literal::new_typed_literal(&term.value, named_node(datatype)?),
    })
}

/// Converts a serialized term into a subject. Literals are rejected.
pub fn subject_term(term: &SerializedTerm) -> Result<NamedOrBlankNode, ProtocolError> {
    match term.term_type {
        SerializedTermType::NamedNode => Ok(named_node(&term.value)?.into()),
        SerializedTermType::BlankNode => Ok(blank_node(&term.value)?.into()),
        SerializedTermType::Literal => Err(ProtocolError::TermPosition {
            term: "Literal",
            position: "subject",
        }),
        SerializedTermType::DefaultGraph => Err(ProtocolError::TermPosition {
            term: "DefaultGraph",
            position: "subject",
        }),
    }
}

/// Converts a serialized term into a predicate. Only IRIs are allowed.
pub fn predicate_term(term: &SerializedTerm) -> Result<NamedNode, ProtocolError> {
    match term.term_type {
        SerializedTermType::NamedNode => named_node(&term.value),
        SerializedTermType::BlankNode => Err(ProtocolError::TermPosition {
            term: "BlankNode",
            position: "predicate",
        }),
        SerializedTermType::Literal => Err(ProtocolError::TermPosition {
            term: "Literal",
            position: "predicate",
        }),
        SerializedTermType::DefaultGraph => Err(ProtocolError::TermPosition {
            term: "DefaultGraph",
            position: "predicate",
        }),
    }
}

/// Converts a serialized term into an object. Everything but DefaultGraph.
pub fn object_term(term: &SerializedTerm) -> Result<Term, ProtocolError> {
    match term.term_type {
        SerializedTermType::NamedNode => Ok(named_node(&term.value)?.into()),
        SerializedTermType::BlankNode => Ok(blank_node(&term.value)?.into()),
        SerializedTermType::Literal => Ok(literal(term)?.into()),
        SerializedTermType::DefaultGraph => Err(ProtocolError::TermPosition {
            term: "DefaultGraph",
            position: "object",
        }),
    }
}

/// Converts an optional serialized graph term, falling back to `fallback`.
/// Any non-named term collapses to the default graph.
pub fn graph_term(
    term: Option<&SerializedTerm>,
    fallback: &GraphName,
) -> Result<GraphName, ProtocolError> {
    let Some(term) = term else {
        return Ok(fallback.clone());
    };
    Ok(match term.term_type {
        SerializedTermType::NamedNode => {
            if term.value == DEFAULT_GRAPH_NAME {
                GraphName::DefaultGraph
            } else {
                named_node(&term.value)?.into()
            }
        }
        SerializedTermType::BlankNode
        | SerializedTermType::Literal
        | SerializedTermType::DefaultGraph => GraphName::DefaultGraph,
    })
}

/// Builds a [`Quad`] out of its serialized form, with full position checks.
pub fn quad_from_serialized(
    quad: &SerializedQuad,
    fallback_graph: &GraphName,
) -> Result<Quad, ProtocolError> {
    Ok(Quad::new(
        subject_term(&quad.subject)?,
        predicate_term(&quad.predicate)?,
        object_term(&quad.object)?,
        graph_term(quad.graph.as_ref(), fallback_graph)?,
    ))
}

/// Resolves a graph name string. `"default"` (and the empty string) name the
/// default graph, everything else must be an absolute IRI.
pub fn resolve_graph_name(name: &str) -> Result<GraphName, ProtocolError> {
    if name.is_empty() || name == DEFAULT_GRAPH_NAME {
        return Ok(GraphName::DefaultGraph);
    }
    NamedNode::new(name)
        .map(GraphName::from)
        .map_err(|e| ProtocolError::InvalidGraphName(format!("{name}: {e}")))
}

/// Display form used in host-facing maps: `"default"` for the default graph.
pub fn graph_display(graph: &GraphName) -> String {
    match graph {
        GraphName::NamedNode(n) => n.as_str().to_owned(),
        GraphName::BlankNode(b) => b.to_string(),
        GraphName::DefaultGraph => DEFAULT_GRAPH_NAME.to_owned(),
    }
}

/// Display form for touched-subject lists: IRIs bare, blank nodes with `_:`.
pub fn subject_display(subject: &NamedOrBlankNode) -> String {
    match subject {
        NamedOrBlankNode::NamedNode(n) => n.as_str().to_owned(),
        NamedOrBlankNode::BlankNode(b) => b.to_string(),
    }
}

/// Parses a touched-subject key back into a subject term.
pub fn subject_from_display(value: &str) -> Result<NamedOrBlankNode, ProtocolError> {
    if let Some(id) = value.strip_prefix("_:") {
        Ok(blank_node(id)?.into())
    } else {
        Ok(named_node(value)?.into())
    }
}

/// True if the string looks like an IRI per the loose coercion rule: a
/// lower-case scheme followed by `:`.
fn looks_like_iri(value: &str) -> bool {
    let Some(colon) = value.find(':') else {
        return false;
    };
    let scheme = &value[..colon];
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '-'))
}

/// Coerces a bare string into a subject per the ingress rules.
pub fn coerce_subject(value: &str) -> Result<NamedOrBlankNode, ProtocolError> {
    if let Some(id) = value.strip_prefix("_:") {
        Ok(blank_node(id)?.into())
    } else {
        Ok(named_node(value)?.into())
    }
}

/// Coerces a bare string into an object: IRIs and blank nodes by shape,
/// everything else a plain literal.
pub fn coerce_object(value: &str) -> Term {
    if let Some(id) = value.strip_prefix("_:") {
        if let Ok(node) = BlankNode::new(id) {
            return node.into();
        }
    } else if looks_like_iri(value) {
        if let Ok(node) = NamedNode::new(value) {
            return node.into();
        }
    }
    Literal::new_simple_literal(value).into()
}

/// Stable `s|p|o|g` dedup key. The object keeps its full literal form so
/// datatype and language participate in identity.
pub fn quad_key(quad: &Quad) -> String {
    format!(
        "{}|{}|{}|{}",
        quad.subject,
        quad.predicate,
        quad.object,
        match quad.graph_name.as_ref() {
            GraphNameRef::DefaultGraph => String::new(),
            g => g.to_string(),
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xsd_string_is_elided_on_serialization() {
        let lit: Term = Literal::new_typed_literal("a", xsd::STRING).into();
        let serialized = SerializedTerm::from(&lit);
        assert_eq!(serialized.datatype, None);
        assert_eq!(serialized.language, None);
    }

    #[test]
    fn language_literal_round_trips_without_datatype() {
        let term = SerializedTerm {
            language: Some("en".into()),
            ..SerializedTerm::literal("hello")
        };
        let object = object_term(&term).unwrap();
        let back = SerializedTerm::from(&object);
        assert_eq!(back.language.as_deref(), Some("en"));
        assert_eq!(back.datatype, None);
    }

    #[test]
    fn blank_node_prefix_is_stripped_on_ingress() {
        let term = SerializedTerm::blank("_:b0");
        let subject = subject_term(&term).unwrap();
        assert_eq!(subject_display(&subject), "_:b0");
    }

    #[test]
    fn literal_in_predicate_position_is_rejected() {
        let err = predicate_term(&SerializedTerm::literal("x")).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TermPosition {
                term: "Literal",
                position: "predicate"
            }
        ));
    }

    #[test]
    fn graph_position_collapses_non_named_terms() {
        let fallback = GraphName::from(DATA_GRAPH.into_owned());
        let g = graph_term(Some(&SerializedTerm::literal("x")), &fallback).unwrap();
        assert_eq!(g, GraphName::DefaultGraph);
        assert_eq!(graph_term(None, &fallback).unwrap(), fallback);
    }

    #[test]
    fn coercion_follows_scheme_shape() {
        assert!(matches!(
            coerce_object("http://example.org/a"),
            Term::NamedNode(_)
        ));
        assert!(matches!(coerce_object("_:b1"), Term::BlankNode(_)));
        assert!(matches!(coerce_object("42 apples"), Term::Literal(_)));
        assert!(!looks_like_iri("Not:AnIri"));
    }

    #[test]
    fn quad_key_distinguishes_datatype_and_graph() {
        let s = NamedNode::new("http://example.org/s").unwrap();
        let p = NamedNode::new("http://example.org/p").unwrap();
        let plain = Quad::new(
            s.clone(),
            p.clone(),
            Literal::new_simple_literal("1"),
            GraphName::DefaultGraph,
        );
        let typed = Quad::new(
            s,
            p,
            Literal::new_typed_literal("1", xsd::INTEGER),
            GraphName::DefaultGraph,
        );
        assert_ne!(quad_key(&plain), quad_key(&typed));
    }

    #[test]
    fn resolve_graph_name_handles_default() {
        assert_eq!(
            resolve_graph_name("default").unwrap(),
            GraphName::DefaultGraph
        );
        assert_eq!(
            graph_display(&resolve_graph_name("urn:vg:data").unwrap()),
            "urn:vg:data"
        );
        assert!(resolve_graph_name("not an iri").is_err());
    }
}
