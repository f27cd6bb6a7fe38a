//! Ready to use [`NamedNodeRef`](oxrdf::NamedNodeRef)s for the vocabularies
//! the worker interprets beyond what `oxrdf::vocab` ships.

pub mod shacl {
    //! [SHACL](https://www.w3.org/TR/shacl/) validation-report vocabulary.
    use oxrdf::NamedNodeRef;

    /// The SHACL namespace.
    pub const NAMESPACE: &str = "http://www.w3.org/ns/shacl#";

    /// The class of validation results.
    pub const VALIDATION_RESULT: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/shacl#ValidationResult");
    /// The node a validation result is about.
    pub const FOCUS_NODE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/shacl#focusNode");
    /// Human readable message of a validation result.
    pub const RESULT_MESSAGE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/shacl#resultMessage");
    /// Severity of a validation result.
    pub const RESULT_SEVERITY: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/shacl#resultSeverity");
    /// The `sh:Violation` severity.
    pub const VIOLATION: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/ns/shacl#Violation");
}

pub mod log {
    //! The [SWAP log](https://www.w3.org/2000/10/swap/log#) vocabulary used by
    //! N3 rules.
    use oxrdf::NamedNodeRef;

    /// Logical implication between two formulae.
    pub const IMPLIES: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2000/10/swap/log#implies");
}

/// Well-known prefix bindings shared by the default namespace registry and
/// the blacklist candidate expansion.
pub const WELL_KNOWN_PREFIXES: [(&str, &str); 5] = [
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("xml", "http://www.w3.org/XML/1998/namespace"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
];

/// Looks up a well-known namespace for a prefix.
pub fn well_known_namespace(prefix: &str) -> Option<&'static str> {
    WELL_KNOWN_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, ns)| *ns)
}
