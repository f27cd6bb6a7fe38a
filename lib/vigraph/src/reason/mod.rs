//! Reasoner harness: rule-bundle resolution, validation-result extraction
//! and inference classification. The worker drives the pieces and owns the
//! stage/result emission.

pub mod engine;

use crate::error::FetchError;
use crate::ingest::{DocumentFetcher, FetchRequest, RULES_ACCEPT, RULE_FETCH_TIMEOUT};
use crate::model::subject_display;
use crate::protocol::{Inference, InferenceKind, ValidationIssue};
use crate::store::QuadStore;
use crate::vocab::shacl;
use oxrdf::vocab::rdf;
use oxrdf::{Quad, Term};
use tracing::debug;

/// Confidence reported for `rdf:type` inferences.
pub const CLASS_CONFIDENCE: f64 = 0.95;
/// Confidence reported for every other inferred statement.
pub const RELATIONSHIP_CONFIDENCE: f64 = 0.9;

/// Warning text when no rule bundle yielded anything to chain.
pub const REASONER_UNAVAILABLE: &str =
    "Reasoner unavailable; no inferred triples were generated.";

/// Candidate URLs for one bundle name, most specific first.
pub fn candidate_urls(base_url: Option<&str>, name: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(base) = base_url {
        let base = if base.ends_with('/') {
            base.to_owned()
        } else {
            format!("{base}/")
        };
        if let Ok(base) = url::Url::parse(&base) {
            let relatives = [
                format!("reasoning-rules/{name}"),
                format!("/reasoning-rules/{name}"),
                name.to_owned(),
            ];
            for relative in &relatives {
                if let Ok(joined) = base.join(relative) {
                    candidates.push(joined.to_string());
                }
            }
        }
    }
    candidates.push(format!("/reasoning-rules/{name}"));
    candidates.push(name.to_owned());
    candidates.dedup();
    candidates
}

/// A resolved bundle: the URL that answered and its body.
#[derive(Debug)]
pub struct FetchedRuleset {
    pub url: String,
    pub body: Vec<u8>,
}

/// Tries each candidate in order; the first 2xx with a non-empty body wins.
pub async fn fetch_ruleset(
    fetcher: &dyn DocumentFetcher,
    base_url: Option<&str>,
    name: &str,
) -> Result<FetchedRuleset, FetchError> {
    let mut last_error = FetchError::Http {
        url: name.to_owned(),
        message: "no candidate URL answered".to_owned(),
    };
    for candidate in candidate_urls(base_url, name) {
        let request = FetchRequest {
            url: candidate.clone(),
            accept: RULES_ACCEPT,
            headers: Vec::new(),
            timeout: RULE_FETCH_TIMEOUT,
        };
        match fetcher.fetch(request).await {
            Ok(document) if (200..300).contains(&document.status) && !document.body.is_empty() => {
                return Ok(FetchedRuleset {
                    url: document.url,
                    body: document.body,
                });
            }
            Ok(document) => {
                debug!(url = %candidate, status = document.status, "ruleset candidate rejected");
                last_error = FetchError::Http {
                    url: candidate,
                    message: format!("status {} or empty body", document.status),
                };
            }
            Err(error) => {
                debug!(url = %candidate, %error, "ruleset candidate failed");
                last_error = error;
            }
        }
    }
    Err(last_error)
}

fn term_display(term: &Term) -> String {
    match term {
        Term::NamedNode(n) => n.as_str().to_owned(),
        Term::BlankNode(b) => b.to_string(),
        Term::Literal(l) => l.value().to_owned(),
    }
}

/// Splits the inferred facts into SHACL-style validation issues.
///
/// A quad `?r rdf:type sh:ValidationResult` marks `?r` as a violation record;
/// its `sh:focusNode`, `sh:resultMessage` and `sh:resultSeverity` are read
/// from the working view. Severity IRIs containing `Violation` land in
/// `errors`, everything else in `warnings`, one entry per focus node.
pub fn extract_validation_issues(
    view: &QuadStore,
    inferred: &[Quad],
) -> (Vec<ValidationIssue>, Vec<ValidationIssue>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let validation_result: Term = shacl::VALIDATION_RESULT.into_owned().into();
    let rdf_type = rdf::TYPE.into_owned();
    let focus_node = shacl::FOCUS_NODE.into_owned();
    let result_message = shacl::RESULT_MESSAGE.into_owned();
    let result_severity = shacl::RESULT_SEVERITY.into_owned();

    for quad in inferred {
        if quad.predicate != rdf_type || quad.object != validation_result {
            continue;
        }
        let record = &quad.subject;
        let message = view
            .quads_for_pattern(Some(record), Some(&result_message), None, None)
            .into_iter()
            .find_map(|q| match q.object {
                Term::Literal(l) => Some(l.value().to_owned()),
                _ => None,
            });
        let severity = view
            .quads_for_pattern(Some(record), Some(&result_severity), None, None)
            .into_iter()
            .find_map(|q| match q.object {
                Term::NamedNode(n) => Some(n.as_str().to_owned()),
                _ => None,
            });
        let is_error = severity
            .as_deref()
            .is_some_and(|iri| iri.contains("Violation"));

        let focus_nodes: Vec<String> = view
            .quads_for_pattern(Some(record), Some(&focus_node), None, None)
            .iter()
            .map(|q| term_display(&q.object))
            .collect();

        let mut push = |issue: ValidationIssue| {
            if is_error {
                errors.push(issue);
            } else {
                warnings.push(issue);
            }
        };
        if focus_nodes.is_empty() {
            push(ValidationIssue {
                focus_node: None,
                message: message.clone(),
                severity: severity.clone(),
            });
        } else {
            for node in focus_nodes {
                push(ValidationIssue {
                    focus_node: Some(node),
                    message: message.clone(),
                    severity: severity.clone(),
                });
            }
        }
    }
    (errors, warnings)
}

/// Classifies inferred facts for the host: `rdf:type` statements are `class`
/// inferences, everything else `relationship`.
pub fn classify_inferences(inferred: &[Quad]) -> Vec<Inference> {
    let rdf_type = rdf::TYPE.into_owned();
    inferred
        .iter()
        .map(|quad| {
            let kind = if quad.predicate == rdf_type {
                InferenceKind::Class
            } else {
                InferenceKind::Relationship
            };
            Inference {
                kind,
                subject: subject_display(&quad.subject),
                predicate: quad.predicate.as_str().to_owned(),
                object: term_display(&quad.object),
                confidence: match kind {
                    InferenceKind::Class => CLASS_CONFIDENCE,
                    InferenceKind::Relationship => RELATIONSHIP_CONFIDENCE,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{GraphName, Literal, NamedNode};

    fn ex(local: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{local}")).unwrap()
    }

    #[test]
    fn candidate_ladder_is_base_url_joined() {
        let candidates = candidate_urls(Some("http://host/app/"), "shapes.n3");
        assert_eq!(
            candidates,
            vec![
                "http://host/app/reasoning-rules/shapes.n3",
                "http://host/reasoning-rules/shapes.n3",
                "http://host/app/shapes.n3",
                "/reasoning-rules/shapes.n3",
                "shapes.n3",
            ]
        );
    }

    #[test]
    fn candidate_ladder_without_base_keeps_relative_forms() {
        let candidates = candidate_urls(None, "core");
        assert_eq!(candidates, vec!["/reasoning-rules/core", "core"]);
    }

    #[test]
    fn violation_severity_classifies_as_error() {
        let mut view = QuadStore::new();
        let record = ex("r1");
        let graph = GraphName::DefaultGraph;
        let quads = [
            Quad::new(
                record.clone(),
                rdf::TYPE,
                shacl::VALIDATION_RESULT,
                graph.clone(),
            ),
            Quad::new(record.clone(), shacl::FOCUS_NODE, ex("a"), graph.clone()),
            Quad::new(record.clone(), shacl::FOCUS_NODE, ex("b"), graph.clone()),
            Quad::new(
                record.clone(),
                shacl::RESULT_MESSAGE,
                Literal::new_simple_literal("missing label"),
                graph.clone(),
            ),
            Quad::new(record, shacl::RESULT_SEVERITY, shacl::VIOLATION, graph),
        ];
        for quad in &quads {
            view.insert(quad);
        }
        let (errors, warnings) = extract_validation_issues(&view, &quads);
        assert_eq!(errors.len(), 2);
        assert!(warnings.is_empty());
        assert_eq!(errors[0].focus_node.as_deref(), Some("http://example.org/a"));
        assert_eq!(errors[0].message.as_deref(), Some("missing label"));
    }

    #[test]
    fn non_violation_severity_is_a_warning() {
        let mut view = QuadStore::new();
        let record = ex("r2");
        let graph = GraphName::DefaultGraph;
        let warning_severity = NamedNode::new("http://www.w3.org/ns/shacl#Warning").unwrap();
        let quads = [
            Quad::new(
                record.clone(),
                rdf::TYPE,
                shacl::VALIDATION_RESULT,
                graph.clone(),
            ),
            Quad::new(record.clone(), shacl::FOCUS_NODE, ex("a"), graph.clone()),
            Quad::new(record, shacl::RESULT_SEVERITY, warning_severity, graph),
        ];
        for quad in &quads {
            view.insert(quad);
        }
        let (errors, warnings) = extract_validation_issues(&view, &quads);
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn inference_classification_and_confidence() {
        let graph = GraphName::DefaultGraph;
        let inferred = [
            Quad::new(ex("a"), rdf::TYPE, ex("A"), graph.clone()),
            Quad::new(ex("a"), ex("related"), ex("b"), graph),
        ];
        let inferences = classify_inferences(&inferred);
        assert_eq!(inferences[0].kind, InferenceKind::Class);
        assert_eq!(inferences[0].confidence, CLASS_CONFIDENCE);
        assert_eq!(inferences[1].kind, InferenceKind::Relationship);
        assert_eq!(inferences[1].confidence, RELATIONSHIP_CONFIDENCE);
    }
}
