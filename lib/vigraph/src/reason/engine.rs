//! N3 rule extraction and forward chaining.
//!
//! Rule bundles are N3 documents. `N3Parser` surfaces each formula as a
//! blank-node-named graph, so a rule `{ premises } => { conclusions }` arrives
//! as a `log:implies` statement between two formula blank nodes plus the
//! formula triples themselves. Premise variables bind universally; blank
//! nodes in premises match like variables, and blank nodes in conclusions are
//! skolemised deterministically from the firing's bindings. Every fact the
//! chainer would assert is captured as `(s, p, o, sourceGraphKey)` and
//! deduplicated on that full key, where the source graph is the graph of the
//! quad that matched the rule's first premise.

use crate::model::quad_key;
use crate::store::QuadStore;
use crate::vocab::log;
use oxrdf::{BlankNode, GraphName, Literal, NamedNode, NamedOrBlankNode, Quad, Term};
use oxttl::n3::{N3Parser, N3Quad, N3Term};
use oxttl::TurtleParseError;
use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleParseError {
    #[error(transparent)]
    Syntax(#[from] TurtleParseError),
    #[error("invalid rule base IRI: {0}")]
    BaseIri(#[from] oxiri::IriParseError),
}

/// One position of a triple pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternTerm {
    Named(NamedNode),
    Literal(Literal),
    Variable(String),
}

impl PatternTerm {
    fn from_n3(term: &N3Term) -> Option<Self> {
        match term {
            N3Term::NamedNode(n) => Some(Self::Named(n.clone())),
            N3Term::Literal(l) => Some(Self::Literal(l.clone())),
            N3Term::Variable(v) => Some(Self::Variable(format!("?{}", v.as_str()))),
            // An existential inside a formula; chained like a variable.
            N3Term::BlankNode(b) => Some(Self::Variable(format!("_:{}", b.as_str()))),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriplePattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
}

/// `{ premises } => { conclusions }`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub premises: Vec<TriplePattern>,
    pub conclusions: Vec<TriplePattern>,
}

/// Outcome of parsing one rule bundle.
#[derive(Debug, Default)]
pub struct ParsedRules {
    pub rules: Vec<Rule>,
    /// Every N3 quad of the bundle, rule scaffolding included.
    pub quad_count: usize,
}

/// Extracts rules from an N3 document.
pub fn parse_rules(content: &[u8], base_iri: Option<&str>) -> Result<ParsedRules, RuleParseError> {
    let mut parser = N3Parser::new();
    if let Some(base) = base_iri {
        parser = parser.with_base_iri(base)?;
    }
    let mut quads = Vec::new();
    for quad in parser.for_reader(content) {
        quads.push(quad?);
    }

    let mut formulas: FxHashMap<String, Vec<&N3Quad>> = FxHashMap::default();
    for quad in &quads {
        if let GraphName::BlankNode(formula) = &quad.graph_name {
            formulas
                .entry(formula.as_str().to_owned())
                .or_default()
                .push(quad);
        }
    }

    let implies = N3Term::NamedNode(log::IMPLIES.into_owned());
    let mut rules = Vec::new();
    for quad in &quads {
        if quad.graph_name != GraphName::DefaultGraph || quad.predicate != implies {
            continue;
        }
        let (N3Term::BlankNode(antecedent), N3Term::BlankNode(consequent)) =
            (&quad.subject, &quad.object)
        else {
            continue;
        };
        let premises = formula_patterns(formulas.get(antecedent.as_str()));
        let conclusions = formula_patterns(formulas.get(consequent.as_str()));
        if conclusions.is_empty() {
            continue;
        }
        rules.push(Rule {
            premises,
            conclusions,
        });
    }
    Ok(ParsedRules {
        rules,
        quad_count: quads.len(),
    })
}

fn formula_patterns(quads: Option<&Vec<&N3Quad>>) -> Vec<TriplePattern> {
    let Some(quads) = quads else {
        return Vec::new();
    };
    quads
        .iter()
        .filter_map(|quad| {
            Some(TriplePattern {
                subject: PatternTerm::from_n3(&quad.subject)?,
                predicate: PatternTerm::from_n3(&quad.predicate)?,
                object: PatternTerm::from_n3(&quad.object)?,
            })
        })
        .collect()
}

/// Fixpoint guard rails.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Maximum number of fixpoint rounds.
    pub max_iterations: usize,
    /// Maximum number of derived facts to materialize.
    pub max_inferred_triples: usize,
    /// Wall-clock ceiling for one run.
    pub timeout: Option<Duration>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            max_inferred_triples: 100_000,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// What the chainer did to the working store.
#[derive(Debug, Default)]
pub struct ChainOutcome {
    /// Every fact the chainer asserted, in derivation order. The graph name
    /// is the source graph key: the graph of the quad that matched the
    /// rule's first premise (default graph for premise-free rules).
    /// Re-assertions of facts already present in their source graph are
    /// captured too, so callers can re-home them.
    pub inserted: Vec<Quad>,
    pub rounds: usize,
    /// Set when a guard stopped the run before fixpoint.
    pub guard: Option<String>,
}

type Bindings = FxHashMap<String, Term>;

type DerivedFact = (NamedOrBlankNode, NamedNode, Term, GraphName);

/// A binding set under construction, tagged with the graph of the quad that
/// matched the first premise.
struct PartialMatch {
    binding: Bindings,
    source_graph: Option<GraphName>,
}

/// Forward-chaining engine over a working [`QuadStore`].
#[derive(Debug)]
pub struct ForwardChainer {
    rules: Vec<Rule>,
    config: ChainConfig,
}

impl ForwardChainer {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self::with_config(rules, ChainConfig::default())
    }

    pub fn with_config(rules: Vec<Rule>, config: ChainConfig) -> Self {
        Self { rules, config }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Runs to fixpoint (or a guard). Every assertion goes through a single
    /// capture point deduplicated on the full `s|p|o|graphKey`, so the caller
    /// receives the complete capture in derivation order.
    pub fn run(&self, store: &mut QuadStore) -> ChainOutcome {
        let start = Instant::now();
        let mut outcome = ChainOutcome::default();
        let mut captured: FxHashSet<String> = FxHashSet::default();

        loop {
            if outcome.rounds >= self.config.max_iterations {
                outcome.guard = Some(format!(
                    "fixpoint not reached after {} rounds",
                    outcome.rounds
                ));
                return outcome;
            }
            if let Some(timeout) = self.config.timeout {
                if start.elapsed() >= timeout {
                    outcome.guard = Some(format!("reasoning timeout exceeded ({timeout:?})"));
                    return outcome;
                }
            }
            outcome.rounds += 1;

            let mut round_facts = Vec::new();
            for (index, rule) in self.rules.iter().enumerate() {
                fire(rule, index, store, &mut round_facts);
            }

            let mut captured_this_round = 0;
            for (subject, predicate, object, graph) in round_facts {
                let quad = Quad::new(subject, predicate, object, graph);
                if !captured.insert(quad_key(&quad)) {
                    continue;
                }
                store.insert(&quad);
                outcome.inserted.push(quad);
                captured_this_round += 1;
                if outcome.inserted.len() >= self.config.max_inferred_triples {
                    outcome.guard = Some(format!(
                        "materialization limit exceeded ({} facts)",
                        outcome.inserted.len()
                    ));
                    return outcome;
                }
            }
            if captured_this_round == 0 {
                return outcome;
            }
        }
    }
}

fn fire(rule: &Rule, rule_index: usize, store: &QuadStore, facts: &mut Vec<DerivedFact>) {
    let mut matches = vec![PartialMatch {
        binding: Bindings::default(),
        source_graph: None,
    }];
    for premise in &rule.premises {
        let mut extended = Vec::new();
        for partial in &matches {
            match_premise(store, premise, partial, &mut extended);
        }
        matches = extended;
        if matches.is_empty() {
            return;
        }
    }
    for partial in &matches {
        let source = partial
            .source_graph
            .clone()
            .unwrap_or(GraphName::DefaultGraph);
        let mut skolems: FxHashMap<&str, BlankNode> = FxHashMap::default();
        for conclusion in &rule.conclusions {
            let Some((subject, predicate, object)) =
                instantiate(conclusion, rule_index, &partial.binding, &mut skolems)
            else {
                continue;
            };
            facts.push((subject, predicate, object, source.clone()));
        }
    }
}

fn resolved(term: &PatternTerm, binding: &Bindings) -> Option<Term> {
    match term {
        PatternTerm::Named(n) => Some(n.clone().into()),
        PatternTerm::Literal(l) => Some(l.clone().into()),
        PatternTerm::Variable(name) => binding.get(name).cloned(),
    }
}

fn match_premise(
    store: &QuadStore,
    premise: &TriplePattern,
    partial: &PartialMatch,
    out: &mut Vec<PartialMatch>,
) {
    let subject = resolved(&premise.subject, &partial.binding);
    let predicate = resolved(&premise.predicate, &partial.binding);
    let object = resolved(&premise.object, &partial.binding);

    let subject_filter = match &subject {
        Some(Term::NamedNode(n)) => Some(NamedOrBlankNode::from(n.clone())),
        Some(Term::BlankNode(b)) => Some(NamedOrBlankNode::from(b.clone())),
        Some(Term::Literal(_)) => return,
        None => None,
    };
    let predicate_filter = match &predicate {
        Some(Term::NamedNode(n)) => Some(n.clone()),
        Some(_) => return,
        None => None,
    };

    for quad in store.quads_for_pattern(
        subject_filter.as_ref(),
        predicate_filter.as_ref(),
        object.as_ref(),
        None,
    ) {
        let mut extended = partial.binding.clone();
        let subject_term: Term = match &quad.subject {
            NamedOrBlankNode::NamedNode(n) => n.clone().into(),
            NamedOrBlankNode::BlankNode(b) => b.clone().into(),
        };
        if bind(&mut extended, &premise.subject, subject_term)
            && bind(&mut extended, &premise.predicate, quad.predicate.clone().into())
            && bind(&mut extended, &premise.object, quad.object.clone())
        {
            out.push(PartialMatch {
                binding: extended,
                source_graph: partial
                    .source_graph
                    .clone()
                    .or_else(|| Some(quad.graph_name.clone())),
            });
        }
    }
}

/// Records a variable binding; rejects values conflicting with an earlier one.
fn bind(binding: &mut Bindings, pattern: &PatternTerm, value: Term) -> bool {
    let PatternTerm::Variable(name) = pattern else {
        return true;
    };
    match binding.get(name) {
        Some(existing) => *existing == value,
        None => {
            binding.insert(name.clone(), value);
            true
        }
    }
}

/// A skolem node as a function of the rule and the firing's bindings, so a
/// later re-firing derives the same fact instead of a fresh one.
fn skolem_node(rule_index: usize, binding: &Bindings, name: &str) -> BlankNode {
    let mut hasher = DefaultHasher::new();
    rule_index.hash(&mut hasher);
    let mut keys: Vec<&String> = binding.keys().collect();
    keys.sort();
    for key in keys {
        key.hash(&mut hasher);
        binding[key].to_string().hash(&mut hasher);
    }
    name.hash(&mut hasher);
    BlankNode::new_unchecked(format!("sk{:016x}", hasher.finish()))
}

fn instantiate<'a>(
    pattern: &'a TriplePattern,
    rule_index: usize,
    binding: &Bindings,
    skolems: &mut FxHashMap<&'a str, BlankNode>,
) -> Option<(NamedOrBlankNode, NamedNode, Term)> {
    let mut term_for = |position: &'a PatternTerm| -> Option<Term> {
        match position {
            PatternTerm::Named(n) => Some(n.clone().into()),
            PatternTerm::Literal(l) => Some(l.clone().into()),
            PatternTerm::Variable(name) => match binding.get(name.as_str()) {
                Some(bound) => Some(bound.clone()),
                None => Some(
                    skolems
                        .entry(name.as_str())
                        .or_insert_with(|| skolem_node(rule_index, binding, name))
                        .clone()
                        .into(),
                ),
            },
        }
    };

    let subject = match term_for(&pattern.subject)? {
        Term::NamedNode(n) => NamedOrBlankNode::from(n),
        Term::BlankNode(b) => NamedOrBlankNode::from(b),
        Term::Literal(_) => return None,
    };
    let predicate = match term_for(&pattern.predicate)? {
        Term::NamedNode(n) => n,
        _ => return None,
    };
    let object = term_for(&pattern.object)?;
    Some((subject, predicate, object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::vocab::rdf;

    const SUBCLASS_RULE: &str = r#"
@prefix ex: <http://example.org/> .
{ ?x a ex:B . } => { ?x a ex:A . } .
"#;

    fn ex(local: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{local}")).unwrap()
    }

    fn data_graph() -> GraphName {
        crate::model::DATA_GRAPH.into_owned().into()
    }

    fn ontologies_graph() -> GraphName {
        crate::model::ONTOLOGIES_GRAPH.into_owned().into()
    }

    #[test]
    fn implies_statement_becomes_a_rule() {
        let parsed = parse_rules(SUBCLASS_RULE.as_bytes(), None).unwrap();
        assert_eq!(parsed.rules.len(), 1);
        assert_eq!(parsed.rules[0].premises.len(), 1);
        assert_eq!(parsed.rules[0].conclusions.len(), 1);
        // The implication itself plus one triple per formula.
        assert_eq!(parsed.quad_count, 3);
    }

    #[test]
    fn chaining_derives_the_superclass_in_its_source_graph() {
        let parsed = parse_rules(SUBCLASS_RULE.as_bytes(), None).unwrap();
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), rdf::TYPE, ex("B"), data_graph()));

        let chainer = ForwardChainer::new(parsed.rules);
        let outcome = chainer.run(&mut store);
        assert!(outcome.guard.is_none());
        assert_eq!(outcome.inserted.len(), 1);
        let fact = &outcome.inserted[0];
        assert_eq!(fact.subject, NamedOrBlankNode::from(ex("a")));
        assert_eq!(fact.object, Term::from(ex("A")));
        // The capture carries the graph of the matched premise.
        assert_eq!(fact.graph_name, data_graph());
        assert_eq!(store.len(), 2);

        // A re-run re-captures the fact (it would be asserted again) but
        // leaves the store unchanged.
        let again = ForwardChainer::new(
            parse_rules(SUBCLASS_RULE.as_bytes(), None).unwrap().rules,
        )
        .run(&mut store);
        assert_eq!(again.inserted.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn same_triple_in_another_graph_is_still_derived() {
        let parsed = parse_rules(SUBCLASS_RULE.as_bytes(), None).unwrap();
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), rdf::TYPE, ex("B"), data_graph()));
        // The conclusion already holds in the ontologies graph; dedup is on
        // the full graph key, so the data-graph derivation must survive.
        store.insert(&Quad::new(ex("a"), rdf::TYPE, ex("A"), ontologies_graph()));

        let outcome = ForwardChainer::new(parsed.rules).run(&mut store);
        assert!(outcome.guard.is_none());
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.inserted[0].graph_name, data_graph());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn re_emitting_rule_captures_existing_facts_once() {
        let rule = r#"
@prefix ex: <http://example.org/> .
{ ?x a ex:B . } => { ?x a ex:B . ?x a ex:A . } .
"#;
        let parsed = parse_rules(rule.as_bytes(), None).unwrap();
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), rdf::TYPE, ex("B"), data_graph()));

        let outcome = ForwardChainer::new(parsed.rules).run(&mut store);
        assert!(outcome.guard.is_none());
        // Both conclusions are captured, the re-emitted premise included.
        assert_eq!(outcome.inserted.len(), 2);
        assert!(outcome
            .inserted
            .iter()
            .all(|quad| quad.graph_name == data_graph()));
        // The re-emitted fact was already stored; only ex:A is new.
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn transitive_rule_reaches_fixpoint() {
        let rule = r#"
@prefix ex: <http://example.org/> .
{ ?x ex:ancestor ?y . ?y ex:ancestor ?z . } => { ?x ex:ancestor ?z . } .
"#;
        let parsed = parse_rules(rule.as_bytes(), None).unwrap();
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), ex("ancestor"), ex("b"), data_graph()));
        store.insert(&Quad::new(ex("b"), ex("ancestor"), ex("c"), data_graph()));
        store.insert(&Quad::new(ex("c"), ex("ancestor"), ex("d"), data_graph()));

        let outcome = ForwardChainer::new(parsed.rules).run(&mut store);
        assert!(outcome.guard.is_none());
        // a→c, a→d, b→d.
        assert_eq!(outcome.inserted.len(), 3);
    }

    #[test]
    fn unbound_conclusion_variable_is_skolemised_per_firing() {
        let rule = r#"
@prefix ex: <http://example.org/> .
{ ?x a ex:Person . } => { ?x ex:address _:addr . _:addr a ex:Address . } .
"#;
        let parsed = parse_rules(rule.as_bytes(), None).unwrap();
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("p1"), rdf::TYPE, ex("Person"), data_graph()));
        store.insert(&Quad::new(ex("p2"), rdf::TYPE, ex("Person"), data_graph()));

        let outcome = ForwardChainer::new(parsed.rules).run(&mut store);
        assert!(outcome.guard.is_none());
        assert_eq!(outcome.inserted.len(), 4);
        // Each firing got its own address node; re-firings converge on it.
        let addresses: Vec<_> = outcome
            .inserted
            .iter()
            .filter(|q| q.predicate == ex("address"))
            .map(|q| q.object.clone())
            .collect();
        assert_eq!(addresses.len(), 2);
        assert_ne!(addresses[0], addresses[1]);
    }

    #[test]
    fn runaway_rule_trips_the_materialization_guard() {
        let rule = r#"
@prefix ex: <http://example.org/> .
{ ?x ex:next ?y . } => { ?y ex:next _:z . } .
"#;
        let parsed = parse_rules(rule.as_bytes(), None).unwrap();
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("n0"), ex("next"), ex("n1"), data_graph()));

        let config = ChainConfig {
            max_iterations: 1000,
            max_inferred_triples: 50,
            timeout: None,
        };
        let outcome = ForwardChainer::with_config(parsed.rules, config).run(&mut store);
        assert!(outcome.guard.is_some());
        assert_eq!(outcome.inserted.len(), 50);
    }

    #[test]
    fn repeated_variable_in_one_premise_must_agree() {
        let rule = r#"
@prefix ex: <http://example.org/> .
{ ?x ex:knows ?x . } => { ?x a ex:SelfAware . } .
"#;
        let parsed = parse_rules(rule.as_bytes(), None).unwrap();
        let mut store = QuadStore::new();
        store.insert(&Quad::new(ex("a"), ex("knows"), ex("a"), data_graph()));
        store.insert(&Quad::new(ex("b"), ex("knows"), ex("c"), data_graph()));

        let outcome = ForwardChainer::new(parsed.rules).run(&mut store);
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.inserted[0].subject, NamedOrBlankNode::from(ex("a")));
    }
}
