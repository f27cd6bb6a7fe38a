//! Worker-level coverage of the registry, projection and namespace-sweep
//! commands, plus subscription filtering.

use serde_json::json;
use vigraph::protocol::{
    BlacklistPayload, CommandEnvelope, CommandKind, EmitAllSubjectsPayload, EventKind,
    EventPayload, ExportGraphPayload, Inbound, Outbound, PurgeNamespacePayload,
    RemoveByNamespacePayload, RemoveForIriPayload, ResponseMessage, SetNamespacesPayload,
    SubscribeRequest, SyncBatchOptions, SyncBatchPayload, SyncLoadPayload,
    TriggerSubjectsPayload,
};
use vigraph::{GraphWorker, SerializedQuad, SerializedTerm, WorkerHandle};

fn command(id: &str, kind: CommandKind) -> Inbound {
    Inbound::Command(CommandEnvelope {
        id: id.to_owned(),
        kind,
    })
}

async fn until_response(handle: &mut WorkerHandle) -> (Vec<Outbound>, ResponseMessage) {
    let mut before = Vec::new();
    loop {
        match handle.recv().await.expect("worker alive") {
            Outbound::Response(response) => return (before, response),
            other => before.push(other),
        }
    }
}

fn subjects_events(messages: &[Outbound]) -> Vec<Vec<String>> {
    messages
        .iter()
        .filter_map(|message| match message {
            Outbound::Event(event) => match &event.payload {
                EventPayload::Subjects(payload) => Some(payload.subjects.clone()),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn ex_quad(subject: &str, predicate: &str, object: &str) -> SerializedQuad {
    SerializedQuad {
        subject: SerializedTerm::named(format!("http://example.org/{subject}")),
        predicate: SerializedTerm::named(format!("http://example.org/{predicate}")),
        object: SerializedTerm::named(format!("http://example.org/{object}")),
        graph: None,
    }
}

async fn seed(handle: &mut WorkerHandle, id: &str, adds: Vec<SerializedQuad>) {
    handle.send(command(
        id,
        CommandKind::SyncBatch(SyncBatchPayload {
            adds,
            removes: vec![],
            options: SyncBatchOptions::default(),
            graph_name: None,
        }),
    ));
    let (_, response) = until_response(handle).await;
    assert!(response.ok);
}

#[tokio::test]
async fn suppress_subjects_skips_the_subjects_event() {
    let mut handle = GraphWorker::spawn();
    handle.send(Inbound::Subscribe(SubscribeRequest {
        id: "sub".to_owned(),
        events: None,
    }));
    until_response(&mut handle).await;

    handle.send(command(
        "s1",
        CommandKind::SyncBatch(SyncBatchPayload {
            adds: vec![ex_quad("a", "p", "b")],
            removes: vec![],
            options: SyncBatchOptions {
                suppress_subjects: true,
            },
            graph_name: None,
        }),
    ));
    let (before, response) = until_response(&mut handle).await;
    assert!(response.ok);
    let events: Vec<EventKind> = before
        .iter()
        .filter_map(|m| match m {
            Outbound::Event(e) => Some(e.event),
            _ => None,
        })
        .collect();
    assert_eq!(events, vec![EventKind::Change]);
}

#[tokio::test]
async fn subscription_filters_by_event_kind() {
    let mut handle = GraphWorker::spawn();
    handle.send(Inbound::Subscribe(SubscribeRequest {
        id: "only-subjects".to_owned(),
        events: Some(vec![EventKind::Subjects]),
    }));
    until_response(&mut handle).await;

    handle.send(command(
        "f1",
        CommandKind::SyncBatch(SyncBatchPayload {
            adds: vec![ex_quad("a", "p", "b")],
            removes: vec![],
            options: SyncBatchOptions::default(),
            graph_name: None,
        }),
    ));
    let (before, _) = until_response(&mut handle).await;
    let kinds: Vec<EventKind> = before
        .iter()
        .filter_map(|m| match m {
            Outbound::Event(e) => Some(e.event),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![EventKind::Subjects]);

    // After unsubscribing nothing is delivered.
    handle.send(Inbound::Unsubscribe {
        id: "only-subjects".to_owned(),
    });
    let (_, response) = until_response(&mut handle).await;
    assert_eq!(response.result.unwrap(), json!(true));

    handle.send(command(
        "f2",
        CommandKind::SyncBatch(SyncBatchPayload {
            adds: vec![ex_quad("c", "p", "d")],
            removes: vec![],
            options: SyncBatchOptions::default(),
            graph_name: None,
        }),
    ));
    let (before, _) = until_response(&mut handle).await;
    assert!(subjects_events(&before).is_empty());
}

#[tokio::test]
async fn emit_all_subjects_scans_one_graph() {
    let mut handle = GraphWorker::spawn();
    seed(
        &mut handle,
        "e1",
        vec![ex_quad("a", "p", "b"), ex_quad("b", "p", "c")],
    )
    .await;

    handle.send(Inbound::Subscribe(SubscribeRequest {
        id: "sub".to_owned(),
        events: Some(vec![EventKind::Subjects]),
    }));
    until_response(&mut handle).await;

    handle.send(command(
        "e2",
        CommandKind::EmitAllSubjects(EmitAllSubjectsPayload { graph_name: None }),
    ));
    let (before, response) = until_response(&mut handle).await;
    assert_eq!(response.result.unwrap(), json!({"subjects": 2}));
    assert_eq!(
        subjects_events(&before),
        vec![vec![
            "http://example.org/a".to_owned(),
            "http://example.org/b".to_owned(),
        ]]
    );
}

#[tokio::test]
async fn trigger_subjects_re_emits_without_mutation() {
    let mut handle = GraphWorker::spawn();
    seed(&mut handle, "t1", vec![ex_quad("a", "p", "b")]).await;

    handle.send(Inbound::Subscribe(SubscribeRequest {
        id: "sub".to_owned(),
        events: None,
    }));
    until_response(&mut handle).await;

    handle.send(command(
        "t2",
        CommandKind::TriggerSubjects(TriggerSubjectsPayload {
            subjects: vec!["http://example.org/a".to_owned()],
        }),
    ));
    let (before, response) = until_response(&mut handle).await;
    assert_eq!(response.result.unwrap(), json!({"subjects": 1}));
    // A subjects event but no change event.
    let kinds: Vec<EventKind> = before
        .iter()
        .filter_map(|m| match m {
            Outbound::Event(e) => Some(e.event),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![EventKind::Subjects]);
}

#[tokio::test]
async fn remove_quads_by_namespace_sweeps_all_positions() {
    let mut handle = GraphWorker::spawn();
    seed(&mut handle, "n1", vec![ex_quad("a", "p", "b")]).await;
    handle.send(command(
        "n2",
        CommandKind::SyncBatch(SyncBatchPayload {
            adds: vec![SerializedQuad {
                subject: SerializedTerm::named("http://other.org/x"),
                predicate: SerializedTerm::named("http://other.org/p"),
                object: SerializedTerm::literal("kept"),
                graph: None,
            }],
            removes: vec![],
            options: SyncBatchOptions::default(),
            graph_name: None,
        }),
    ));
    until_response(&mut handle).await;

    handle.send(command(
        "n3",
        CommandKind::RemoveQuadsByNamespace(RemoveByNamespacePayload {
            graph_name: "urn:vg:data".to_owned(),
            namespace_uris: vec!["http://example.org/".to_owned()],
        }),
    ));
    let (_, response) = until_response(&mut handle).await;
    assert_eq!(response.result.unwrap()["removed"], json!(1));

    handle.send(command("n4", CommandKind::GetGraphCounts));
    let (_, response) = until_response(&mut handle).await;
    assert_eq!(response.result.unwrap(), json!({"urn:vg:data": 1}));
}

#[tokio::test]
async fn purge_namespace_drops_binding_and_quads_everywhere() {
    let mut handle = GraphWorker::spawn();
    handle.send(command(
        "p1",
        CommandKind::SetNamespaces(SetNamespacesPayload {
            namespaces: indexmap::IndexMap::from([(
                "ex".to_owned(),
                "http://example.org/".to_owned(),
            )]),
            replace: false,
        }),
    ));
    until_response(&mut handle).await;
    seed(&mut handle, "p2", vec![ex_quad("a", "p", "b")]).await;
    handle.send(command(
        "p3",
        CommandKind::SyncLoad(SyncLoadPayload {
            quads: vec![ex_quad("c", "p", "d")],
            graph_name: "urn:vg:ontologies".to_owned(),
            prefixes: None,
        }),
    ));
    until_response(&mut handle).await;

    handle.send(command(
        "p4",
        CommandKind::PurgeNamespace(PurgeNamespacePayload {
            prefix_or_uri: "ex".to_owned(),
        }),
    ));
    let (_, response) = until_response(&mut handle).await;
    let result = response.result.unwrap();
    assert_eq!(result["removed"], json!(2));
    assert_eq!(result["namespaceUri"], json!("http://example.org/"));
    assert_eq!(result["prefixRemoved"], json!(true));

    // Idempotent: the second purge removes nothing further.
    handle.send(command(
        "p5",
        CommandKind::PurgeNamespace(PurgeNamespacePayload {
            prefix_or_uri: "http://example.org/".to_owned(),
        }),
    ));
    let (_, response) = until_response(&mut handle).await;
    let result = response.result.unwrap();
    assert_eq!(result["removed"], json!(0));
    assert_eq!(result["prefixRemoved"], json!(false));

    handle.send(command("p6", CommandKind::GetNamespaces));
    let (_, response) = until_response(&mut handle).await;
    assert!(response.result.unwrap().get("ex").is_none());
}

#[tokio::test]
async fn remove_all_for_iri_reports_both_positions() {
    let mut handle = GraphWorker::spawn();
    seed(
        &mut handle,
        "i1",
        vec![
            ex_quad("x", "p", "y"),
            ex_quad("y", "p", "z"),
            ex_quad("z", "p", "w"),
        ],
    )
    .await;

    handle.send(command(
        "i2",
        CommandKind::SyncRemoveAllQuadsForIri(RemoveForIriPayload {
            iri: "http://example.org/y".to_owned(),
            graph_name: None,
        }),
    ));
    let (_, response) = until_response(&mut handle).await;
    assert_eq!(
        response.result.unwrap(),
        json!({"removedSubjects": 1, "removedObjects": 1})
    );
}

#[tokio::test]
async fn blacklist_round_trips_through_set_and_get() {
    let mut handle = GraphWorker::spawn();
    handle.send(command(
        "bl1",
        CommandKind::SetBlacklist(BlacklistPayload {
            prefixes: vec!["ex".to_owned()],
            uris: vec!["http://example.org/".to_owned()],
        }),
    ));
    let (_, response) = until_response(&mut handle).await;
    assert_eq!(
        response.result.unwrap(),
        json!({"prefixes": ["ex"], "uris": ["http://example.org/"]})
    );

    // With the custom blacklist, example.org subjects stop being emitted.
    handle.send(Inbound::Subscribe(SubscribeRequest {
        id: "sub".to_owned(),
        events: Some(vec![EventKind::Subjects]),
    }));
    until_response(&mut handle).await;
    seed(&mut handle, "bl2", vec![ex_quad("a", "p", "b")]).await;

    handle.send(command(
        "bl3",
        CommandKind::EmitAllSubjects(EmitAllSubjectsPayload { graph_name: None }),
    ));
    let (_, response) = until_response(&mut handle).await;
    assert_eq!(response.result.unwrap(), json!({"subjects": 0}));
}

#[tokio::test]
async fn nquads_export_preserves_graph_terms() {
    let mut handle = GraphWorker::spawn();
    seed(&mut handle, "x1", vec![ex_quad("a", "p", "b")]).await;

    handle.send(command(
        "x2",
        CommandKind::ExportGraph(ExportGraphPayload {
            graph_name: "urn:vg:data".to_owned(),
            format: "n-quads".to_owned(),
        }),
    ));
    let (_, response) = until_response(&mut handle).await;
    let result = response.result.unwrap();
    let content = result["content"].as_str().unwrap();
    assert!(content.contains("<urn:vg:data>"));

    handle.send(command(
        "x3",
        CommandKind::ExportGraph(ExportGraphPayload {
            graph_name: "urn:vg:data".to_owned(),
            format: "csv".to_owned(),
        }),
    ));
    let (_, response) = until_response(&mut handle).await;
    assert!(!response.ok);
}
