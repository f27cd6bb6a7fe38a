//! The owning actor.
//!
//! A spawned worker holds every piece of mutable state: the quad store, the
//! registries, the change counter and the event broker. The host talks to it
//! over one bidirectional channel pair and never holds references into its
//! internals. Messages are processed strictly in receipt order; during a
//! streaming load the worker keeps reading the channel so `ack` and `cancel`
//! are honoured while every other message queues behind the load.

use crate::error::{IngestError, ProtocolError, WorkerError};
use crate::events::{EventBroker, SinkClosed, SubscriberId};
use crate::ingest::{
    self, DocumentFetcher, FetchRequest, HttpFetcher, DATA_ACCEPT, DATA_LOAD_TIMEOUT,
    QUAD_BATCH_SIZE,
};
use crate::model::{
    self, coerce_object, coerce_subject, graph_display, object_term, predicate_term,
    quad_from_serialized, resolve_graph_name, subject_display, subject_term, SerializedQuad,
};
use crate::mutation::{self, BatchOutcome};
use crate::projector::{empty_subjects, project_subjects};
use crate::protocol::{
    ChangeMeta, ChangePayload, CommandEnvelope, CommandKind, EmitAllSubjectsPayload, EventKind,
    EventPayload, ExportGraphPayload, FetchQuadsPagePayload, GetQuadsPayload, GraphPayload,
    ImportSerializedPayload, Inbound, LoadRequest, LooseTerm, Outbound, PrefixMessage,
    QuadsBatch, ReasoningMeta, ReasoningRequest, ReasoningResultPayload, ReasoningStagePayload,
    RemoveByNamespacePayload, RemoveForIriPayload, ResponseMessage, SetNamespacesPayload,
    StageMessage, StreamError, SubscribeRequest, SyncBatchPayload, SyncLoadPayload,
    TriggerSubjectsPayload, ValidationIssue,
};
use crate::reason::{
    self,
    engine::{ChainOutcome, ForwardChainer},
    REASONER_UNAVAILABLE,
};
use crate::registry::{Blacklist, NamespaceRegistry};
use crate::store::QuadStore;
use indexmap::IndexSet;
use oxrdf::{GraphName, NamedNode, NamedOrBlankNode, Quad, Term};
use rustc_hash::FxHashMap;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::mem::take;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Host-side handle: send [`Inbound`] messages, receive [`Outbound`] ones.
pub struct WorkerHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl WorkerHandle {
    /// Queues one message; returns `false` if the worker is gone.
    pub fn send(&self, message: Inbound) -> bool {
        self.inbound.send(message).is_ok()
    }

    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// A standalone sender, e.g. for a transport reader task.
    pub fn sender(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inbound.clone()
    }
}

struct WorkerState {
    store: QuadStore,
    namespaces: NamespaceRegistry,
    blacklist: Blacklist,
    change_count: u64,
    broker: EventBroker,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            store: QuadStore::new(),
            namespaces: NamespaceRegistry::default(),
            blacklist: Blacklist::default(),
            change_count: 0,
            broker: EventBroker::new(),
        }
    }
}

/// The worker actor. Constructed through [`GraphWorker::spawn`].
pub struct GraphWorker {
    state: WorkerState,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
    fetcher: Arc<dyn DocumentFetcher>,
    backlog: VecDeque<Inbound>,
    subscriptions: FxHashMap<String, SubscriberId>,
}

impl GraphWorker {
    /// Spawns a worker with the HTTP fetcher.
    pub fn spawn() -> WorkerHandle {
        Self::spawn_with_fetcher(Arc::new(HttpFetcher::default()))
    }

    /// Spawns a worker with a custom fetch seam (tests, embedded hosts).
    pub fn spawn_with_fetcher(fetcher: Arc<dyn DocumentFetcher>) -> WorkerHandle {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let worker = Self {
            state: WorkerState::new(),
            inbound: inbound_rx,
            outbound: outbound_tx,
            fetcher,
            backlog: VecDeque::new(),
            subscriptions: FxHashMap::default(),
        };
        tokio::spawn(worker.run());
        WorkerHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
        }
    }

    async fn run(mut self) {
        loop {
            let message = match self.backlog.pop_front() {
                Some(message) => message,
                None => match self.inbound.recv().await {
                    Some(message) => message,
                    None => break,
                },
            };
            self.dispatch(message).await;
        }
        debug!("worker channel closed, terminating");
    }

    async fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Command(CommandEnvelope { id, kind }) => {
                let response = match self.handle_command(&id, kind).await {
                    Ok(result) => ResponseMessage::ok(id.as_str(), result),
                    Err(error) => ResponseMessage::err(id.as_str(), error),
                };
                self.send(Outbound::Response(response));
            }
            Inbound::Subscribe(request) => self.handle_subscribe(request),
            Inbound::Unsubscribe { id } => {
                let removed = self
                    .subscriptions
                    .remove(&id)
                    .is_some_and(|handle| self.state.broker.unsubscribe(handle));
                self.send(Outbound::Response(ResponseMessage::ok(
                    id.as_str(),
                    json!(removed),
                )));
            }
            Inbound::Ack { id } => {
                debug!(%id, "ack with no batch in flight, ignoring");
            }
            Inbound::Cancel { id } => {
                // No load in flight at top level; acknowledge so the host can
                // resolve its own bookkeeping.
                self.send(Outbound::Ack { id });
            }
            Inbound::LoadFromUrl(request) => self.handle_load(request).await,
            Inbound::RunReasoning(request) => {
                let id = request
                    .id
                    .clone()
                    .or_else(|| request.reasoning_id.clone())
                    .unwrap_or_default();
                let response = self.run_reasoning(&id, request).await;
                self.send(Outbound::Response(response));
            }
        }
    }

    fn send(&self, message: Outbound) {
        if self.outbound.send(message).is_err() {
            debug!("outbound channel closed");
        }
    }

    fn emit(&mut self, payload: EventPayload) {
        self.state.broker.emit(payload);
    }

    fn emit_change(&mut self, meta: ChangeMeta) {
        self.state.change_count += 1;
        let payload = ChangePayload {
            change_count: self.state.change_count,
            meta: Some(meta),
        };
        self.emit(EventPayload::Change(payload));
    }

    fn emit_subjects(&mut self, touched: &IndexSet<String>) {
        let payload = project_subjects(
            &self.state.store,
            &self.state.namespaces,
            &self.state.blacklist,
            touched,
        );
        self.emit(EventPayload::Subjects(payload));
    }

    fn emit_mutation_events(
        &mut self,
        reason: &str,
        graph_name: Option<String>,
        outcome: &BatchOutcome,
        suppress_subjects: bool,
    ) {
        if outcome.added == 0 && outcome.removed == 0 {
            return;
        }
        self.emit_change(ChangeMeta {
            reason: reason.to_owned(),
            graph_name,
            added: Some(outcome.added),
            removed: Some(outcome.removed),
        });
        if !suppress_subjects {
            self.emit_subjects(&outcome.touched);
        }
    }

    fn handle_subscribe(&mut self, request: SubscribeRequest) {
        let SubscribeRequest { id, events } = request;
        if let Some(previous) = self.subscriptions.remove(&id) {
            self.state.broker.unsubscribe(previous);
        }
        let sink_tx = self.outbound.clone();
        let handle = self.state.broker.subscribe(
            events.clone(),
            Box::new(move |message| {
                sink_tx
                    .send(Outbound::Event(message.clone()))
                    .map_err(|_| SinkClosed)
            }),
        );
        self.subscriptions.insert(id.clone(), handle);
        let subscribed = events.map_or_else(
            || {
                json!([
                    EventKind::Change,
                    EventKind::Subjects,
                    EventKind::ReasoningStage,
                    EventKind::ReasoningResult,
                    EventKind::ReasoningError,
                ])
            },
            |kinds| json!(kinds),
        );
        self.send(Outbound::Response(ResponseMessage::ok(
            id.as_str(),
            json!({ "subscribed": subscribed }),
        )));
    }

    async fn handle_command(
        &mut self,
        id: &str,
        kind: CommandKind,
    ) -> Result<Value, WorkerError> {
        match kind {
            CommandKind::Ping => Ok(json!("pong")),
            CommandKind::Clear => Ok(self.clear()),
            CommandKind::GetGraphCounts => Ok(self.graph_counts()),
            CommandKind::GetNamespaces => Ok(json!(self.state.namespaces.bindings())),
            CommandKind::SetNamespaces(payload) => Ok(self.set_namespaces(payload)),
            CommandKind::GetBlacklist => Ok(self.blacklist_value()),
            CommandKind::SetBlacklist(payload) => {
                self.state.blacklist.set(payload.prefixes, payload.uris);
                Ok(self.blacklist_value())
            }
            CommandKind::SyncBatch(payload) => self.sync_batch(payload),
            CommandKind::SyncLoad(payload) => self.sync_load(payload),
            CommandKind::SyncRemoveGraph(payload) => self.sync_remove_graph(payload),
            CommandKind::SyncRemoveAllQuadsForIri(payload) => self.sync_remove_for_iri(payload),
            CommandKind::ImportSerialized(payload) => self.import_serialized(payload),
            CommandKind::ExportGraph(payload) => self.export_graph(payload),
            CommandKind::RemoveQuadsByNamespace(payload) => self.remove_by_namespace(payload),
            CommandKind::PurgeNamespace(payload) => {
                Ok(self.purge_namespace(&payload.prefix_or_uri))
            }
            CommandKind::EmitAllSubjects(payload) => self.emit_all_subjects(payload),
            CommandKind::TriggerSubjects(payload) => Ok(self.trigger_subjects(payload)),
            CommandKind::FetchQuadsPage(payload) => self.fetch_quads_page(payload),
            CommandKind::GetQuads(payload) => self.get_quads(payload),
            CommandKind::RunReasoning(request) => {
                let response = self.run_reasoning(id, request).await;
                if response.ok {
                    Ok(response.result.unwrap_or(Value::Null))
                } else {
                    Err(WorkerError::Reasoner(crate::error::ReasonerError::Aborted(
                        response.error.unwrap_or_else(|| "reasoning failed".to_owned()),
                    )))
                }
            }
        }
    }

    fn clear(&mut self) -> Value {
        self.state.store.clear();
        self.state.namespaces.reset();
        self.state.blacklist.reset();
        self.state.change_count = 0;
        let payload = ChangePayload {
            change_count: 0,
            meta: Some(ChangeMeta {
                reason: "clear".to_owned(),
                graph_name: None,
                added: None,
                removed: None,
            }),
        };
        self.emit(EventPayload::Change(payload));
        let subjects = empty_subjects();
        self.emit(EventPayload::Subjects(subjects));
        json!(true)
    }

    fn graph_counts(&self) -> Value {
        let mut counts = Map::new();
        for (graph, count) in self.state.store.graph_counts() {
            counts.insert(graph_display(&graph), json!(count));
        }
        Value::Object(counts)
    }

    fn set_namespaces(&mut self, payload: SetNamespacesPayload) -> Value {
        self.state
            .namespaces
            .set_all(payload.namespaces, payload.replace);
        json!(self.state.namespaces.bindings())
    }

    fn blacklist_value(&self) -> Value {
        json!({
            "prefixes": self.state.blacklist.prefixes,
            "uris": self.state.blacklist.uris,
        })
    }

    fn sync_batch(&mut self, payload: SyncBatchPayload) -> Result<Value, WorkerError> {
        let outcome = mutation::apply_batch(&mut self.state.store, &payload)?;
        let graph_name = payload
            .graph_name
            .clone()
            .unwrap_or_else(|| model::DATA_GRAPH.as_str().to_owned());
        self.emit_mutation_events(
            "syncBatch",
            Some(graph_name),
            &outcome,
            payload.options.suppress_subjects,
        );
        Ok(json!({ "added": outcome.added, "removed": outcome.removed }))
    }

    fn sync_load(&mut self, payload: SyncLoadPayload) -> Result<Value, WorkerError> {
        let graph_name = payload.graph_name.clone();
        let (outcome, _) = mutation::apply_sync_load(
            &mut self.state.store,
            &mut self.state.namespaces,
            &payload,
        )?;
        self.emit_mutation_events("syncLoad", Some(graph_name.clone()), &outcome, false);
        Ok(json!({
            "graphName": graph_name,
            "added": outcome.added,
            "removed": outcome.removed,
        }))
    }

    fn sync_remove_graph(&mut self, payload: GraphPayload) -> Result<Value, WorkerError> {
        let graph = resolve_graph_name(&payload.graph_name).map_err(WorkerError::Protocol)?;
        let mut outcome = BatchOutcome::default();
        for subject in self.state.store.subjects_in_graph(&graph) {
            outcome.touched.insert(subject_display(&subject));
        }
        outcome.removed = self.state.store.clear_graph(&graph);
        self.emit_mutation_events(
            "syncRemoveGraph",
            Some(payload.graph_name.clone()),
            &outcome,
            false,
        );
        Ok(json!({
            "graphName": payload.graph_name,
            "removed": outcome.removed,
        }))
    }

    fn sync_remove_for_iri(&mut self, payload: RemoveForIriPayload) -> Result<Value, WorkerError> {
        let outcome = mutation::remove_all_for_iri(
            &mut self.state.store,
            &payload.iri,
            payload.graph_name.as_deref(),
        )
        .map_err(WorkerError::Protocol)?;
        let batch = BatchOutcome {
            added: 0,
            removed: outcome.removed_subjects + outcome.removed_objects,
            touched: outcome.touched,
        };
        self.emit_mutation_events(
            "syncRemoveAllQuadsForIri",
            payload.graph_name.clone(),
            &batch,
            false,
        );
        Ok(json!({
            "removedSubjects": outcome.removed_subjects,
            "removedObjects": outcome.removed_objects,
        }))
    }

    fn import_serialized(&mut self, payload: ImportSerializedPayload) -> Result<Value, WorkerError> {
        let graph = resolve_graph_name(
            payload.graph_name.as_deref().unwrap_or(model::DATA_GRAPH.as_str()),
        )
        .map_err(WorkerError::Protocol)?;
        let content = payload.content.as_bytes();
        let hints = ingest::extension_hints(None, None, payload.filename.as_deref());
        let format = ingest::resolve_format(
            payload.content_type.as_deref(),
            None,
            &hints,
            content,
        )
        .map_err(WorkerError::Ingest)?;

        // Parse fully before inserting: a syntax error must not leave a
        // half-imported document behind.
        let mut parser = ingest::quad_parser(
            format,
            payload.base_iri.as_deref(),
            &graph,
            content,
        )
        .map_err(WorkerError::Ingest)?;
        let mut parsed: Vec<Quad> = Vec::new();
        for quad in parser.by_ref() {
            parsed.push(quad.map_err(|e| WorkerError::Ingest(IngestError::Parse(e)))?);
        }
        let prefixes = ingest::parser_prefixes(&parser);

        let mut outcome = BatchOutcome::default();
        let inserted =
            mutation::insert_new_quads(&mut self.state.store, &parsed, &mut outcome.touched);
        outcome.added = inserted.len();
        self.state.namespaces.merge_for_graph(
            prefixes.iter().map(|(p, ns)| (p.clone(), ns.clone())),
            &graph,
        );
        let graph_name = graph_display(&graph);
        self.emit_mutation_events("importSerialized", Some(graph_name.clone()), &outcome, false);
        Ok(json!({
            "graphName": graph_name,
            "added": outcome.added,
            "prefixes": prefixes,
            "quads": inserted,
        }))
    }

    fn export_graph(&mut self, payload: ExportGraphPayload) -> Result<Value, WorkerError> {
        let graph = resolve_graph_name(&payload.graph_name).map_err(WorkerError::Protocol)?;
        let format = ingest::export_format(&payload.format).ok_or_else(|| {
            WorkerError::Ingest(IngestError::UnsupportedExportFormat(payload.format.clone()))
        })?;
        let quads = self.state.store.graph_quads(&graph);
        let content = ingest::serialize_graph(&quads, format, self.state.namespaces.bindings())
            .map_err(WorkerError::Ingest)?;
        Ok(json!({
            "graphName": payload.graph_name,
            "format": payload.format,
            "content": content,
        }))
    }

    fn remove_by_namespace(&mut self, payload: RemoveByNamespacePayload) -> Result<Value, WorkerError> {
        let (removed, touched) = mutation::remove_by_namespaces(
            &mut self.state.store,
            &payload.graph_name,
            &payload.namespace_uris,
        )
        .map_err(WorkerError::Protocol)?;
        let outcome = BatchOutcome {
            added: 0,
            removed,
            touched,
        };
        self.emit_mutation_events(
            "removeQuadsByNamespace",
            Some(payload.graph_name.clone()),
            &outcome,
            false,
        );
        Ok(json!({ "graphName": payload.graph_name, "removed": removed }))
    }

    fn purge_namespace(&mut self, prefix_or_uri: &str) -> Value {
        let outcome = mutation::purge_namespace(
            &mut self.state.store,
            &mut self.state.namespaces,
            prefix_or_uri,
        );
        let batch = BatchOutcome {
            added: 0,
            removed: outcome.removed,
            touched: outcome.touched,
        };
        self.emit_mutation_events("purgeNamespace", None, &batch, false);
        json!({
            "removed": outcome.removed,
            "namespaceUri": outcome.namespace_uri,
            "prefixRemoved": outcome.prefix_removed,
        })
    }

    fn emit_all_subjects(&mut self, payload: EmitAllSubjectsPayload) -> Result<Value, WorkerError> {
        let graph = resolve_graph_name(
            payload.graph_name.as_deref().unwrap_or(model::DATA_GRAPH.as_str()),
        )
        .map_err(WorkerError::Protocol)?;
        let touched: IndexSet<String> = self
            .state
            .store
            .subjects_in_graph(&graph)
            .iter()
            .map(subject_display)
            .collect();
        let payload = project_subjects(
            &self.state.store,
            &self.state.namespaces,
            &self.state.blacklist,
            &touched,
        );
        let count = payload.subjects.len();
        self.emit(EventPayload::Subjects(payload));
        Ok(json!({ "subjects": count }))
    }

    fn trigger_subjects(&mut self, payload: TriggerSubjectsPayload) -> Value {
        let touched: IndexSet<String> = payload.subjects.into_iter().collect();
        let projected = project_subjects(
            &self.state.store,
            &self.state.namespaces,
            &self.state.blacklist,
            &touched,
        );
        let count = projected.subjects.len();
        self.emit(EventPayload::Subjects(projected));
        json!({ "subjects": count })
    }

    fn fetch_quads_page(&mut self, payload: FetchQuadsPagePayload) -> Result<Value, WorkerError> {
        let graph = resolve_graph_name(&payload.graph_name).map_err(WorkerError::Protocol)?;
        let mut quads = self.state.store.graph_quads(&graph);
        if let Some(filter) = payload.filter.as_deref() {
            let needle = filter.to_lowercase();
            quads.retain(|quad| quad_matches_filter(quad, &needle));
        }
        let total = quads.len();
        let offset = payload.offset.min(total);
        let end = if payload.limit == 0 {
            total
        } else {
            (offset + payload.limit).min(total)
        };
        let page = &quads[offset..end];
        let serialize = payload.serialize.unwrap_or(true);
        let items: Vec<Value> = if serialize {
            page.iter()
                .map(|quad| json!(SerializedQuad::from(quad)))
                .collect()
        } else {
            page.iter().map(|quad| json!(format!("{quad} ."))).collect()
        };
        Ok(json!({
            "total": total,
            "offset": payload.offset,
            "limit": payload.limit,
            "items": items,
            "serialize": serialize,
        }))
    }

    fn get_quads(&mut self, payload: GetQuadsPayload) -> Result<Value, WorkerError> {
        let subject: Option<NamedOrBlankNode> = match &payload.subject {
            None => None,
            Some(LooseTerm::Term(term)) => Some(subject_term(term).map_err(WorkerError::Protocol)?),
            Some(LooseTerm::Text(text)) => Some(coerce_subject(text).map_err(WorkerError::Protocol)?),
        };
        let predicate: Option<NamedNode> = match &payload.predicate {
            None => None,
            Some(LooseTerm::Term(term)) => {
                Some(predicate_term(term).map_err(WorkerError::Protocol)?)
            }
            Some(LooseTerm::Text(text)) => Some(
                NamedNode::new(text)
                    .map_err(|e| WorkerError::Protocol(ProtocolError::InvalidIri(e.to_string())))?,
            ),
        };
        let object: Option<Term> = match &payload.object {
            None => None,
            Some(LooseTerm::Term(term)) => Some(object_term(term).map_err(WorkerError::Protocol)?),
            Some(LooseTerm::Text(text)) => Some(coerce_object(text)),
        };
        let graph = payload
            .graph_name
            .as_deref()
            .map(resolve_graph_name)
            .transpose()
            .map_err(WorkerError::Protocol)?;

        let quads: Vec<SerializedQuad> = self
            .state
            .store
            .quads_for_pattern(
                subject.as_ref(),
                predicate.as_ref(),
                object.as_ref(),
                graph.as_ref(),
            )
            .iter()
            .map(SerializedQuad::from)
            .collect();
        Ok(json!(quads))
    }

    // Streaming load ----------------------------------------------------

    async fn handle_load(&mut self, request: LoadRequest) {
        let id = request.id.clone();
        if let Err(error) = self.run_load(request).await {
            let message = match &error {
                IngestError::Cancelled => "load cancelled by host".to_owned(),
                other => other.to_string(),
            };
            self.send(Outbound::Error(StreamError { id, message }));
        }
    }

    async fn run_load(&mut self, request: LoadRequest) -> Result<(), IngestError> {
        let id = request.id.clone();
        let graph = resolve_graph_name(
            request.graph_name.as_deref().unwrap_or(model::DATA_GRAPH.as_str()),
        )?;
        self.send_stage(&id, "start", Map::new());

        let timeout = request
            .timeout_ms
            .map_or(DATA_LOAD_TIMEOUT, Duration::from_millis);
        let fetch_request = FetchRequest {
            url: request.url.clone(),
            accept: DATA_ACCEPT,
            headers: request
                .headers
                .iter()
                .flatten()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout,
        };
        let document = self.fetch_interruptible(&id, fetch_request).await?;
        let mut meta = Map::new();
        meta.insert("status".to_owned(), json!(document.status));
        self.send_stage(&id, "fetched", meta);

        let hints = ingest::extension_hints(
            Some(&document.url),
            document.content_disposition.as_deref(),
            None,
        );
        let format = ingest::resolve_format(
            None,
            document.content_type.as_deref(),
            &hints,
            &document.body,
        )?;

        // Parse the whole body before committing anything, so a syntax error
        // costs nothing and the batching loop never holds a parser across an
        // ack wait.
        let (parsed, prefixes) = {
            let mut parser =
                ingest::quad_parser(format, Some(&document.url), &graph, &document.body)?;
            let mut parsed: Vec<Quad> = Vec::new();
            for quad in parser.by_ref() {
                parsed.push(quad?);
            }
            (parsed, ingest::parser_prefixes(&parser))
        };
        if !prefixes.is_empty() {
            self.send(Outbound::Prefix(PrefixMessage {
                id: id.clone(),
                prefixes: prefixes.clone(),
            }));
        }

        let mut touched: IndexSet<String> = IndexSet::new();
        let mut batch: Vec<SerializedQuad> = Vec::new();
        let mut total = 0usize;
        for quad in &parsed {
            if batch.len() >= QUAD_BATCH_SIZE {
                let full = take(&mut batch);
                self.send_batch_and_wait(&id, full, false).await?;
            }
            if self.state.store.insert(quad) {
                touched.insert(subject_display(&quad.subject));
                batch.push(SerializedQuad::from(quad));
                total += 1;
            }
        }
        if !batch.is_empty() || total == 0 {
            let last = take(&mut batch);
            self.send_batch_and_wait(&id, last, true).await?;
        }

        self.state.namespaces.merge_for_graph(
            prefixes.iter().map(|(p, ns)| (p.clone(), ns.clone())),
            &graph,
        );
        self.send(Outbound::End(crate::protocol::EndMessage {
            id: id.clone(),
            prefixes,
            quad_count: total,
            touched_subjects: touched.iter().cloned().collect(),
        }));

        let outcome = BatchOutcome {
            added: total,
            removed: 0,
            touched,
        };
        self.emit_mutation_events("loadFromUrl", Some(graph_display(&graph)), &outcome, false);
        Ok(())
    }

    /// Fetches while keeping the inbound channel drained so a `cancel` for
    /// this load aborts the wait. Unrelated traffic queues behind the load.
    async fn fetch_interruptible(
        &mut self,
        id: &str,
        request: FetchRequest,
    ) -> Result<ingest::FetchedDocument, IngestError> {
        let fetcher = Arc::clone(&self.fetcher);
        let fetch = fetcher.fetch(request);
        tokio::pin!(fetch);
        loop {
            tokio::select! {
                result = &mut fetch => return Ok(result?),
                message = self.inbound.recv() => match message {
                    Some(Inbound::Cancel { id: cancel_id }) if cancel_id == id => {
                        return Err(IngestError::Cancelled);
                    }
                    Some(other) => self.backlog.push_back(other),
                    None => return Err(IngestError::Cancelled),
                },
            }
        }
    }

    async fn send_batch_and_wait(
        &mut self,
        id: &str,
        quads: Vec<SerializedQuad>,
        is_final: bool,
    ) -> Result<(), IngestError> {
        self.send(Outbound::Quads(QuadsBatch {
            id: id.to_owned(),
            quads,
            is_final,
        }));
        loop {
            let Some(message) = self.inbound.recv().await else {
                return Err(IngestError::Cancelled);
            };
            match message {
                Inbound::Ack { id: ack_id } if ack_id == id => return Ok(()),
                Inbound::Cancel { id: cancel_id } if cancel_id == id => {
                    return Err(IngestError::Cancelled);
                }
                other => self.backlog.push_back(other),
            }
        }
    }

    fn send_stage(&self, id: &str, stage: &str, meta: Map<String, Value>) {
        self.send(Outbound::Stage(StageMessage {
            id: id.to_owned(),
            stage: stage.to_owned(),
            meta,
        }));
    }

    // Reasoning ----------------------------------------------------------

    fn emit_reasoning_stage(&mut self, id: &str, stage: &str, meta: Map<String, Value>) {
        self.emit(EventPayload::ReasoningStage(ReasoningStagePayload {
            id: id.to_owned(),
            stage: stage.to_owned(),
            meta,
        }));
    }

    async fn run_reasoning(
        &mut self,
        message_id: &str,
        request: ReasoningRequest,
    ) -> ResponseMessage {
        let reasoning_id = request
            .reasoning_id
            .clone()
            .unwrap_or_else(|| message_id.to_owned());
        let total_start = Instant::now();
        self.emit_reasoning_stage(&reasoning_id, "start", Map::new());

        // Side-channel mode reasons over a transient store; in-place mode
        // works on a copy and routes the captured insertions to the main
        // store afterwards.
        let side_channel = request.quads.is_some();
        let mut working = match &request.quads {
            Some(quads) => {
                let fallback: GraphName = model::DATA_GRAPH.into_owned().into();
                let mut store = QuadStore::new();
                for quad in quads {
                    match quad_from_serialized(quad, &fallback) {
                        Ok(quad) => {
                            store.insert(&quad);
                        }
                        Err(error) => {
                            self.emit(EventPayload::ReasoningError(
                                crate::protocol::ReasoningErrorPayload {
                                    message: error.to_string(),
                                    stack: None,
                                },
                            ));
                            return ResponseMessage::err(message_id, error);
                        }
                    }
                }
                store
            }
            None => self.state.store.clone(),
        };

        let mut rules = Vec::new();
        let mut rule_quad_count = 0usize;
        for name in &request.rulesets {
            let mut meta = Map::new();
            meta.insert("name".to_owned(), json!(name));
            self.emit_reasoning_stage(&reasoning_id, "fetch-ruleset", meta);
            match reason::fetch_ruleset(
                self.fetcher.as_ref(),
                request.base_url.as_deref(),
                name,
            )
            .await
            {
                Ok(bundle) => match reason::engine::parse_rules(&bundle.body, Some(&bundle.url)) {
                    Ok(parsed) => {
                        let mut meta = Map::new();
                        meta.insert("name".to_owned(), json!(name));
                        meta.insert("quadCount".to_owned(), json!(parsed.quad_count));
                        self.emit_reasoning_stage(&reasoning_id, "ruleset-parsed", meta);
                        rule_quad_count += parsed.quad_count;
                        rules.extend(parsed.rules);
                    }
                    Err(error) => {
                        let mut meta = Map::new();
                        meta.insert("name".to_owned(), json!(name));
                        meta.insert("message".to_owned(), json!(error.to_string()));
                        self.emit_reasoning_stage(&reasoning_id, "ruleset-parse-error", meta);
                    }
                },
                Err(error) => {
                    let mut meta = Map::new();
                    meta.insert("name".to_owned(), json!(name));
                    meta.insert("message".to_owned(), json!(error.to_string()));
                    self.emit_reasoning_stage(&reasoning_id, "ruleset-parse-error", meta);
                }
            }
        }

        let chain_start = Instant::now();
        let outcome = if rules.is_empty() {
            ChainOutcome::default()
        } else {
            ForwardChainer::new(rules).run(&mut working)
        };
        let worker_duration_ms = elapsed_ms(chain_start);
        if let Some(guard) = &outcome.guard {
            let mut meta = Map::new();
            meta.insert("message".to_owned(), json!(guard));
            self.emit_reasoning_stage(&reasoning_id, "reasoner-error", meta);
        }
        let mut meta = Map::new();
        meta.insert("durationMs".to_owned(), json!(worker_duration_ms));
        meta.insert("ruleQuadCount".to_owned(), json!(rule_quad_count));
        self.emit_reasoning_stage(&reasoning_id, "reasoner-complete", meta);

        let used_reasoner = rule_quad_count > 0 && outcome.guard.is_none();
        let inferred_graph: GraphName = model::INFERRED_GRAPH.into_owned().into();
        let mut added = 0usize;
        let mut moved = 0usize;
        let mut touched: IndexSet<String> = IndexSet::new();
        for quad in &outcome.inserted {
            let target = Quad::new(
                quad.subject.clone(),
                quad.predicate.clone(),
                quad.object.clone(),
                inferred_graph.clone(),
            );
            if side_channel {
                added += 1;
            } else {
                // The capture's graph name is the source graph key; a
                // re-emitted fact leaves that graph when it moves to the
                // inference graph.
                if quad.graph_name != inferred_graph && self.state.store.remove(quad) {
                    moved += 1;
                    touched.insert(subject_display(&quad.subject));
                }
                if self.state.store.insert(&target) {
                    added += 1;
                    touched.insert(subject_display(&target.subject));
                }
            }
        }

        let (errors, mut warnings) =
            reason::extract_validation_issues(&working, &outcome.inserted);
        if rule_quad_count == 0 {
            warnings.push(ValidationIssue {
                focus_node: None,
                message: Some(REASONER_UNAVAILABLE.to_owned()),
                severity: None,
            });
        }
        let inferences = reason::classify_inferences(&outcome.inserted);

        if !side_channel {
            let outcome_summary = BatchOutcome {
                added,
                removed: moved,
                touched,
            };
            self.emit_mutation_events(
                "runReasoning",
                Some(model::INFERRED_GRAPH.as_str().to_owned()),
                &outcome_summary,
                !request.emit_subjects,
            );
        }

        let total_duration_ms = elapsed_ms(total_start);
        let result = ReasoningResultPayload {
            id: reasoning_id,
            duration_ms: total_duration_ms,
            errors,
            warnings,
            inferences,
            meta: ReasoningMeta {
                used_reasoner,
                rule_quad_count,
                added_count: added,
                worker_duration_ms,
                total_duration_ms,
            },
        };
        let value = serde_json::to_value(&result).unwrap_or(Value::Null);
        self.emit(EventPayload::ReasoningResult(result));
        ResponseMessage::ok(message_id, value)
    }
}

fn quad_matches_filter(quad: &Quad, needle: &str) -> bool {
    let object = match &quad.object {
        Term::NamedNode(n) => n.as_str().to_lowercase(),
        Term::BlankNode(b) => b.to_string().to_lowercase(),
        Term::Literal(l) => l.value().to_lowercase(),
    };
    subject_display(&quad.subject).to_lowercase().contains(needle)
        || quad.predicate.as_str().to_lowercase().contains(needle)
        || object.contains(needle)
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
