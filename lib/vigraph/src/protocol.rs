//! Typed message envelopes crossing the worker channel.
//!
//! Inbound messages are validated at the boundary: an unknown command name or
//! a payload of the wrong shape fails deserialization and is answered with
//! `response{ok:false}` before any state is touched. Outbound messages mirror
//! the host protocol one to one, so a host can drive the worker over any
//! JSON transport.

use crate::model::{SerializedQuad, SerializedTerm};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host → worker messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    Command(CommandEnvelope),
    Subscribe(SubscribeRequest),
    Unsubscribe { id: String },
    Ack { id: String },
    Cancel { id: String },
    LoadFromUrl(LoadRequest),
    RunReasoning(ReasoningRequest),
}

/// A `command` message: `{type:"command", id, command, payload?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub id: String,
    #[serde(flatten)]
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "camelCase")]
pub enum CommandKind {
    Ping,
    Clear,
    GetGraphCounts,
    GetNamespaces,
    SetNamespaces(SetNamespacesPayload),
    GetBlacklist,
    SetBlacklist(BlacklistPayload),
    SyncBatch(SyncBatchPayload),
    SyncLoad(SyncLoadPayload),
    SyncRemoveGraph(GraphPayload),
    SyncRemoveAllQuadsForIri(RemoveForIriPayload),
    ImportSerialized(ImportSerializedPayload),
    ExportGraph(ExportGraphPayload),
    RemoveQuadsByNamespace(RemoveByNamespacePayload),
    PurgeNamespace(PurgeNamespacePayload),
    EmitAllSubjects(EmitAllSubjectsPayload),
    TriggerSubjects(TriggerSubjectsPayload),
    FetchQuadsPage(FetchQuadsPagePayload),
    GetQuads(GetQuadsPayload),
    RunReasoning(ReasoningRequest),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscribeRequest {
    pub id: String,
    /// Absent means every event stream.
    #[serde(default)]
    pub events: Option<Vec<EventKind>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoadRequest {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub graph_name: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub headers: Option<IndexMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReasoningRequest {
    /// Message id when sent as a top-level message.
    #[serde(default)]
    pub id: Option<String>,
    /// Host-visible id echoed in stages and the result.
    #[serde(default)]
    pub reasoning_id: Option<String>,
    /// Side-channel mode: reason over these quads instead of the main store.
    #[serde(default)]
    pub quads: Option<Vec<SerializedQuad>>,
    pub rulesets: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub emit_subjects: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetNamespacesPayload {
    pub namespaces: IndexMap<String, String>,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlacklistPayload {
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub uris: Vec<String>,
}

/// A removal pattern: absent object matches every object of `(s, p, g)`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuadUpdate {
    pub subject: SerializedTerm,
    pub predicate: SerializedTerm,
    #[serde(default)]
    pub object: Option<SerializedTerm>,
    #[serde(default)]
    pub graph: Option<SerializedTerm>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncBatchOptions {
    #[serde(default)]
    pub suppress_subjects: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncBatchPayload {
    #[serde(default)]
    pub adds: Vec<SerializedQuad>,
    #[serde(default)]
    pub removes: Vec<QuadUpdate>,
    #[serde(default)]
    pub options: SyncBatchOptions,
    #[serde(default)]
    pub graph_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncLoadPayload {
    pub quads: Vec<SerializedQuad>,
    pub graph_name: String,
    #[serde(default)]
    pub prefixes: Option<IndexMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraphPayload {
    pub graph_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoveForIriPayload {
    pub iri: String,
    #[serde(default)]
    pub graph_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportSerializedPayload {
    pub content: String,
    #[serde(default)]
    pub graph_name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub base_iri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportGraphPayload {
    pub graph_name: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoveByNamespacePayload {
    pub graph_name: String,
    pub namespace_uris: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PurgeNamespacePayload {
    pub prefix_or_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmitAllSubjectsPayload {
    #[serde(default)]
    pub graph_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TriggerSubjectsPayload {
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FetchQuadsPagePayload {
    pub graph_name: String,
    #[serde(default)]
    pub offset: usize,
    /// Zero means "everything from `offset`".
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub serialize: Option<bool>,
}

/// A pattern position that accepts either a serialized term or a bare string
/// run through the loose coercion rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LooseTerm {
    Term(SerializedTerm),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetQuadsPayload {
    #[serde(default)]
    pub subject: Option<LooseTerm>,
    #[serde(default)]
    pub predicate: Option<LooseTerm>,
    #[serde(default)]
    pub object: Option<LooseTerm>,
    #[serde(default)]
    pub graph_name: Option<String>,
}

/// Worker → host messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    Response(ResponseMessage),
    Event(EventMessage),
    Ack { id: String },
    Stage(StageMessage),
    Prefix(PrefixMessage),
    /// Remote JSON-LD context discovery. Formats without remote contexts
    /// never produce it; hosts must tolerate its absence.
    Context(ContextMessage),
    Quads(QuadsBatch),
    End(EndMessage),
    Error(StreamError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMessage {
    pub id: String,
    pub context: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ResponseMessage {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
            stack: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error.to_string()),
            stack: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub event: EventKind,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Change,
    Subjects,
    ReasoningStage,
    ReasoningResult,
    ReasoningError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Change(ChangePayload),
    Subjects(SubjectsPayload),
    ReasoningStage(ReasoningStagePayload),
    ReasoningResult(ReasoningResultPayload),
    ReasoningError(ReasoningErrorPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Change(_) => EventKind::Change,
            Self::Subjects(_) => EventKind::Subjects,
            Self::ReasoningStage(_) => EventKind::ReasoningStage,
            Self::ReasoningResult(_) => EventKind::ReasoningResult,
            Self::ReasoningError(_) => EventKind::ReasoningError,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    pub change_count: u64,
    pub meta: Option<ChangeMeta>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMeta {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectsPayload {
    pub subjects: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quads: Option<IndexMap<String, Vec<SerializedQuad>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Vec<SubjectSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// The fat-map projection of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSnapshot {
    pub iri: String,
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStagePayload {
    pub id: String,
    pub stage: String,
    #[serde(flatten)]
    pub meta: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningResultPayload {
    pub id: String,
    pub duration_ms: u64,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub inferences: Vec<Inference>,
    pub meta: ReasoningMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inference {
    #[serde(rename = "type")]
    pub kind: InferenceKind,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InferenceKind {
    Class,
    Relationship,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningMeta {
    pub used_reasoner: bool,
    pub rule_quad_count: usize,
    pub added_count: usize,
    pub worker_duration_ms: u64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMessage {
    pub id: String,
    pub stage: String,
    #[serde(flatten)]
    pub meta: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixMessage {
    pub id: String,
    pub prefixes: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuadsBatch {
    pub id: String,
    pub quads: Vec<SerializedQuad>,
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndMessage {
    pub id: String,
    pub prefixes: IndexMap<String, String>,
    pub quad_count: usize,
    pub touched_subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamError {
    pub id: String,
    pub message: String,
}

/// Decode failure with whatever id could be recovered from the raw message,
/// so hosts still get an addressed `response{ok:false}`.
#[derive(Debug)]
pub struct DecodeError {
    pub id: Option<String>,
    pub message: String,
}

/// Decodes one inbound message. Malformed input never reaches the worker.
pub fn decode_inbound(raw: &str) -> Result<Inbound, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodeError {
        id: None,
        message: format!("invalid JSON: {e}"),
    })?;
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    serde_json::from_value(value).map_err(|e| DecodeError {
        id,
        message: format!("malformed message: {e}"),
    })
}
