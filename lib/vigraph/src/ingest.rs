//! Bytes → quads: fetch, media-type resolution and streaming parse.
//!
//! Format resolution walks a fixed ladder: declared content type, HTTP
//! header, filename extension, then a sniff of the first kibibyte. The fetch
//! itself sits behind [`DocumentFetcher`] so the worker can be driven without
//! a network.

use crate::error::{FetchError, IngestError};
use async_trait::async_trait;
use indexmap::IndexMap;
use oxrdf::{GraphName, GraphNameRef, Quad, QuadRef};
use oxrdfio::{JsonLdProfileSet, RdfFormat, RdfParser, RdfSerializer, ReaderQuadParser};
use std::time::Duration;

/// Quads per `quads` message; the host acks each batch before the next.
pub const QUAD_BATCH_SIZE: usize = 1000;

/// Accept header sent for data loads.
pub const DATA_ACCEPT: &str = "text/turtle, application/rdf+xml, application/ld+json, */*";
/// Accept header sent for rule-bundle fetches.
pub const RULES_ACCEPT: &str = "text/n3, text/turtle, */*";

/// Default deadline for data loads.
pub const DATA_LOAD_TIMEOUT: Duration = Duration::from_secs(120);
/// Default deadline for rule-bundle fetches.
pub const RULE_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// One outgoing GET.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub accept: &'static str,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// What came back, reduced to the parts ingest cares about.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after redirects; used as the parser base IRI.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub body: Vec<u8>,
}

/// Seam between the worker and the network.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedDocument, FetchError>;
}

/// [`reqwest`]-backed fetcher: follows redirects, honours the per-request
/// timeout, forwards caller headers.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedDocument, FetchError> {
        let timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .header(reqwest::header::ACCEPT, request.accept);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: request.url.clone(),
                    timeout_ms,
                }
            } else if e.is_builder() {
                FetchError::InvalidUrl {
                    url: request.url.clone(),
                    message: e.to_string(),
                }
            } else {
                FetchError::Http {
                    url: request.url.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let content_disposition = header(reqwest::header::CONTENT_DISPOSITION);
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: url.clone(),
                        timeout_ms,
                    }
                } else {
                    FetchError::Http {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                }
            })?
            .to_vec();
        Ok(FetchedDocument {
            url,
            status,
            content_type,
            content_disposition,
            body,
        })
    }
}

fn jsonld() -> RdfFormat {
    RdfFormat::JsonLd {
        profile: JsonLdProfileSet::empty(),
    }
}

/// Canonicalises a declared or HTTP media type against the supported set.
///
/// `text/plain` is deliberately unknown: callers that declare it fall
/// through to extension and sniffing resolution instead of getting a wild
/// N-Triples guess.
pub fn format_from_media_type(media_type: &str) -> Option<RdfFormat> {
    let essence = media_type.split(';').next()?.trim().to_ascii_lowercase();
    match essence.as_str() {
        "text/turtle" | "application/turtle" | "application/x-turtle" => Some(RdfFormat::Turtle),
        "application/n-triples" => Some(RdfFormat::NTriples),
        "application/n-quads" => Some(RdfFormat::NQuads),
        "application/trig" => Some(RdfFormat::TriG),
        "text/n3" => Some(RdfFormat::N3),
        "application/ld+json" | "application/json" => Some(jsonld()),
        "application/rdf+xml" | "application/xml" | "text/xml" => Some(RdfFormat::RdfXml),
        _ => None,
    }
}

/// Filename-extension resolution, including the `.owl` alias the registry
/// tables miss.
pub fn format_from_extension(extension: &str) -> Option<RdfFormat> {
    match extension.to_ascii_lowercase().as_str() {
        "ttl" | "turtle" => Some(RdfFormat::Turtle),
        "nt" => Some(RdfFormat::NTriples),
        "nq" => Some(RdfFormat::NQuads),
        "jsonld" | "json" => Some(jsonld()),
        "rdf" | "owl" | "xml" => Some(RdfFormat::RdfXml),
        "trig" => Some(RdfFormat::TriG),
        "n3" => Some(RdfFormat::N3),
        _ => RdfFormat::from_extension(extension),
    }
}

/// Extracts candidate file extensions from a `Content-Disposition` header,
/// an explicit filename, a URL path and URL query values.
pub fn extension_hints(
    url: Option<&str>,
    content_disposition: Option<&str>,
    filename: Option<&str>,
) -> Vec<String> {
    let mut hints = Vec::new();
    let mut push = |candidate: &str| {
        if let Some((_, extension)) = candidate.rsplit_once('.') {
            if !extension.is_empty() && extension.len() <= 6 {
                hints.push(extension.to_owned());
            }
        }
    };

    if let Some(disposition) = content_disposition {
        if let Some(name) = disposition
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("filename="))
            .next()
        {
            push(name.trim_matches('"'));
        }
    }
    if let Some(name) = filename {
        push(name);
    }
    if let Some(url) = url.and_then(|u| url::Url::parse(u).ok()) {
        if let Some(segment) = url.path_segments().and_then(|mut s| s.next_back()) {
            push(segment);
        }
        for (_, value) in url.query_pairs() {
            push(&value);
        }
    }
    hints
}

/// Sniffs the first kibibyte of content.
pub fn sniff_format(head: &[u8]) -> Option<RdfFormat> {
    let text = String::from_utf8_lossy(&head[..head.len().min(1024)]);
    let trimmed = text.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && text.contains("@context") {
        return Some(jsonld());
    }
    if text.contains("@prefix")
        || trimmed.starts_with("prefix ")
        || trimmed.starts_with("PREFIX ")
        || text.contains("@base")
    {
        return Some(RdfFormat::Turtle);
    }
    if trimmed.starts_with("<?xml") || text.contains("<rdf:") {
        return Some(RdfFormat::RdfXml);
    }
    if looks_like_terse_triples(trimmed) {
        return Some(RdfFormat::Turtle);
    }
    None
}

/// `<token> a <token>`: a bare Turtle type assertion without prefixes.
fn looks_like_terse_triples(text: &str) -> bool {
    let Some(close) = text.find('>') else {
        return false;
    };
    text.starts_with('<') && text[close..].trim_start_matches('>').trim_start().starts_with("a ")
}

/// Walks the resolution ladder; first hit wins.
pub fn resolve_format(
    declared: Option<&str>,
    header: Option<&str>,
    hints: &[String],
    head: &[u8],
) -> Result<RdfFormat, IngestError> {
    if let Some(format) = declared.and_then(format_from_media_type) {
        return Ok(format);
    }
    if let Some(format) = header.and_then(format_from_media_type) {
        return Ok(format);
    }
    for hint in hints {
        if let Some(format) = format_from_extension(hint) {
            return Ok(format);
        }
    }
    sniff_format(head).ok_or(IngestError::UnresolvableFormat)
}

/// Builds a streaming parser over in-memory content. Parsed default-graph
/// quads are re-homed into `target_graph`; named graphs from dataset formats
/// are kept. Blank nodes are renamed so separate documents cannot collide.
pub fn quad_parser<'a>(
    format: RdfFormat,
    base_iri: Option<&str>,
    target_graph: &GraphName,
    content: &'a [u8],
) -> Result<ReaderQuadParser<&'a [u8]>, IngestError> {
    let mut parser = RdfParser::from_format(format)
        .with_default_graph(target_graph.clone())
        .rename_blank_nodes();
    if let Some(base) = base_iri {
        parser = parser.with_base_iri(base).map_err(|e| {
            IngestError::Protocol(crate::error::ProtocolError::InvalidIri(format!("{base}: {e}")))
        })?;
    }
    Ok(parser.for_reader(content))
}

/// Prefixes currently known to a parser, oldest first.
pub fn parser_prefixes(parser: &ReaderQuadParser<&[u8]>) -> IndexMap<String, String> {
    parser
        .prefixes()
        .map(|(prefix, iri)| (prefix.to_owned(), iri.to_owned()))
        .collect()
}

/// Resolves an export format name: the short names of the protocol
/// (`turtle`, `ld+json`, `rdf+xml`, `n-quads`) or any supported media type.
pub fn export_format(name: &str) -> Option<RdfFormat> {
    match name.trim().to_ascii_lowercase().as_str() {
        "turtle" | "ttl" => Some(RdfFormat::Turtle),
        "ld+json" | "jsonld" | "json-ld" => Some(jsonld()),
        "rdf+xml" | "rdfxml" => Some(RdfFormat::RdfXml),
        "n-quads" | "nquads" => Some(RdfFormat::NQuads),
        "n-triples" | "ntriples" => Some(RdfFormat::NTriples),
        "trig" => Some(RdfFormat::TriG),
        other => format_from_media_type(other),
    }
}

/// Serializes one graph's quads. Graph-only formats drop the graph term;
/// N-Quads and TriG keep it.
pub fn serialize_graph(
    quads: &[Quad],
    format: RdfFormat,
    prefixes: &IndexMap<String, String>,
) -> Result<String, IngestError> {
    let mut serializer = RdfSerializer::from_format(format);
    if matches!(format, RdfFormat::Turtle | RdfFormat::TriG | RdfFormat::N3) {
        for (prefix, iri) in prefixes {
            if oxiri::Iri::parse(iri.as_str()).is_err() {
                continue;
            }
            serializer = serializer.with_prefix(prefix, iri).map_err(|e| {
                IngestError::Protocol(crate::error::ProtocolError::InvalidIri(e.to_string()))
            })?;
        }
    }
    let mut writer = serializer.for_writer(Vec::new());
    for quad in quads {
        if format.supports_datasets() {
            writer.serialize_quad(quad.as_ref())?;
        } else {
            let quad_ref = QuadRef::new(
                &quad.subject,
                &quad.predicate,
                &quad.object,
                GraphNameRef::DefaultGraph,
            );
            writer.serialize_quad(quad_ref)?;
        }
    }
    let bytes = writer.finish()?;
    String::from_utf8(bytes).map_err(|e| {
        IngestError::Serialize(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}
