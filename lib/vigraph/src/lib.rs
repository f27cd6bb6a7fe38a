#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]

pub use oxrdf;

pub mod error;
pub mod events;
pub mod ingest;
pub mod model;
pub mod mutation;
pub mod projector;
pub mod protocol;
pub mod reason;
pub mod registry;
pub mod store;
pub mod vocab;
pub mod worker;

pub use error::{FetchError, IngestError, ProtocolError, ReasonerError, WorkerError};
pub use ingest::{DocumentFetcher, FetchRequest, FetchedDocument, HttpFetcher};
pub use model::{SerializedQuad, SerializedTerm};
pub use protocol::{decode_inbound, Inbound, Outbound};
pub use store::QuadStore;
pub use worker::{GraphWorker, WorkerHandle};
