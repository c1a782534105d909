//! Batched write pipeline: buffered operations, the integrity checker and
//! the flush engine, all owned by an [`IngestSession`].

pub mod flush;
pub mod integrity;
pub mod operation;
pub mod session;
pub mod stats;
pub mod store;

pub use flush::{FlushOutcome, FlushReport};
pub use integrity::{IntegrityLog, IntegrityLogEntry, SequenceCheck, SequenceTracker};
pub use operation::{Bind, OperationKind, SqlOperation};
pub use session::IngestSession;
pub use stats::FlushStatistics;
pub use store::{BatchUnit, BatchUnitStore, UnitKey};
