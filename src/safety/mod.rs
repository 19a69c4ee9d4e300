//! The safety-critical path: crisis assessment, the safety-protocol state
//! machine, and the compliance audit sink.
//!
//! Nothing in this module is cached, skipped, or silently degraded. An
//! internal failure here is converted into the most conservative assessment
//! and still audited.

pub mod assessor;
pub mod audit;
pub mod protocol;

pub use assessor::CrisisAssessor;
pub use audit::{AuditEvent, AuditRecord, AuditSink, MemoryAuditLog, SqliteAuditLog};
pub use protocol::{ProtocolSnapshot, ProtocolState, SafetyProtocol, TransitionCause, TransitionRecord};
