//! Function activity log: one JSONL line per serverless invocation, plus the
//! aggregation behind `vitalwatch activity`.

pub mod logger;
pub mod reporter;

pub use logger::{ActivityLog, FunctionLogEntry};
