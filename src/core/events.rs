use crate::core::model::{DiscoveredFile, SessionId, TerminationReason};

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    SessionStarted { session_id: SessionId, mode: String },
    LineAppended { session_id: SessionId, line: String },
    ProgressUpdated { session_id: SessionId, percent: f64 },
    FileDiscovered { session_id: SessionId, file: DiscoveredFile },
    SessionTerminated { session_id: SessionId, reason: TerminationReason },
    Error { scope: String, message: String },
    Info { scope: String, message: String },
}
