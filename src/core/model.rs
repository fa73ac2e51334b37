use uuid::Uuid;

pub type SessionId = Uuid;

/// A monitor with no session yet is idle; a session only ever exists in
/// `Streaming` or `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Streaming,
    Terminated(TerminationReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The stream delivered the done sentinel.
    Completed,
    /// A newer `start` call replaced this session.
    Superseded,
    /// The transport gave up after exhausting its reconnect attempts.
    StreamFailed,
}

/// Output file spotted in the log. The directory hint reflects the selected
/// mode, not the server's real storage layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub name: String,
    pub directory_hint: String,
}

/// Point-in-time copy of a session's derived state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub mode: String,
    pub quality: String,
    pub status: SessionStatus,
    pub progress: f64,
    pub transcript: String,
    pub discovered: Vec<DiscoveredFile>,
}

impl SessionSnapshot {
    /// Most recently discovered file (playlist downloads report several).
    pub fn latest_discovered(&self) -> Option<&DiscoveredFile> {
        self.discovered.last()
    }
}
