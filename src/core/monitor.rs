use crate::core::classify::{classify, LineClass};
use crate::core::events::MonitorEvent;
use crate::core::model::{
    DiscoveredFile, SessionId, SessionSnapshot, SessionStatus, TerminationReason,
};
use crate::transport::{StreamRequest, StreamTransport, TransportContext};
use futures::StreamExt;
use sanitize_filename::sanitize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("source url must not be empty")]
    EmptySourceUrl,

    #[error("mode must not be empty")]
    EmptyMode,

    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

struct SessionState {
    id: SessionId,
    mode: String,
    quality: String,
    status: SessionStatus,
    progress: f64,
    transcript: String,
    discovered: Vec<DiscoveredFile>,
    notify: Arc<Notify>,
}

#[derive(PartialEq)]
enum LineOutcome {
    Continue,
    Finished,
}

/// Owns at most one live subscription to the download service's progress
/// stream and derives session state from each received line.
///
/// Replace-and-close discipline: `start` kills the previous subscription
/// before the new one can deliver a line, so two subscriptions never feed the
/// same state.
#[derive(Clone)]
pub struct Monitor {
    transport: Arc<dyn StreamTransport>,
    endpoint: Url,
    ctx: TransportContext,
    event_tx: broadcast::Sender<MonitorEvent>,
    session: Arc<Mutex<Option<SessionState>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Monitor {
    pub fn new(transport: Arc<dyn StreamTransport>, endpoint: Url, ctx: TransportContext) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            transport,
            endpoint,
            ctx,
            event_tx,
            session: Arc::new(Mutex::new(None)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Begin a new session. Validates inputs before any I/O; on failure the
    /// prior session (if any) is left untouched.
    pub async fn start(
        &self,
        mode: &str,
        quality: &str,
        source_url: &str,
    ) -> Result<SessionId, MonitorError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(MonitorError::EmptySourceUrl);
        }
        let mode = mode.trim();
        if mode.is_empty() {
            return Err(MonitorError::EmptyMode);
        }

        let request = StreamRequest::new(&self.endpoint, mode, quality, source_url)?;

        {
            let mut task = self.task.lock().await;
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }

        let session_id = Uuid::new_v4();
        {
            let mut guard = self.session.lock().await;
            if let Some(old) = guard.as_mut() {
                if old.status == SessionStatus::Streaming {
                    old.status = SessionStatus::Terminated(TerminationReason::Superseded);
                    old.notify.notify_waiters();
                    let _ = self.event_tx.send(MonitorEvent::SessionTerminated {
                        session_id: old.id,
                        reason: TerminationReason::Superseded,
                    });
                }
            }
            *guard = Some(SessionState {
                id: session_id,
                mode: mode.to_string(),
                quality: quality.to_string(),
                status: SessionStatus::Streaming,
                progress: 0.0,
                transcript: String::new(),
                discovered: Vec::new(),
                notify: Arc::new(Notify::new()),
            });
        }
        let _ = self.event_tx.send(MonitorEvent::SessionStarted {
            session_id,
            mode: mode.to_string(),
        });

        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            monitor.run_session(session_id, request).await;
        });
        *self.task.lock().await = Some(handle);

        Ok(session_id)
    }

    /// Await termination of the given session. Returns immediately if it is
    /// already terminated or unknown.
    pub async fn wait_session(&self, session_id: SessionId) {
        let notify = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(s) if s.id == session_id && s.status == SessionStatus::Streaming => {
                    s.notify.clone()
                }
                _ => return,
            }
        };
        let notified = notify.notified();
        tokio::pin!(notified);
        {
            // Register the waiter before re-checking, so a termination that
            // lands between the check and the await is not missed.
            notified.as_mut().enable();
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(s) if s.id == session_id && s.status == SessionStatus::Streaming => {}
                _ => return,
            }
        }
        notified.await;
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let guard = self.session.lock().await;
        guard.as_ref().map(|s| SessionSnapshot {
            id: s.id,
            mode: s.mode.clone(),
            quality: s.quality.clone(),
            status: s.status,
            progress: s.progress,
            transcript: s.transcript.clone(),
            discovered: s.discovered.clone(),
        })
    }

    async fn run_session(&self, session_id: SessionId, request: StreamRequest) {
        let scope = format!("session({session_id})");
        let mut attempt: u32 = 0;

        loop {
            let mut stream = match self.transport.open(&request, &self.ctx).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = self.event_tx.send(MonitorEvent::Error {
                        scope: scope.clone(),
                        message: format!("{e}"),
                    });
                    self.terminate(session_id, TerminationReason::StreamFailed).await;
                    return;
                }
            };

            let drop_reason: String;
            loop {
                match stream.next().await {
                    Some(Ok(line)) => {
                        attempt = 0;
                        if self.handle_line(session_id, &line).await == LineOutcome::Finished {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        drop_reason = format!("stream error: {e}");
                        break;
                    }
                    None => {
                        drop_reason = "stream ended before completion".to_string();
                        break;
                    }
                }
            }

            if attempt >= self.ctx.retries {
                let _ = self.event_tx.send(MonitorEvent::Error {
                    scope: scope.clone(),
                    message: format!("{drop_reason}; giving up after {attempt} reconnect attempts"),
                });
                self.terminate(session_id, TerminationReason::StreamFailed).await;
                return;
            }
            attempt += 1;
            tracing::warn!(%session_id, attempt, "{drop_reason}; reconnecting");
            let _ = self.event_tx.send(MonitorEvent::Info {
                scope: scope.clone(),
                message: format!(
                    "{drop_reason}; reconnecting (attempt {attempt}/{})",
                    self.ctx.retries
                ),
            });
            self.ctx.sleep_backoff(attempt - 1).await;
        }
    }

    async fn handle_line(&self, session_id: SessionId, line: &str) -> LineOutcome {
        match classify(line) {
            LineClass::Done => {
                {
                    let mut guard = self.session.lock().await;
                    let Some(s) = guard.as_mut().filter(|s| s.id == session_id) else {
                        return LineOutcome::Finished;
                    };
                    s.progress = 100.0;
                    s.status = SessionStatus::Terminated(TerminationReason::Completed);
                    s.notify.notify_waiters();
                }
                let _ = self.event_tx.send(MonitorEvent::ProgressUpdated {
                    session_id,
                    percent: 100.0,
                });
                let _ = self.event_tx.send(MonitorEvent::SessionTerminated {
                    session_id,
                    reason: TerminationReason::Completed,
                });
                LineOutcome::Finished
            }
            LineClass::Log { destination, percent } => {
                let mut events = Vec::with_capacity(3);
                {
                    let mut guard = self.session.lock().await;
                    let Some(s) = guard.as_mut().filter(|s| s.id == session_id) else {
                        return LineOutcome::Finished;
                    };
                    s.transcript.push_str(line);
                    s.transcript.push('\n');
                    events.push(MonitorEvent::LineAppended {
                        session_id,
                        line: line.to_string(),
                    });
                    if let Some(dest) = destination {
                        let file = DiscoveredFile {
                            name: sanitize(dest),
                            directory_hint: format!("{}/", s.mode),
                        };
                        s.discovered.push(file.clone());
                        events.push(MonitorEvent::FileDiscovered { session_id, file });
                    }
                    if let Some(percent) = percent {
                        s.progress = percent;
                        events.push(MonitorEvent::ProgressUpdated { session_id, percent });
                    }
                }
                for event in events {
                    let _ = self.event_tx.send(event);
                }
                LineOutcome::Continue
            }
        }
    }

    async fn terminate(&self, session_id: SessionId, reason: TerminationReason) {
        let terminated = {
            let mut guard = self.session.lock().await;
            match guard.as_mut() {
                Some(s) if s.id == session_id && s.status == SessionStatus::Streaming => {
                    s.status = SessionStatus::Terminated(reason);
                    s.notify.notify_waiters();
                    true
                }
                _ => false,
            }
        };
        if terminated {
            let _ = self.event_tx.send(MonitorEvent::SessionTerminated { session_id, reason });
        }
    }
}
