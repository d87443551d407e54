use crate::clock::Clock;
use crate::debounce::WriteDebouncer;
use crate::errors::AppError;
use crate::history::HistoryStack;
use crate::persistence::KvAdapter;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Write-through plumbing shared by every store: one named blob, its undo
/// history, optional write coalescing and the last persistence failure.
pub struct PersistentSlot {
    kv: Arc<dyn KvAdapter>,
    key: &'static str,
    clock: Arc<dyn Clock>,
    history: HistoryStack,
    debouncer: Option<WriteDebouncer>,
    last_failure: Option<AppError>,
}

impl PersistentSlot {
    pub fn new(kv: Arc<dyn KvAdapter>, key: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            key,
            clock,
            history: HistoryStack::new(),
            debouncer: None,
            last_failure: None,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// `None` or a zero delay switches back to synchronous write-through,
    /// flushing anything still pending first.
    pub fn set_debounce(&mut self, delay: Option<Duration>) {
        self.flush();
        self.debouncer = delay
            .filter(|delay| *delay > Duration::zero())
            .map(WriteDebouncer::new);
    }

    /// Raw blob read. Adapter failures are logged and treated as absent.
    pub fn read(&mut self) -> Option<String> {
        match self.kv.get(self.key) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key = self.key, error = %error, "reading store blob failed; starting empty");
                self.last_failure = Some(error);
                None
            }
        }
    }

    /// Decodes the whole blob, falling back to the default on missing or
    /// corrupt data.
    pub fn load_json<S: DeserializeOwned + Default>(&mut self) -> S {
        let Some(raw) = self.read() else {
            return S::default();
        };
        match serde_json::from_str::<S>(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key = self.key, error = %error, "stored blob is corrupt; resetting to default");
                S::default()
            }
        }
    }

    /// Records the state loaded at start as the bottom of the undo stack.
    pub fn seed_history<S: Serialize>(&mut self, state: &S) {
        self.history.clear();
        if let Some(snapshot) = self.encode(state) {
            self.history.push(snapshot);
        }
    }

    /// Persists `state` and pushes it as a new undo snapshot. Returns whether
    /// the write (or its scheduling) succeeded.
    pub fn commit<S: Serialize>(&mut self, state: &S) -> bool {
        let Some(snapshot) = self.encode(state) else {
            return false;
        };
        self.history.push(snapshot.clone());
        self.write(snapshot)
    }

    /// Persists without touching history; used by stores that are not
    /// undoable, such as settings.
    pub fn store<S: Serialize>(&mut self, state: &S) -> bool {
        match self.encode(state) {
            Some(payload) => self.write(payload),
            None => false,
        }
    }

    /// Steps the history back and persists the restored snapshot as the live
    /// state. Returns the snapshot for the caller to decode.
    pub fn undo(&mut self) -> Option<String> {
        let snapshot = self.history.undo()?.to_string();
        self.write(snapshot.clone());
        Some(snapshot)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn has_pending_write(&self) -> bool {
        self.debouncer
            .as_ref()
            .map(WriteDebouncer::is_pending)
            .unwrap_or(false)
    }

    /// Writes a coalesced blob once its deadline has passed.
    pub fn flush_due(&mut self) -> bool {
        let now = self.clock.now();
        let payload = self
            .debouncer
            .as_mut()
            .and_then(|debouncer| debouncer.take_due(now));
        match payload {
            Some(payload) => self.write_now(&payload),
            None => true,
        }
    }

    pub fn flush(&mut self) -> bool {
        let payload = self.debouncer.as_mut().and_then(WriteDebouncer::take);
        match payload {
            Some(payload) => self.write_now(&payload),
            None => true,
        }
    }

    pub fn last_failure(&self) -> Option<&AppError> {
        self.last_failure.as_ref()
    }

    fn encode<S: Serialize>(&mut self, state: &S) -> Option<String> {
        match serde_json::to_string(state) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key = self.key, error = %error, "serializing store state failed");
                self.last_failure = Some(AppError::from(error));
                None
            }
        }
    }

    fn write(&mut self, payload: String) -> bool {
        let now = self.clock.now();
        match self.debouncer.as_mut() {
            Some(debouncer) => {
                debouncer.schedule(now, payload);
                true
            }
            None => self.write_now(&payload),
        }
    }

    fn write_now(&mut self, payload: &str) -> bool {
        match self.kv.set(self.key, payload) {
            Ok(()) => {
                self.last_failure = None;
                tracing::debug!(key = self.key, bytes = payload.len(), "store persisted");
                true
            }
            Err(error) => {
                tracing::warn!(key = self.key, error = %error, "persisting store failed; keeping in-memory state");
                self.last_failure = Some(error);
                false
            }
        }
    }
}

impl Drop for PersistentSlot {
    fn drop(&mut self) {
        self.flush();
    }
}
