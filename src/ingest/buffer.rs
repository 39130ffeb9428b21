use crate::aggregate::{Event, StoreError};
use crate::storage::store::DuckDbEventStore;
use parking_lot::Mutex;

/// Thread-safe event buffer that accumulates collected events and writes
/// them to the store in batches once the count threshold is reached.
pub struct EventBuffer {
    events: Mutex<Vec<Event>>,
    flush_threshold: usize,
    store: DuckDbEventStore,
}

impl EventBuffer {
    pub fn new(flush_threshold: usize, store: DuckDbEventStore) -> Self {
        Self {
            events: Mutex::new(Vec::with_capacity(flush_threshold)),
            flush_threshold,
            store,
        }
    }

    /// Returns the store the buffer writes into.
    pub const fn store(&self) -> &DuckDbEventStore {
        &self.store
    }

    /// Add an event to the buffer. If the buffer reaches the threshold,
    /// automatically flushes to the store.
    pub fn push(&self, event: Event) -> Result<Option<usize>, BufferError> {
        let should_flush;
        {
            let mut events = self.events.lock();
            events.push(event);
            should_flush = events.len() >= self.flush_threshold;
        }

        if should_flush {
            let flushed = self.flush()?;
            Ok(Some(flushed))
        } else {
            Ok(None)
        }
    }

    /// Returns the current number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Write all buffered events to the store.
    ///
    /// On failure the drained events are put back so a later flush can retry.
    pub fn flush(&self) -> Result<usize, BufferError> {
        let events: Vec<Event> = {
            let mut buf = self.events.lock();
            std::mem::take(&mut *buf)
        };

        if events.is_empty() {
            return Ok(0);
        }

        match self.store.append(&events) {
            Ok(count) => {
                tracing::info!(count, "Flushed events to store");
                Ok(count)
            }
            Err(e) => {
                let mut buf = self.events.lock();
                let newer = std::mem::replace(&mut *buf, events);
                buf.extend(newer);
                Err(BufferError::Insert(e))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Insert error: {0}")]
    Insert(#[source] StoreError),
}
