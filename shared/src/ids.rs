//! Sequential, human-readable ids (`Us0000001a`, `Cs0000042a`) backed by
//! counter documents in the [`COUNTERS`] collection.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::store::{DocumentStore, Fields, StoreError, COUNTERS};

const COUNT_FIELD: &str = "count";
const DIGITS: usize = 7;
const MAX_SEQUENCE: u64 = 9_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Users,
    Communities,
}

impl CounterKind {
    /// Counter document id.
    pub fn name(self) -> &'static str {
        match self {
            CounterKind::Users => "users",
            CounterKind::Communities => "communities",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            CounterKind::Users => "Us",
            CounterKind::Communities => "Cs",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterMode {
    /// Read the counter, hand out `count + 1`, and let the caller write it
    /// back later. Two concurrent callers can receive the same id.
    #[default]
    ReadThenWrite,
    /// Use the store's atomic increment; the slot is consumed on allocation.
    Atomic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedId {
    pub kind: CounterKind,
    pub sequence: u64,
    pub id: String,
    /// Whether the counter document already reflects `sequence`.
    pub committed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{kind} counter exhausted at {sequence}")]
    Exhausted { kind: CounterKind, sequence: u64 },
    #[error("{kind} counter holds a non-integer value")]
    Corrupt { kind: CounterKind },
}

pub fn format_id(kind: CounterKind, sequence: u64) -> Result<String, AllocationError> {
    if sequence > MAX_SEQUENCE {
        return Err(AllocationError::Exhausted { kind, sequence });
    }
    Ok(format!("{}{:0width$}a", kind.prefix(), sequence, width = DIGITS))
}

fn counter_fields(count: u64) -> Fields {
    let mut fields = Fields::new();
    fields.insert(COUNT_FIELD.to_string(), Value::from(count));
    fields
}

#[derive(Clone)]
pub struct IdAllocator {
    store: Arc<dyn DocumentStore>,
    mode: CounterMode,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn DocumentStore>, mode: CounterMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    pub async fn next(&self, kind: CounterKind) -> Result<AllocatedId, AllocationError> {
        let (sequence, committed) = match self.mode {
            CounterMode::ReadThenWrite => (self.read_count(kind).await? + 1, false),
            CounterMode::Atomic => {
                let value = self
                    .store
                    .increment(COUNTERS, kind.name(), COUNT_FIELD, 1)
                    .await?;
                let sequence = u64::try_from(value).map_err(|_| AllocationError::Corrupt { kind })?;
                (sequence, true)
            }
        };

        let id = format_id(kind, sequence)?;
        tracing::debug!("Allocated {} (sequence {}) from {} counter", id, sequence, kind);
        Ok(AllocatedId {
            kind,
            sequence,
            id,
            committed,
        })
    }

    /// Persist `allocated.sequence` into its counter document. No-op when the
    /// allocation was already committed by an atomic increment.
    pub async fn commit(&self, allocated: &AllocatedId) -> Result<(), StoreError> {
        if allocated.committed {
            return Ok(());
        }
        self.store
            .set(COUNTERS, allocated.kind.name(), counter_fields(allocated.sequence))
            .await
    }

    async fn read_count(&self, kind: CounterKind) -> Result<u64, AllocationError> {
        match self.store.get(COUNTERS, kind.name()).await? {
            Some(fields) => match fields.get(COUNT_FIELD) {
                None => Ok(0),
                Some(value) => value.as_u64().ok_or(AllocationError::Corrupt { kind }),
            },
            None => {
                if let Err(e) = self.store.set(COUNTERS, kind.name(), counter_fields(0)).await {
                    tracing::warn!("Failed to initialize {} counter: {}", kind, e);
                }
                Ok(0)
            }
        }
    }
}
