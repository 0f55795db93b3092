#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type CompanyId = String;
pub type EventId = String;

pub type EventsResult<T> = Result<T, EventsError>;

#[derive(Debug, Error)]
pub enum EventsError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("event {0} was not found")]
    NotFound(EventId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    Processing,
    Success,
    Retry,
    Failed,
}

/// Outbound row appended by the posting/reversal services at post-commit
/// time (spec §4.12 "Event Bus"). Consumers are required by contract to be
/// idempotent since duplicates are possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    pub id: EventId,
    pub company_id: CompanyId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub company_id: CompanyId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// What the transport reported for one delivery attempt. Distinct from a
/// Rust `Err` because a delivery "failure" is expected business traffic,
/// not a bug in the bus itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    RetryableFailure { reason: String },
    NonRetryableFailure { reason: String },
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, event: &IntegrationEvent) -> DeliveryOutcome;
}

/// Capped exponential backoff, 30s/60s/120s/300s/600s (spec §4.12). `attempts`
/// is the number of attempts already made before this wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    schedule_secs: [u64; 5],
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schedule_secs: [30, 60, 120, 300, 600],
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `attempts` is 1-indexed: the delay applied after the first failed
    /// attempt is `backoff(1)`.
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let index = attempts.saturating_sub(1) as usize;
        let secs = self
            .schedule_secs
            .get(index)
            .copied()
            .unwrap_or_else(|| *self.schedule_secs.last().unwrap_or(&600));
        Duration::from_secs(secs)
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn enqueue(&self, request: EnqueueRequest) -> EventsResult<IntegrationEvent>;
    async fn get(&self, event_id: &EventId) -> EventsResult<IntegrationEvent>;

    /// Picks pending-or-retry-due events ordered by `next_retry_at`, moves
    /// each to `PROCESSING`, delegates to `transport`, and applies the
    /// terminal/retry transition (spec §4.12). Returns the events touched.
    async fn process_due(
        &self,
        transport: &(dyn Transport),
        now: DateTime<Utc>,
    ) -> EventsResult<Vec<IntegrationEvent>>;
}

struct EventsState {
    events: HashMap<EventId, IntegrationEvent>,
}

pub struct InMemoryEventBus {
    state: RwLock<EventsState>,
    retry_policy: RetryPolicy,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            state: RwLock::new(EventsState {
                events: HashMap::new(),
            }),
            retry_policy,
        }
    }

    #[must_use]
    pub fn shared(retry_policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self::new(retry_policy))
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn enqueue(&self, request: EnqueueRequest) -> EventsResult<IntegrationEvent> {
        if request.event_type.trim().is_empty() {
            return Err(EventsError::Validation("event_type must be provided".into()));
        }
        let now = Utc::now();
        let event = IntegrationEvent {
            id: Uuid::new_v4().to_string(),
            company_id: request.company_id,
            event_type: request.event_type,
            payload: request.payload,
            status: EventStatus::Pending,
            attempts: 0,
            max_attempts: self.retry_policy.max_attempts(),
            next_retry_at: now,
            last_error: None,
            created_at: now,
            processed_at: None,
        };
        let mut guard = self.state.write().await;
        guard.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn get(&self, event_id: &EventId) -> EventsResult<IntegrationEvent> {
        let guard = self.state.read().await;
        guard
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| EventsError::NotFound(event_id.clone()))
    }

    async fn process_due(
        &self,
        transport: &(dyn Transport),
        now: DateTime<Utc>,
    ) -> EventsResult<Vec<IntegrationEvent>> {
        let due_ids: Vec<EventId> = {
            let guard = self.state.read().await;
            let mut due: Vec<&IntegrationEvent> = guard
                .events
                .values()
                .filter(|event| {
                    matches!(event.status, EventStatus::Pending | EventStatus::Retry)
                        && event.next_retry_at <= now
                })
                .collect();
            due.sort_by_key(|event| event.next_retry_at);
            due.into_iter().map(|event| event.id.clone()).collect()
        };

        let mut processed = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            let mut guard = self.state.write().await;
            let Some(event) = guard.events.get_mut(&id) else {
                continue;
            };
            event.status = EventStatus::Processing;
            let snapshot = event.clone();
            drop(guard);

            let outcome = transport.deliver(&snapshot).await;

            let mut guard = self.state.write().await;
            let Some(event) = guard.events.get_mut(&id) else {
                continue;
            };
            match outcome {
                DeliveryOutcome::Success => {
                    event.status = EventStatus::Success;
                    event.processed_at = Some(now);
                    event.last_error = None;
                }
                DeliveryOutcome::RetryableFailure { reason } => {
                    event.attempts += 1;
                    event.last_error = Some(reason);
                    if event.attempts < event.max_attempts {
                        event.status = EventStatus::Retry;
                        event.next_retry_at =
                            now + self.retry_policy.backoff(event.attempts);
                    } else {
                        event.status = EventStatus::Failed;
                    }
                }
                DeliveryOutcome::NonRetryableFailure { reason } => {
                    event.status = EventStatus::Failed;
                    event.last_error = Some(reason);
                }
            }
            processed.push(event.clone());
        }
        Ok(processed)
    }
}

#[cfg(feature = "postgres-store")]
#[derive(Clone)]
pub struct PostgresEventBus {
    connection_string: String,
}

#[cfg(feature = "postgres-store")]
impl PostgresEventBus {
    /// Constructs a new Postgres-backed event bus stub.
    ///
    /// # Schema Draft
    /// ```sql
    /// CREATE TABLE integration_events (
    ///     id UUID PRIMARY KEY,
    ///     company_id TEXT NOT NULL,
    ///     event_type TEXT NOT NULL,
    ///     payload JSONB NOT NULL,
    ///     status TEXT NOT NULL,
    ///     attempts INT NOT NULL DEFAULT 0,
    ///     max_attempts INT NOT NULL DEFAULT 5,
    ///     next_retry_at TIMESTAMPTZ NOT NULL,
    ///     last_error TEXT,
    ///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    ///     processed_at TIMESTAMPTZ
    /// );
    /// ```
    ///
    /// TODO: add a `SELECT ... FOR UPDATE SKIP LOCKED` consumer query.
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

#[cfg(feature = "postgres-store")]
#[async_trait]
impl EventBus for PostgresEventBus {
    async fn enqueue(&self, request: EnqueueRequest) -> EventsResult<IntegrationEvent> {
        let _ = (&self.connection_string, request);
        Err(EventsError::Storage("postgres event bus not yet implemented".into()))
    }

    async fn get(&self, event_id: &EventId) -> EventsResult<IntegrationEvent> {
        let _ = (&self.connection_string, event_id);
        Err(EventsError::Storage("postgres event bus not yet implemented".into()))
    }

    async fn process_due(
        &self,
        _transport: &(dyn Transport),
        now: DateTime<Utc>,
    ) -> EventsResult<Vec<IntegrationEvent>> {
        let _ = (&self.connection_string, now);
        Err(EventsError::Storage("postgres event bus not yet implemented".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct AlwaysSucceeds;

    #[async_trait]
    impl Transport for AlwaysSucceeds {
        async fn deliver(&self, _event: &IntegrationEvent) -> DeliveryOutcome {
            DeliveryOutcome::Success
        }
    }

    struct AlwaysRetryable;

    #[async_trait]
    impl Transport for AlwaysRetryable {
        async fn deliver(&self, _event: &IntegrationEvent) -> DeliveryOutcome {
            DeliveryOutcome::RetryableFailure {
                reason: "connection reset".into(),
            }
        }
    }

    struct AlwaysNonRetryable;

    #[async_trait]
    impl Transport for AlwaysNonRetryable {
        async fn deliver(&self, _event: &IntegrationEvent) -> DeliveryOutcome {
            DeliveryOutcome::NonRetryableFailure {
                reason: "400 bad request".into(),
            }
        }
    }

    #[test]
    fn backoff_follows_capped_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(3), Duration::from_secs(120));
        assert_eq!(policy.backoff(4), Duration::from_secs(300));
        assert_eq!(policy.backoff(5), Duration::from_secs(600));
        assert_eq!(policy.backoff(9), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn successful_delivery_marks_event_success() {
        let bus = InMemoryEventBus::new(RetryPolicy::default());
        bus.enqueue(EnqueueRequest {
            company_id: "co-1".into(),
            event_type: "voucher.posted".into(),
            payload: serde_json::json!({"voucher_id": "v1"}),
        })
        .await
        .expect("enqueue");

        let processed = bus
            .process_due(&AlwaysSucceeds, Utc::now())
            .await
            .expect("process");
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].status, EventStatus::Success);
    }

    #[tokio::test]
    async fn retryable_failure_schedules_next_attempt() {
        let bus = InMemoryEventBus::new(RetryPolicy::default());
        let event = bus
            .enqueue(EnqueueRequest {
                company_id: "co-1".into(),
                event_type: "voucher.posted".into(),
                payload: serde_json::json!({}),
            })
            .await
            .expect("enqueue");

        let now = Utc::now();
        let processed = bus.process_due(&AlwaysRetryable, now).await.expect("process");
        assert_eq!(processed[0].status, EventStatus::Retry);
        assert_eq!(processed[0].attempts, 1);
        assert_eq!(processed[0].next_retry_at, now + Duration::from_secs(30));

        let refetched = bus.get(&event.id).await.expect("get");
        assert_eq!(refetched.status, EventStatus::Retry);
    }

    #[tokio::test]
    async fn exhausting_attempts_marks_event_failed() {
        let bus = InMemoryEventBus::new(RetryPolicy::default());
        bus.enqueue(EnqueueRequest {
            company_id: "co-1".into(),
            event_type: "voucher.posted".into(),
            payload: serde_json::json!({}),
        })
        .await
        .expect("enqueue");

        let mut now = Utc::now();
        for _ in 0..5 {
            bus.process_due(&AlwaysRetryable, now).await.expect("process");
            now += Duration::from_secs(700);
        }

        let events = bus.process_due(&AlwaysRetryable, now).await.expect("process");
        assert!(events.is_empty(), "event should already be terminal");
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_immediately() {
        let bus = InMemoryEventBus::new(RetryPolicy::default());
        bus.enqueue(EnqueueRequest {
            company_id: "co-1".into(),
            event_type: "voucher.posted".into(),
            payload: serde_json::json!({}),
        })
        .await
        .expect("enqueue");

        let processed = bus
            .process_due(&AlwaysNonRetryable, Utc::now())
            .await
            .expect("process");
        assert_eq!(processed[0].status, EventStatus::Failed);
        assert_eq!(processed[0].attempts, 0);
    }
}
