use crate::core::error::ApiError;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// What an observer sees for one fetch key.
#[derive(Debug, Clone)]
pub enum FetchState<V> {
    /// Nothing fetched and nothing running.
    Idle,
    /// First fetch running, no value yet.
    InFlight,
    Fresh {
        value: Arc<V>,
        fetched_at: DateTime<Utc>,
    },
    /// A value past its staleness window or invalidated. `refreshing` is set
    /// while a background refetch runs.
    Stale {
        value: Arc<V>,
        fetched_at: DateTime<Utc>,
        refreshing: bool,
    },
    /// The latest fetch failed. The last good value, if any, stays readable.
    Failed {
        error: ApiError,
        last_good: Option<(Arc<V>, DateTime<Utc>)>,
    },
}

impl<V> FetchState<V> {
    /// Best value to display: the current, stale or last good one.
    pub fn value(&self) -> Option<&Arc<V>> {
        match self {
            FetchState::Fresh { value, .. } | FetchState::Stale { value, .. } => Some(value),
            FetchState::Failed { last_good, .. } => last_good.as_ref().map(|(v, _)| v),
            FetchState::Idle | FetchState::InFlight => None,
        }
    }

    /// Value produced by the latest settled fetch. A failure yields nothing
    /// even when an older value is retained.
    pub fn success_value(&self) -> Option<&Arc<V>> {
        match self {
            FetchState::Fresh { value, .. } | FetchState::Stale { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            FetchState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// A fetch is running or about to start.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            FetchState::Idle | FetchState::InFlight | FetchState::Stale { refreshing: true, .. }
        )
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }
}

/// Type-erased entry state broadcast to observers.
#[derive(Clone)]
pub(crate) struct EntrySnapshot {
    pub(crate) data: Option<(AnyValue, DateTime<Utc>)>,
    pub(crate) error: Option<ApiError>,
    pub(crate) in_flight: bool,
    pub(crate) invalidated: bool,
    pub(crate) stale_time: Duration,
}

impl EntrySnapshot {
    pub(crate) fn new(stale_time: Duration) -> Self {
        Self {
            data: None,
            error: None,
            in_flight: false,
            invalidated: false,
            stale_time,
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        match &self.data {
            Some((_, fetched_at)) => is_older_than(*fetched_at, self.stale_time),
            None => true,
        }
    }

    /// True when an observer arriving now should start a fetch. A failed
    /// entry is retried even while its last good value is still fresh.
    pub(crate) fn needs_fetch(&self) -> bool {
        !self.in_flight
            && (self.data.is_none()
                || self.error.is_some()
                || self.invalidated
                || self.is_expired())
    }

    pub(crate) fn to_state<V: Send + Sync + 'static>(&self) -> FetchState<V> {
        let value = self.data.as_ref().and_then(|(value, fetched_at)| {
            match Arc::clone(value).downcast::<V>() {
                Ok(value) => Some((value, *fetched_at)),
                Err(_) => {
                    debug!("Cached value has a different type than requested");
                    None
                }
            }
        });

        if self.in_flight {
            return match value {
                Some((value, fetched_at)) => FetchState::Stale {
                    value,
                    fetched_at,
                    refreshing: true,
                },
                None => FetchState::InFlight,
            };
        }

        if let Some(error) = &self.error {
            return FetchState::Failed {
                error: error.clone(),
                last_good: value,
            };
        }

        match value {
            Some((value, fetched_at)) if self.invalidated || self.is_expired() => {
                FetchState::Stale {
                    value,
                    fetched_at,
                    refreshing: false,
                }
            }
            Some((value, fetched_at)) => FetchState::Fresh { value, fetched_at },
            None => FetchState::Idle,
        }
    }
}

fn is_older_than(fetched_at: DateTime<Utc>, window: Duration) -> bool {
    let age = Utc::now().signed_duration_since(fetched_at);
    match chrono::Duration::from_std(window) {
        Ok(limit) => age >= limit,
        Err(_) => false,
    }
}
