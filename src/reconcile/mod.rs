//! Multi-source reconciliation against persisted snapshots
//!
//! A [`Reconciler`] observes every descriptor of a [`MergeGroup`] and only
//! promotes a merged value once the whole group has settled. The previous
//! snapshot stays on screen until then, so a warm reload never flashes an
//! empty or partial state.

pub mod snapshot;

use crate::core::error::ApiError;
use crate::query::{FetchDescriptor, FetchState, Observer, QueryClient};
use chrono::{DateTime, Utc};
use futures::future::select_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snapshot::SnapshotCache;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type MergeFn<V, M> = Arc<dyn Fn(&[Option<Arc<V>>]) -> Option<M> + Send + Sync>;

/// Descriptors whose results are merged into one persisted view.
pub struct MergeGroup<V, M> {
    name: String,
    cache_key: String,
    descriptors: Vec<FetchDescriptor<V>>,
    merge: MergeFn<V, M>,
}

impl<V, M> MergeGroup<V, M> {
    /// `merge` receives one slot per descriptor in registration order, `None`
    /// for descriptors whose latest fetch failed. Returning `None` means the
    /// merge has nothing to show.
    pub fn new<F>(
        name: impl Into<String>,
        cache_key: impl Into<String>,
        descriptors: Vec<FetchDescriptor<V>>,
        merge: F,
    ) -> Self
    where
        F: Fn(&[Option<Arc<V>>]) -> Option<M> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            cache_key: cache_key.into(),
            descriptors,
            merge: Arc::new(merge),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn descriptors(&self) -> &[FetchDescriptor<V>] {
        &self.descriptors
    }
}

/// What the consumer should show.
#[derive(Debug)]
pub enum Displayed<M> {
    /// No snapshot and the group has not settled yet.
    Loading,
    /// The group settled with nothing to show and there was no prior value.
    Empty,
    Ready {
        value: Arc<M>,
        as_of: DateTime<Utc>,
        /// Loaded from the snapshot cache rather than a settled merge.
        from_snapshot: bool,
    },
}

impl<M> Displayed<M> {
    pub fn value(&self) -> Option<&Arc<M>> {
        match self {
            Displayed::Ready { value, .. } => Some(value),
            Displayed::Loading | Displayed::Empty => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Displayed::Loading)
    }
}

impl<M> Clone for Displayed<M> {
    fn clone(&self) -> Self {
        match self {
            Displayed::Loading => Displayed::Loading,
            Displayed::Empty => Displayed::Empty,
            Displayed::Ready {
                value,
                as_of,
                from_snapshot,
            } => Displayed::Ready {
                value: Arc::clone(value),
                as_of: *as_of,
                from_snapshot: *from_snapshot,
            },
        }
    }
}

pub struct ReconciledView<M> {
    pub displayed: Displayed<M>,
    /// Some descriptor of the group is fetching.
    pub refreshing: bool,
    /// Set to [`ApiError::MergeEmpty`] when the last settled round had
    /// nothing to merge.
    pub error: Option<ApiError>,
    /// Errors of the descriptors that failed in the last settled round.
    pub failures: Vec<ApiError>,
    /// Settled rounds evaluated so far.
    pub rounds: u64,
}

impl<M> Clone for ReconciledView<M> {
    fn clone(&self) -> Self {
        Self {
            displayed: self.displayed.clone(),
            refreshing: self.refreshing,
            error: self.error.clone(),
            failures: self.failures.clone(),
            rounds: self.rounds,
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for ReconciledView<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciledView")
            .field("displayed", &self.displayed)
            .field("refreshing", &self.refreshing)
            .field("error", &self.error)
            .field("failures", &self.failures)
            .field("rounds", &self.rounds)
            .finish()
    }
}

/// A mounted merge group. Dropping it stops reconciliation; nothing is
/// written to the snapshot cache afterwards.
pub struct Reconciler<M> {
    cache_key: String,
    view: watch::Receiver<ReconciledView<M>>,
    task: JoinHandle<()>,
}

impl<M> Reconciler<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Shows the group's snapshot immediately, then observes every descriptor
    /// and promotes merged results as rounds settle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount<V>(
        queries: &QueryClient,
        snapshots: Arc<SnapshotCache>,
        group: MergeGroup<V, M>,
    ) -> Self
    where
        V: Send + Sync + 'static,
    {
        let displayed = match snapshots.read::<M>(&group.cache_key) {
            Some((value, as_of)) => {
                debug!(cache_key = %group.cache_key, "Showing snapshot");
                Displayed::Ready {
                    value: Arc::new(value),
                    as_of,
                    from_snapshot: true,
                }
            }
            None => Displayed::Loading,
        };

        let observers: Vec<Observer<V>> = group
            .descriptors
            .iter()
            .map(|descriptor| queries.observe(descriptor))
            .collect();
        let refreshing = observers.iter().any(|o| o.state().is_pending());

        let (sender, view) = watch::channel(ReconciledView {
            displayed,
            refreshing,
            error: None,
            failures: Vec::new(),
            rounds: 0,
        });

        let cache_key = group.cache_key.clone();
        let task = tokio::spawn(drive(observers, group, snapshots, sender));
        Self {
            cache_key,
            view,
            task,
        }
    }
}

impl<M> Reconciler<M> {
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn view(&self) -> ReconciledView<M> {
        self.view.borrow().clone()
    }

    /// Waits for the next view update. Returns false once reconciliation stopped.
    pub async fn changed(&mut self) -> bool {
        self.view.changed().await.is_ok()
    }

    /// Waits until `predicate` holds for the current view.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ReconciledView<M>) -> bool,
    ) -> ReconciledView<M> {
        let result = self.view.wait_for(predicate).await.map(|view| view.clone());
        result.unwrap_or_else(|_| self.view())
    }

    /// Waits until at least one round settled and nothing is fetching.
    pub async fn settled(&mut self) -> ReconciledView<M> {
        self.wait_for(|v| v.rounds > 0 && !v.refreshing).await
    }
}

impl<M> Drop for Reconciler<M> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What a settled descriptor contributed, to spot rounds already merged.
type SettleMark = (Option<DateTime<Utc>>, Option<ApiError>);

fn settle_mark<V>(state: &FetchState<V>) -> SettleMark {
    match state {
        FetchState::Fresh { fetched_at, .. } | FetchState::Stale { fetched_at, .. } => {
            (Some(*fetched_at), None)
        }
        FetchState::Failed { error, last_good } => {
            (last_good.as_ref().map(|(_, at)| *at), Some(error.clone()))
        }
        FetchState::Idle | FetchState::InFlight => (None, None),
    }
}

async fn drive<V, M>(
    mut observers: Vec<Observer<V>>,
    group: MergeGroup<V, M>,
    snapshots: Arc<SnapshotCache>,
    view: watch::Sender<ReconciledView<M>>,
) where
    V: Send + Sync + 'static,
    M: Serialize + Send + Sync + 'static,
{
    if observers.is_empty() {
        promote(&group, &snapshots, &view, &[]);
        return;
    }

    let mut last_marks: Option<Vec<SettleMark>> = None;
    let mut was_pending = false;
    loop {
        {
            let states: Vec<FetchState<V>> = observers.iter().map(Observer::state).collect();
            if states.iter().any(FetchState::is_pending) {
                was_pending = true;
                view.send_if_modified(|v| !std::mem::replace(&mut v.refreshing, true));
            } else {
                let marks: Vec<SettleMark> = states.iter().map(settle_mark).collect();
                if was_pending || last_marks.as_ref() != Some(&marks) {
                    promote(&group, &snapshots, &view, &states);
                    last_marks = Some(marks);
                }
                was_pending = false;
            }
        }

        let changes = observers.iter_mut().map(|o| Box::pin(o.changed()));
        let (alive, _, _) = select_all(changes).await;
        if !alive {
            debug!(group = %group.name, "Query entry dropped, stopping reconciliation");
            break;
        }
    }
}

fn promote<V, M: Serialize>(
    group: &MergeGroup<V, M>,
    snapshots: &SnapshotCache,
    view: &watch::Sender<ReconciledView<M>>,
    states: &[FetchState<V>],
) {
    let parts: Vec<Option<Arc<V>>> = states
        .iter()
        .map(|s| s.success_value().cloned())
        .collect();
    let failures: Vec<ApiError> = states.iter().filter_map(|s| s.error().cloned()).collect();

    match (group.merge)(&parts) {
        Some(merged) => {
            let as_of = match snapshots.write(&group.cache_key, &merged) {
                Ok(record) => record.written_at,
                Err(e) => {
                    warn!(group = %group.name, error = %e, "Failed to persist snapshot");
                    Utc::now()
                }
            };
            info!(
                group = %group.name,
                failed = failures.len(),
                total = states.len(),
                "Promoted merged view"
            );
            view.send_modify(|v| {
                v.displayed = Displayed::Ready {
                    value: Arc::new(merged),
                    as_of,
                    from_snapshot: false,
                };
                v.refreshing = false;
                v.error = None;
                v.failures = failures;
                v.rounds += 1;
            });
        }
        None => {
            debug!(group = %group.name, "Merge produced nothing, keeping displayed value");
            view.send_modify(|v| {
                if v.displayed.is_loading() {
                    v.displayed = Displayed::Empty;
                }
                v.refreshing = false;
                v.error = Some(ApiError::MergeEmpty {
                    group: group.name.clone(),
                });
                v.failures = failures;
                v.rounds += 1;
            });
        }
    }
}
