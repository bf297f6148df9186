use crate::core::error::ApiError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt::{self, Display};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Structural identity of a fetch: a resource family plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: String,
    params: Vec<String>,
}

impl QueryKey {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, value: impl Display) -> Self {
        self.params.push(value.to_string());
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)?;
        for param in &self.params {
            write!(f, "/{param}")?;
        }
        Ok(())
    }
}

pub type FetchFuture<V> = BoxFuture<'static, Result<V, ApiError>>;

type Fetcher<V> = Arc<dyn Fn() -> FetchFuture<V> + Send + Sync>;

/// A named, parameterized fetch with its staleness window.
pub struct FetchDescriptor<V> {
    key: QueryKey,
    stale_time: Duration,
    fetcher: Fetcher<V>,
}

impl<V: Send + 'static> FetchDescriptor<V> {
    pub fn new<F, Fut>(key: QueryKey, stale_time: Duration, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        Self {
            key,
            stale_time,
            fetcher: Arc::new(move || fetcher().boxed()),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    pub fn fetch(&self) -> FetchFuture<V> {
        (self.fetcher)()
    }
}

impl<V> Clone for FetchDescriptor<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            stale_time: self.stale_time,
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

impl<V> fmt::Debug for FetchDescriptor<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchDescriptor")
            .field("key", &self.key)
            .field("stale_time", &self.stale_time)
            .finish()
    }
}

impl<V> PartialEq for FetchDescriptor<V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<V> Eq for FetchDescriptor<V> {}

impl<V> Hash for FetchDescriptor<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_equality() {
        let a = QueryKey::new("prices").param("history").param("대란").param(180);
        let b = QueryKey::new("prices").param("history").param("대란").param(180);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "prices/history/대란/180");
        assert_eq!(a.resource(), "prices");
        assert_ne!(a, QueryKey::new("prices").param("history").param("특란").param(180));
    }

    #[tokio::test]
    async fn test_descriptor_equality_is_structural() {
        let first = FetchDescriptor::new(QueryKey::new("x"), Duration::ZERO, || async { Ok(1) });
        let second = FetchDescriptor::new(QueryKey::new("x"), Duration::from_secs(5), || async {
            Ok(2)
        });
        assert_eq!(first, second);
        assert_eq!(second.fetch().await.unwrap(), 2);
    }
}
