//! Dashboard queries, merge groups and mutations over the price service

use crate::client::DashboardApi;
use crate::core::error::ApiError;
use crate::core::models::{
    Alert, AlertCreate, AnalyticsFactorsResponse, ForecastResponse, MarketDataSnapshot,
    ModelPerformance, Prediction, PredictionSummary, PriceHistory, PriceWithChange, UserResponse,
};
use crate::query::{FetchDescriptor, FetchState, QueryClient, QueryKey};
use crate::reconcile::snapshot::SnapshotCache;
use crate::reconcile::{MergeGroup, Reconciler};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Resource families used as the first query key segment.
pub mod resources {
    pub const AUTH: &str = "auth";
    pub const PRICES: &str = "prices";
    pub const FORECAST: &str = "forecast";
    pub const PREDICTIONS: &str = "predictions";
    pub const ALERTS: &str = "alerts";
    pub const MARKET: &str = "market";
    pub const ANALYTICS: &str = "analytics";
    pub const MODELS: &str = "models";
}

pub const CURRENT_PRICES_STALE: Duration = Duration::from_secs(3 * 60);
pub const HISTORY_STALE: Duration = Duration::from_secs(5 * 60);
pub const FORECAST_STALE: Duration = Duration::from_secs(5 * 60);
pub const PREDICTIONS_STALE: Duration = Duration::from_secs(5 * 60);
pub const ALERTS_STALE: Duration = Duration::ZERO;
pub const MARKET_STALE: Duration = Duration::from_secs(10 * 60);
pub const ANALYTICS_STALE: Duration = Duration::from_secs(10 * 60);
pub const MODELS_STALE: Duration = Duration::from_secs(30 * 60);
pub const ME_STALE: Duration = Duration::from_secs(5 * 60);

pub const CURRENT_PRICES_SNAPSHOT: &str = "snapshot:prices:current";

pub fn chart_snapshot_key(grades: &[String], days: u32) -> String {
    format!("snapshot:chart:{}:{days}", grades.join(","))
}

/// Retail price history of several grades aligned by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    /// Series labels in registration order.
    pub series: Vec<String>,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: String,
    /// One slot per series, `None` where that series has no price for the date.
    pub values: Vec<Option<f64>>,
}

/// Merges per-grade histories by date. A failed grade keeps its slot with no
/// values. Returns `None` when no grade produced a single point.
pub fn merge_chart_series(
    labels: &[String],
    parts: &[Option<Arc<Vec<PriceHistory>>>],
) -> Option<ChartSeries> {
    let mut by_date: BTreeMap<&str, Vec<Option<f64>>> = BTreeMap::new();
    for (slot, history) in parts.iter().enumerate() {
        let Some(history) = history else { continue };
        for row in history.iter() {
            let values = by_date
                .entry(row.date.as_str())
                .or_insert_with(|| vec![None; parts.len()]);
            values[slot] = row.retail_price;
        }
    }

    if by_date.is_empty() {
        return None;
    }

    Some(ChartSeries {
        series: labels.to_vec(),
        points: by_date
            .into_iter()
            .map(|(date, values)| ChartPoint {
                date: date.to_string(),
                values,
            })
            .collect(),
    })
}

fn merge_current_prices(
    parts: &[Option<Arc<Vec<PriceWithChange>>>],
) -> Option<Vec<PriceWithChange>> {
    parts
        .first()?
        .as_ref()
        .filter(|prices| !prices.is_empty())
        .map(|prices| prices.as_ref().clone())
}

/// Entry point for dashboard data: descriptors, merged views and mutations.
#[derive(Clone)]
pub struct Dashboard {
    api: DashboardApi,
    queries: QueryClient,
    snapshots: Arc<SnapshotCache>,
}

impl Dashboard {
    pub fn new(api: DashboardApi, queries: QueryClient, snapshots: Arc<SnapshotCache>) -> Self {
        Self {
            api,
            queries,
            snapshots,
        }
    }

    pub fn api(&self) -> &DashboardApi {
        &self.api
    }

    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    // Descriptors

    pub fn current_prices_query(&self) -> FetchDescriptor<Vec<PriceWithChange>> {
        let api = self.api.clone();
        FetchDescriptor::new(
            QueryKey::new(resources::PRICES).param("current"),
            CURRENT_PRICES_STALE,
            move || {
                let api = api.clone();
                async move { api.current_prices().await }
            },
        )
    }

    pub fn price_history_query(&self, grade: &str, days: u32) -> FetchDescriptor<Vec<PriceHistory>> {
        let api = self.api.clone();
        let owned = grade.to_string();
        FetchDescriptor::new(
            QueryKey::new(resources::PRICES)
                .param("history")
                .param(grade)
                .param(days),
            HISTORY_STALE,
            move || {
                let api = api.clone();
                let grade = owned.clone();
                async move { api.price_history(&grade, days).await }
            },
        )
    }

    pub fn forecast_query(&self, grade: &str) -> FetchDescriptor<ForecastResponse> {
        let api = self.api.clone();
        let owned = grade.to_string();
        FetchDescriptor::new(
            QueryKey::new(resources::FORECAST).param(grade),
            FORECAST_STALE,
            move || {
                let api = api.clone();
                let grade = owned.clone();
                async move { api.forecast(&grade).await }
            },
        )
    }

    pub fn predictions_query(&self, grade: &str) -> FetchDescriptor<PredictionSummary> {
        let api = self.api.clone();
        let owned = grade.to_string();
        FetchDescriptor::new(
            QueryKey::new(resources::PREDICTIONS).param(grade),
            PREDICTIONS_STALE,
            move || {
                let api = api.clone();
                let grade = owned.clone();
                async move { api.predictions(&grade).await }
            },
        )
    }

    pub fn alerts_query(&self, email: &str) -> FetchDescriptor<Vec<Alert>> {
        let api = self.api.clone();
        let owned = email.to_string();
        FetchDescriptor::new(
            QueryKey::new(resources::ALERTS).param(email),
            ALERTS_STALE,
            move || {
                let api = api.clone();
                let email = owned.clone();
                async move { api.alerts(&email).await }
            },
        )
    }

    pub fn market_snapshot_query(&self, date: Option<&str>) -> FetchDescriptor<MarketDataSnapshot> {
        let api = self.api.clone();
        let owned = date.map(str::to_string);
        FetchDescriptor::new(
            QueryKey::new(resources::MARKET)
                .param("snapshot")
                .param(date.unwrap_or("latest")),
            MARKET_STALE,
            move || {
                let api = api.clone();
                let date = owned.clone();
                async move { api.market_snapshot(date.as_deref()).await }
            },
        )
    }

    pub fn analytics_factors_query(&self, grade: &str) -> FetchDescriptor<AnalyticsFactorsResponse> {
        let api = self.api.clone();
        let owned = grade.to_string();
        FetchDescriptor::new(
            QueryKey::new(resources::ANALYTICS).param("factors").param(grade),
            ANALYTICS_STALE,
            move || {
                let api = api.clone();
                let grade = owned.clone();
                async move { api.analytics_factors(&grade).await }
            },
        )
    }

    pub fn model_performance_query(&self, grade: &str) -> FetchDescriptor<Vec<ModelPerformance>> {
        let api = self.api.clone();
        let owned = grade.to_string();
        FetchDescriptor::new(
            QueryKey::new(resources::MODELS).param("performance").param(grade),
            MODELS_STALE,
            move || {
                let api = api.clone();
                let grade = owned.clone();
                async move { api.model_performance(&grade).await }
            },
        )
    }

    pub fn current_model_query(&self, grade: &str) -> FetchDescriptor<Option<ModelPerformance>> {
        let api = self.api.clone();
        let owned = grade.to_string();
        FetchDescriptor::new(
            QueryKey::new(resources::MODELS).param("current").param(grade),
            MODELS_STALE,
            move || {
                let api = api.clone();
                let grade = owned.clone();
                async move { api.current_model(&grade).await }
            },
        )
    }

    pub fn me_query(&self) -> FetchDescriptor<UserResponse> {
        let api = self.api.clone();
        FetchDescriptor::new(QueryKey::new(resources::AUTH).param("me"), ME_STALE, move || {
            let api = api.clone();
            async move { api.me().await }
        })
    }

    // Merged views

    pub fn current_prices_group(&self) -> MergeGroup<Vec<PriceWithChange>, Vec<PriceWithChange>> {
        MergeGroup::new(
            "current prices",
            CURRENT_PRICES_SNAPSHOT,
            vec![self.current_prices_query()],
            merge_current_prices,
        )
    }

    pub fn chart_series_group(
        &self,
        grades: &[String],
        days: u32,
    ) -> MergeGroup<Vec<PriceHistory>, ChartSeries> {
        let descriptors = grades
            .iter()
            .map(|grade| self.price_history_query(grade, days))
            .collect();
        let labels = grades.to_vec();
        MergeGroup::new(
            "price chart",
            chart_snapshot_key(grades, days),
            descriptors,
            move |parts: &[Option<Arc<Vec<PriceHistory>>>]| merge_chart_series(&labels, parts),
        )
    }

    pub fn current_prices(&self) -> Reconciler<Vec<PriceWithChange>> {
        Reconciler::mount(
            &self.queries,
            Arc::clone(&self.snapshots),
            self.current_prices_group(),
        )
    }

    pub fn chart_series(&self, grades: &[String], days: u32) -> Reconciler<ChartSeries> {
        Reconciler::mount(
            &self.queries,
            Arc::clone(&self.snapshots),
            self.chart_series_group(grades, days),
        )
    }

    /// Observes `descriptor` until it settles and returns its value, from
    /// cache when fresh.
    pub async fn load<V: Send + Sync + 'static>(
        &self,
        descriptor: &FetchDescriptor<V>,
    ) -> Result<Arc<V>, ApiError> {
        let mut observer = self.queries.observe(descriptor);
        match observer.settled().await {
            FetchState::Failed { error, .. } => Err(error),
            state => state.value().cloned().ok_or_else(|| {
                ApiError::Network(format!("Query {} finished without a value", descriptor.key()))
            }),
        }
    }

    // Mutations

    pub async fn create_alert(&self, alert: &AlertCreate) -> Result<Alert, ApiError> {
        let created = self.api.create_alert(alert).await?;
        info!(id = created.id, grade = %created.grade, "Alert created");
        self.queries.invalidate(resources::ALERTS);
        Ok(created)
    }

    pub async fn delete_alert(&self, id: i64) -> Result<(), ApiError> {
        self.api.delete_alert(id).await?;
        info!(id, "Alert deleted");
        self.queries.invalidate(resources::ALERTS);
        Ok(())
    }

    pub async fn refresh_predictions(&self) -> Result<Vec<Prediction>, ApiError> {
        let predictions = self.api.refresh_predictions().await?;
        info!(count = predictions.len(), "Predictions regenerated");
        self.queries.invalidate(resources::PREDICTIONS);
        self.queries.invalidate(resources::FORECAST);
        Ok(predictions)
    }

    /// Forgets cached query results, e.g. when the user changes.
    pub fn reset(&self) {
        debug!("Resetting dashboard queries");
        self.queries.clear();
    }
}
