//! Typed calls for each endpoint of the price service

use super::{ApiClient, ApiRequest};
use crate::core::error::ApiError;
use crate::core::models::{
    Alert, AlertCreate, AnalyticsFactorsResponse, ForecastResponse, LoginRequest,
    MarketDataSnapshot, ModelPerformance, Prediction, PredictionSummary, PriceHistory,
    PriceWithChange, RegisterRequest, TokenResponse, UserResponse,
};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct DashboardApi {
    client: Arc<ApiClient>,
}

impl DashboardApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    // Auth

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenResponse, ApiError> {
        let request = ApiRequest::post("/auth/login")
            .json(request)?
            .unauthenticated();
        self.client.fetch_json(&request).await
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<UserResponse, ApiError> {
        let request = ApiRequest::post("/auth/register")
            .json(request)?
            .unauthenticated();
        self.client.fetch_json(&request).await
    }

    pub async fn me(&self) -> Result<UserResponse, ApiError> {
        self.client.fetch_json(&ApiRequest::get("/auth/me")).await
    }

    // Prices

    pub async fn current_prices(&self) -> Result<Vec<PriceWithChange>, ApiError> {
        self.client
            .fetch_json(&ApiRequest::get("/prices/current"))
            .await
    }

    pub async fn price_history(&self, grade: &str, days: u32) -> Result<Vec<PriceHistory>, ApiError> {
        let request = ApiRequest::get("/prices/history")
            .query("grade", grade)
            .query("days", days);
        self.client.fetch_json(&request).await
    }

    // Predictions

    pub async fn forecast(&self, grade: &str) -> Result<ForecastResponse, ApiError> {
        let request = ApiRequest::get("/predictions/forecast").query("grade", grade);
        self.client.fetch_json(&request).await
    }

    pub async fn predictions(&self, grade: &str) -> Result<PredictionSummary, ApiError> {
        let path = format!(
            "/predictions/{}",
            url::form_urlencoded::byte_serialize(grade.as_bytes()).collect::<String>()
        );
        self.client.fetch_json(&ApiRequest::get(path)).await
    }

    pub async fn refresh_predictions(&self) -> Result<Vec<Prediction>, ApiError> {
        self.client
            .fetch_json(&ApiRequest::post("/predictions/refresh"))
            .await
    }

    // Alerts

    pub async fn alerts(&self, email: &str) -> Result<Vec<Alert>, ApiError> {
        let request = ApiRequest::get("/alerts").query("email", email);
        self.client.fetch_json(&request).await
    }

    pub async fn create_alert(&self, alert: &AlertCreate) -> Result<Alert, ApiError> {
        let request = ApiRequest::post("/alerts").json(alert)?;
        self.client.fetch_json(&request).await
    }

    pub async fn delete_alert(&self, id: i64) -> Result<(), ApiError> {
        self.client
            .execute(&ApiRequest::delete(format!("/alerts/{id}")))
            .await?;
        Ok(())
    }

    // Market data and models

    pub async fn market_snapshot(&self, date: Option<&str>) -> Result<MarketDataSnapshot, ApiError> {
        let mut request = ApiRequest::get("/market/snapshot");
        if let Some(date) = date {
            request = request.query("target_date", date);
        }
        self.client.fetch_json(&request).await
    }

    pub async fn analytics_factors(&self, grade: &str) -> Result<AnalyticsFactorsResponse, ApiError> {
        let request = ApiRequest::get("/analytics/factors").query("grade", grade);
        self.client.fetch_json(&request).await
    }

    pub async fn current_model(&self, grade: &str) -> Result<Option<ModelPerformance>, ApiError> {
        let request = ApiRequest::get("/models/current").query("grade", grade);
        self.client.fetch_json(&request).await
    }

    pub async fn model_performance(&self, grade: &str) -> Result<Vec<ModelPerformance>, ApiError> {
        let request = ApiRequest::get("/models/performance").query("grade", grade);
        self.client.fetch_json(&request).await
    }
}
