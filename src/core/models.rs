//! Payloads exchanged with the remote price service

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Egg grades published by the price service, largest first.
pub const GRADES: [&str; 5] = ["왕란", "특란", "대란", "중란", "소란"];

/// Grade used when the caller does not pick one.
pub const DEFAULT_GRADE: &str = "대란";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceWithChange {
    pub date: String,
    pub grade: String,
    pub wholesale_price: Option<f64>,
    pub retail_price: Option<f64>,
    pub unit: String,
    pub daily_change: Option<f64>,
    pub daily_change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub id: i64,
    pub date: String,
    pub grade: String,
    pub wholesale_price: Option<f64>,
    pub retail_price: Option<f64>,
    pub unit: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub base_date: String,
    pub target_date: String,
    pub grade: String,
    pub predicted_price: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub horizon_days: i32,
    pub model_version: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub grade: String,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastItem {
    pub date: String,
    pub price: f64,
    pub confidence_interval: (f64, f64),
    pub change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub grade: String,
    pub current_price: Option<f64>,
    pub predictions: Vec<ForecastItem>,
    pub trend: String,
    pub alert: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Above,
    Below,
}

impl Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AlertCondition::Above => "above",
                AlertCondition::Below => "below",
            }
        )
    }
}

impl FromStr for AlertCondition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(AlertCondition::Above),
            "below" => Ok(AlertCondition::Below),
            _ => Err(anyhow::anyhow!("Invalid alert condition: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub grade: String,
    pub condition: AlertCondition,
    pub threshold_price: f64,
    pub notify_email: bool,
    pub notify_sms: bool,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCreate {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub grade: String,
    pub condition: AlertCondition,
    pub threshold_price: f64,
    pub notify_email: bool,
    pub notify_sms: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataSnapshot {
    pub date: String,
    pub prices: std::collections::BTreeMap<String, Option<f64>>,
    pub volume: Option<f64>,
    pub corn_price: Option<f64>,
    pub exchange_rate: Option<f64>,
    pub avian_flu: bool,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorImpact {
    pub factor: String,
    pub direction: String,
    pub description: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsFactorsResponse {
    pub grade: String,
    pub date: String,
    pub factors: Vec<FactorImpact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub model_version: String,
    pub grade: String,
    pub eval_date: String,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub directional_accuracy: f64,
    pub is_production: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent when the server keeps the existing refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}
