use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Tier;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub target_uid: String,
    /// 天数
    pub duration: i64,
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    pub target_uid: String,
    pub tier: Tier,
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct MaintenanceResponse {
    pub status: &'static str,
}
