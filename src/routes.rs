use std::sync::Arc;

use axum::{
    http::{Response, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::{ingest::CycleReport, slots::{SlotPool, SlotPools}};

#[derive(Debug, Serialize, PartialEq)]
pub struct SlotUsage {
    pub capacity: usize,
    pub available: usize,
}

impl From<&SlotPool> for SlotUsage {
    fn from(pool: &SlotPool) -> Self {
        SlotUsage {
            capacity: pool.capacity(),
            available: pool.available(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SlotsStatus {
    pub api: SlotUsage,
    pub db: SlotUsage,
}

pub async fn get_health() -> impl IntoResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/text")
        .body("OK".to_string())
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn get_latest_cycle(
    Extension(latest_cycle): Extension<Arc<RwLock<Option<CycleReport>>>>,
) -> Result<Json<CycleReport>, (StatusCode, String)> {
    let reader = latest_cycle.read().await;
    match reader.as_ref() {
        Some(report) => Ok(Json(report.clone())),
        None => Err((StatusCode::NOT_FOUND, "No cycle has finished yet.".to_string())),
    }
}

pub async fn get_slots(Extension(slots): Extension<SlotPools>) -> Json<SlotsStatus> {
    Json(SlotsStatus {
        api: SlotUsage::from(&slots.api),
        db: SlotUsage::from(&slots.db),
    })
}
