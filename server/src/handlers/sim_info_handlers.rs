use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::debug;

use crate::db::repositories::sim_info_repository::SimInfoRepository;
use crate::error::{AppError, AppResult};
use crate::services::identity::DeviceIdentity;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSimInfoBody {
    pub sim_slot: i32,
    pub carrier_name: Option<String>,
    pub country_iso: Option<String>,
    pub number: Option<String>,
}

/// Store the SIM details reported by a device for one slot.
pub async fn report_sim_info_handler(
    sim_info_repo: web::Data<SimInfoRepository>,
    path: web::Path<String>,
    req_body: web::Json<ReportSimInfoBody>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    if ![0, 1].contains(&req_body.sim_slot) {
        return Err(AppError::Validation("simSlot must be 0 or 1".to_string()));
    }

    let sim_info = sim_info_repo
        .upsert_sim_info(
            &identity,
            req_body.sim_slot,
            req_body.carrier_name.as_deref(),
            req_body.country_iso.as_deref(),
            req_body.number.as_deref(),
        )
        .await?;

    debug!(device_id = %identity, sim_slot = sim_info.sim_slot, "SIM info saved");

    Ok(HttpResponse::Ok().json(sim_info))
}

/// List the SIM details known for a device.
pub async fn get_sim_info_handler(
    sim_info_repo: web::Data<SimInfoRepository>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    let records = sim_info_repo.list_for_device(&identity).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "data": records })))
}
