use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

use crate::db::repositories::call_code_repository::CallCodeRepository;
use crate::db::repositories::device_repository::DeviceRepository;
use crate::error::{AppError, AppResult};
use crate::services::identity::DeviceIdentity;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCallCodeBody {
    pub code: String,
    #[serde(rename = "type")]
    pub code_type: String,
    pub sim_slot: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallForwardBody {
    pub sim_slot: i32,
    pub enabled: bool,
    pub action_by: Option<String>,
}

fn validate_sim_slot(sim_slot: i32) -> AppResult<()> {
    if ![0, 1].contains(&sim_slot) {
        return Err(AppError::Validation("simSlot must be 0 or 1".to_string()));
    }
    Ok(())
}

/// Current call-forwarding instruction for a device. Returns an inactive
/// default when none has been issued yet.
pub async fn get_call_code_handler(
    call_code_repo: web::Data<CallCodeRepository>,
    device_repo: web::Data<DeviceRepository>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    device_repo
        .find_device(&identity)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    match call_code_repo.find_latest_call_code(&identity).await? {
        Some(call_code) => Ok(HttpResponse::Ok().json(call_code)),
        None => Ok(HttpResponse::Ok().json(serde_json::json!({
            "deviceId": identity.as_str(),
            "code": "",
            "type": "",
            "simSlot": null,
            "status": "inactive",
        }))),
    }
}

/// Issue or replace the call-forwarding instruction for a device. The
/// change event fans out to the device immediately when it is online; an
/// offline device receives it on its next registration.
pub async fn update_call_code_handler(
    call_code_repo: web::Data<CallCodeRepository>,
    device_repo: web::Data<DeviceRepository>,
    path: web::Path<String>,
    req_body: web::Json<UpdateCallCodeBody>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    if req_body.code.trim().is_empty() {
        return Err(AppError::Validation("code is required".to_string()));
    }
    if !["ussd", "number"].contains(&req_body.code_type.as_str()) {
        return Err(AppError::Validation(
            "type must be 'ussd' or 'number'".to_string(),
        ));
    }
    validate_sim_slot(req_body.sim_slot)?;

    device_repo
        .find_device(&identity)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    let call_code = call_code_repo
        .upsert_call_code(
            &identity,
            req_body.code.trim(),
            &req_body.code_type,
            req_body.sim_slot,
        )
        .await?;

    info!(
        device_id = %identity,
        sim_slot = call_code.sim_slot,
        "Call code saved"
    );

    Ok(HttpResponse::Ok().json(call_code))
}

/// Record a call-forward enable/disable action; delivered live to the
/// device as a call command through the change bridge.
pub async fn call_forward_handler(
    call_code_repo: web::Data<CallCodeRepository>,
    device_repo: web::Data<DeviceRepository>,
    path: web::Path<String>,
    req_body: web::Json<CallForwardBody>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;
    validate_sim_slot(req_body.sim_slot)?;

    device_repo
        .find_device(&identity)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    let action_by = req_body.action_by.as_deref().unwrap_or("system");
    let log = call_code_repo
        .log_forward_action(&identity, req_body.sim_slot, req_body.enabled, action_by)
        .await?;

    info!(
        device_id = %identity,
        sim_slot = log.sim_slot,
        status = %log.status,
        "Call forward action recorded"
    );

    Ok(HttpResponse::Ok().json(log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_call_code_body_uses_type_alias() {
        let body: UpdateCallCodeBody =
            serde_json::from_str(r#"{"code": "*21#", "type": "ussd", "simSlot": 1}"#).unwrap();
        assert_eq!(body.code_type, "ussd");
        assert_eq!(body.sim_slot, 1);
    }

    #[test]
    fn test_sim_slot_validation() {
        assert!(validate_sim_slot(0).is_ok());
        assert!(validate_sim_slot(1).is_ok());
        assert!(validate_sim_slot(2).is_err());
        assert!(validate_sim_slot(-1).is_err());
    }
}
