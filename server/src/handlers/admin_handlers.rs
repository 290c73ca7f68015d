use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

use crate::db::repositories::admin_number_repository::AdminNumberRepository;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct SetAdminNumberBody {
    pub number: Option<String>,
    pub status: Option<String>,
}

/// Current admin forwarding number, with inactive defaults when unset.
pub async fn get_admin_number_handler(
    admin_repo: web::Data<AdminNumberRepository>,
) -> AppResult<HttpResponse> {
    match admin_repo.get().await? {
        Some(admin_number) => Ok(HttpResponse::Ok().json(admin_number)),
        None => Ok(HttpResponse::Ok().json(serde_json::json!({
            "number": "Inactive",
            "status": "OFF",
        }))),
    }
}

/// Set the admin forwarding number. Selecting OFF overrides the number to
/// "Inactive".
pub async fn set_admin_number_handler(
    admin_repo: web::Data<AdminNumberRepository>,
    req_body: web::Json<SetAdminNumberBody>,
) -> AppResult<HttpResponse> {
    let status = match req_body.status.as_deref() {
        Some(status) if ["ON", "OFF"].contains(&status) => status.to_string(),
        Some(_) => {
            return Err(AppError::Validation(
                "status must be 'ON' or 'OFF'".to_string(),
            ))
        }
        None => "OFF".to_string(),
    };

    let number = if status == "OFF" {
        "Inactive".to_string()
    } else {
        match req_body.number.as_deref() {
            Some(number) if !number.trim().is_empty() => number.trim().to_string(),
            _ => return Err(AppError::Validation("number is required".to_string())),
        }
    };

    let admin_number = admin_repo.set(&number, &status).await?;

    info!(status = %admin_number.status, "Admin number updated");

    Ok(HttpResponse::Ok().json(admin_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_body_accepts_partial_payload() {
        let body: SetAdminNumberBody = serde_json::from_str(r#"{"status": "OFF"}"#).unwrap();
        assert!(body.number.is_none());
        assert_eq!(body.status.as_deref(), Some("OFF"));
    }
}
