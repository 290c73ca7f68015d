use crate::handlers;
use actix_web::web;

/// Configures the REST API routes. Mounted under the "/api" scope in
/// main.rs; the WebSocket and health endpoints are mounted there directly.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/device")
            .route("/register", web::post().to(handlers::device_handlers::register_device_handler))
            .route("/status", web::post().to(handlers::device_handlers::update_status_handler))
            .route("/all", web::get().to(handlers::device_handlers::get_devices_handler))
            .route("/{id}", web::get().to(handlers::device_handlers::get_device_handler)),
    );

    cfg.service(
        web::scope("/sms")
            .route("/{id}", web::get().to(handlers::sms_handlers::get_sms_handler))
            .route("/{id}", web::post().to(handlers::sms_handlers::send_sms_handler)),
    );

    cfg.service(
        web::scope("/sim")
            .route("/{id}", web::get().to(handlers::sim_info_handlers::get_sim_info_handler))
            .route("/{id}", web::post().to(handlers::sim_info_handlers::report_sim_info_handler)),
    );

    cfg.service(
        web::scope("/notification")
            .route("/receive", web::post().to(handlers::notification_handlers::receive_notification_handler))
            .route("/all", web::get().to(handlers::notification_handlers::get_all_notifications_handler))
            .route("/{id}", web::get().to(handlers::notification_handlers::get_device_notifications_handler)),
    );

    cfg.service(
        web::scope("/call")
            .route("/{id}", web::get().to(handlers::call_handlers::get_call_code_handler))
            .route("/{id}", web::post().to(handlers::call_handlers::update_call_code_handler))
            .route("/{id}/forward", web::post().to(handlers::call_handlers::call_forward_handler)),
    );

    cfg.service(
        web::scope("/admin")
            .route("/number", web::get().to(handlers::admin_handlers::get_admin_number_handler))
            .route("/number", web::post().to(handlers::admin_handlers::set_admin_number_handler)),
    );

    cfg.service(
        web::scope("/last-seen")
            .route("/{id}", web::get().to(handlers::presence_handlers::get_last_seen_handler))
            .route("/{id}", web::post().to(handlers::presence_handlers::update_last_seen_handler)),
    );
}
