use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod db;
mod error;
mod handlers;
mod routes;
mod services;

use crate::config::AppSettings;
use crate::db::connection::{create_pool, verify_connection};
use crate::db::repositories::{
    AdminNumberRepository, CallCodeRepository, DeviceRepository, NotificationRepository,
    PresenceRepository, SimInfoRepository, SmsRepository,
};
use crate::routes::configure_routes;
use crate::services::change_bridge::ChangeBridge;
use crate::services::fanout::FanoutDispatcher;
use crate::services::presence_tracker::PresenceTracker;
use crate::services::session_registry::SessionRegistry;
use crate::services::watcher_registry::WatcherRegistry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    // Database connection setup
    let db_pool = match create_pool(&app_settings).await {
        Ok(pool) => {
            if let Err(e) = verify_connection(&pool).await {
                log::error!("Database connection verification failed: {}", e);
                log::error!("Cannot start server without a working database connection");
                std::process::exit(1);
            }
            log::info!("Database connection established successfully");
            pool
        }
        Err(e) => {
            log::error!("Failed to create database connection pool: {}", e);
            log::error!("Cannot start server without a working database connection");
            std::process::exit(1);
        }
    };
    let db_pool = Arc::new(db_pool);
    let feed_channel = app_settings.feed.channel.clone();

    // Repositories
    let device_repository = DeviceRepository::new(db_pool.clone(), feed_channel.clone());
    let presence_repository = PresenceRepository::new(db_pool.clone());
    let call_code_repository = CallCodeRepository::new(db_pool.clone(), feed_channel.clone());
    let sms_repository = SmsRepository::new(db_pool.clone(), feed_channel.clone());
    let sim_info_repository = SimInfoRepository::new(db_pool.clone(), feed_channel.clone());
    let notification_repository =
        NotificationRepository::new(db_pool.clone(), feed_channel.clone());
    let admin_number_repository =
        AdminNumberRepository::new(db_pool.clone(), feed_channel.clone());

    // Realtime core: registries, fanout, presence, change bridge.
    // Process-lifetime state, initialized empty; devices re-register on
    // reconnect after a restart.
    let sessions = Arc::new(SessionRegistry::new());
    let watchers = Arc::new(WatcherRegistry::new());
    let fanout = Arc::new(FanoutDispatcher::new(sessions.clone(), watchers.clone()));
    let presence = Arc::new(PresenceTracker::new(
        sessions.clone(),
        Arc::new(presence_repository.clone()),
        fanout.clone(),
        Duration::from_secs(app_settings.presence.offline_grace_secs),
    ));
    let bridge = Arc::new(ChangeBridge::new(
        fanout.clone(),
        Arc::new(call_code_repository.clone()),
    ));

    bridge.clone().spawn_listen_loop(
        (*db_pool).clone(),
        feed_channel,
        Duration::from_secs(app_settings.feed.retry_backoff_secs),
    );
    log::info!("Change propagation bridge started");

    // Safety net behind the live presence tracking: devices whose heartbeats
    // stopped without a clean disconnect are swept offline.
    let sweep_repo = device_repository.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match sweep_repo.mark_stale_devices_offline().await {
                Ok(0) => {}
                Ok(count) => log::info!("Marked {} stale devices offline", count),
                Err(e) => log::warn!("Stale device sweep failed: {}", e),
            }
        }
    });

    // Get server host and port from settings
    let host = &app_settings.server.host;
    let port = app_settings.server.port;

    log::info!("Starting server at http://{}:{}", host, port);

    let server_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(server_addr)?;

    HttpServer::new(move || {
        let app_settings = app_settings.clone();

        // Configure CORS using actix-cors
        let mut cors = Cors::default().supports_credentials();

        if app_settings.server.cors_origins.contains(&"*".to_string()) {
            cors = cors.allow_any_origin();
        } else {
            for origin in &app_settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }

        cors = cors.allow_any_method().allow_any_header();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(app_settings.clone()))
            .app_data(web::Data::new(device_repository.clone()))
            .app_data(web::Data::new(presence_repository.clone()))
            .app_data(web::Data::new(call_code_repository.clone()))
            .app_data(web::Data::new(sms_repository.clone()))
            .app_data(web::Data::new(sim_info_repository.clone()))
            .app_data(web::Data::new(notification_repository.clone()))
            .app_data(web::Data::new(admin_number_repository.clone()))
            .app_data(web::Data::from(sessions.clone()))
            .app_data(web::Data::from(watchers.clone()))
            .app_data(web::Data::from(presence.clone()))
            .app_data(web::Data::from(bridge.clone()))
            // Health check endpoint without auth
            .service(web::resource("/health").route(web::get().to(handlers::health::health_check)))
            // Realtime endpoints
            .service(
                web::resource("/ws/device")
                    .route(web::get().to(handlers::ws_handlers::device_ws_handler)),
            )
            .service(
                web::resource("/ws/dashboard")
                    .route(web::get().to(handlers::ws_handlers::dashboard_ws_handler)),
            )
            // REST API routes
            .service(web::scope("/api").configure(configure_routes))
    })
    .listen(listener)?
    .run()
    .await
}
