pub mod admin_handlers;
pub mod call_handlers;
pub mod device_handlers;
pub mod health;
pub mod notification_handlers;
pub mod presence_handlers;
pub mod sim_info_handlers;
pub mod sms_handlers;
pub mod ws_handlers;
