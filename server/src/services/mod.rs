pub mod change_bridge;
pub mod connection;
pub mod dashboard_ws;
pub mod device_link_ws;
pub mod fanout;
pub mod identity;
pub mod presence_tracker;
pub mod session_registry;
pub mod watcher_registry;
