pub mod admin_number_repository;
pub mod call_code_repository;
pub mod device_repository;
pub mod notification_repository;
pub mod presence_repository;
pub mod sim_info_repository;
pub mod sms_repository;

pub use admin_number_repository::AdminNumberRepository;
pub use call_code_repository::CallCodeRepository;
pub use device_repository::DeviceRepository;
pub use notification_repository::NotificationRepository;
pub use presence_repository::PresenceRepository;
pub use sim_info_repository::SimInfoRepository;
pub use sms_repository::SmsRepository;
