pub mod gateway;
pub mod notifications;
