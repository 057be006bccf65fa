pub mod contacts;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod notifications;
pub mod session;
pub mod settings;
pub mod storage;
pub mod theme;
pub mod web_client;
