//! Route handler modules for the wallet REST API.

pub mod auth;
pub mod contacts;
pub mod health;
pub mod notifications;
pub mod theme;
pub mod transfers;
pub mod websocket;
