pub mod auth;
pub mod config;
pub mod error;
pub mod extractor;
pub mod notifications;
pub mod routes;
pub mod workflow;
