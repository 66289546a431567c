//! # Google Cloud Adapters
//!
//! REST clients for Secret Manager and Certificate Manager, sharing one
//! `reqwest` client and one token source.

pub mod auth;
pub mod certificate_manager;
pub mod client;
pub mod operations;
pub mod secret_manager;
