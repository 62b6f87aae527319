//! # Auth Module
//!
//! This module handles all authentication-related functionality including:
//! - Access/refresh token sessions and password accounts
//! - OAuth sign-in through the redirect and device flows
//! - API keys with scopes
//! - `AuthContext` / `AuthedUser` extractors for protected routes

pub mod device;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod routes;
pub mod security;
pub mod service;
pub mod state_store;
pub mod validators;


pub use routes::auth_routes;
pub use service::AuthService;
