//! Library crate for tune-rush-back, exposing modules for the binary and integration tests.

pub mod catalog;
pub mod config;
pub mod dto;
pub mod error;
pub mod routes;
pub mod scoring;
pub mod services;
pub mod state;
