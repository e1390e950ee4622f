//! PDF Sessions: session-based asynchronous document transformation.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod service;
pub mod session;
pub mod storage;
pub mod tools;
