//! Infrastructure layer (adapters/implementations).
//!
//! This module contains IO-heavy integrations (SQLite, filesystem, image codecs).

pub mod app_config;
pub mod db;
pub mod image;
pub mod storage;
