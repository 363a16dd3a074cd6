#![deny(missing_docs)]
//! Telegram Image AI Bot
//!
//! A Telegram bot that accepts user-uploaded images and returns processed
//! results: background removal and AI editing through external vendor APIs,
//! quality enhancement and wallpaper conversion locally. Admission of every
//! upload runs through a per-user sliding-window rate limiter fused with the
//! session state machine in [`session`].

/// Telegram bot implementation
pub mod bot;
/// Processed-result caching
pub mod cache;
/// Configuration management
pub mod config;
/// Local image transforms
pub mod imaging;
/// Rate limiting and session tracking
pub mod session;
pub mod utils;
/// Upload validation policy
pub mod validation;
/// External vendor API clients
pub mod vendors;
