//! Classroom Controller Library
//!
//! Server-side coordination for live classroom sessions. A presenter opens a
//! room, viewers join it with a short code, and the room's event bus carries
//! quiz rounds, attention changes, and raised hands between them. Every
//! focus transition and quiz answer is appended to a durable log, from which
//! the end-of-class engagement report is computed.
//!
//! # Architecture
//!
//! ```text
//! routes.rs -> handlers/*.rs -> actors (directory -> room -> quiz, voice)
//!                            -> viewer::focus -> bus + store
//!                            -> engagement (report from store)
//! ```
//!
//! # Modules
//!
//! - `actors` - Room Directory supervisor and per-room actors
//! - `auth` - Token Issuer for room credentials
//! - `bus` - In-room event bus messages, subscriptions, publishers
//! - `presenter` - Quiz Lifecycle Controller and Voice Trigger
//! - `viewer` - Focus Tracker
//! - `engagement` - Engagement Scorer
//! - `store` - Durable activity log (Postgres or in-memory)
//! - `generator` - Quiz question generator client
//! - `view` - Client screen router
//! - `handlers`, `routes`, `middleware` - HTTP and WebSocket surface
//! - `observability` - Metrics and health checks

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod auth;
pub mod bus;
pub mod config;
pub mod engagement;
pub mod errors;
pub mod generator;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod presenter;
pub mod routes;
pub mod store;
pub mod view;
pub mod viewer;
