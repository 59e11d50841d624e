//! collabdash: dashboard for collaborative deep-learning training runs.
//!
//! Pulls per-participant runs from an experiment-tracking GraphQL service,
//! resolves community profiles, and reduces them to headline metrics, a
//! runtime leaderboard and chart-ready data.

pub mod aggregate;
pub mod analytics;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod presentation;
pub mod profiles;
pub mod tracker;
pub mod utils;
pub mod web;
