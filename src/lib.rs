//! openagi library: global config store, session context, API-key approval, tool registry,
//! permission gate, execution engine, built-in tools.

pub mod auth;
pub mod config;
pub mod logging;
pub mod session;
pub mod tools;
