//! Story Engine — branching narrative content with embedded Lua scripting.
//!
//! Loads a parsed story definition, owns all variable scopes, drives
//! section entry and exit, evaluates and executes choices, interpolates
//! live expressions into narrative text, and dispatches external events
//! and lifecycle hooks.

pub mod core;
pub mod schema;
