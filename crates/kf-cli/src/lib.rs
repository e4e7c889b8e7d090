//! kf-cli: Command-line interface for k-Forward
//!
//! Provides the `k-forward` CLI for checking port attribute rules and
//! inspecting the forwarded ports a remote session has persisted.

pub mod commands;
pub mod output;
