//! Port attribute resolution
//!
//! Attributes come from two places: rules in the `ports_attributes`
//! configuration and runtime providers registered by extensions. Config
//! always wins field by field; providers can only contribute the
//! auto-forward action when configuration leaves it unset.

mod resolver;
mod rules;

pub use resolver::AttributesResolver;
pub use rules::{PortRule, PortsAttributes, RuleKey};
