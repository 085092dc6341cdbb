//! Data types shared across the converge workspace: observed API objects,
//! quota quantities and limits, typed JSON field access and config files.

pub mod config;
pub mod fields;
pub mod namespace;
pub mod object;
pub mod pod;
pub mod quota;
pub mod validate;
