//! CLI command implementations

pub(crate) mod check;
pub(crate) mod common;
pub(crate) mod history;
pub(crate) mod run;
pub(crate) mod validate;
