//! Utility modules for the asset pipeline.

pub mod css;
pub mod exec;
pub mod js;
pub mod minify;
