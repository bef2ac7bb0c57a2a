//! Post-processing of model replies.

pub mod json;
