//! Flow sampler polling and aggregation engine

pub mod pipeline;
pub mod source;
