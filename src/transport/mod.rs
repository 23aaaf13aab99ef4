//! Transport layer: browser and terminal front-ends

pub mod cli;
pub mod http;
