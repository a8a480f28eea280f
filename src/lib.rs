pub mod config;
pub mod constants;
pub mod engagement;
pub mod logging;
pub mod runtime;
