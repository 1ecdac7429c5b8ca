//! Helpers shared by the demos: host-side interface setup and a stderr
//! logger.

pub mod logger;
pub mod network;
