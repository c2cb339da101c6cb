// forum-common: shared wire types and service plumbing for the forum workspace

pub mod db;
pub mod error;
pub mod http;
pub mod protocol;
pub mod telemetry;
