pub mod config;
pub mod error;
pub mod extractor;
pub mod profile;
pub mod quota;
pub mod response;
pub mod routes;
pub mod session;
