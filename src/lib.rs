// cmsgate: CMS detection gateway
// Exposes the validator, scanner and HTTP service as a library

pub mod auth;
pub mod cli;
pub mod dns;
pub mod error;
pub mod rate_limit;
pub mod sanitize;
pub mod scanner;
pub mod server;
pub mod validation;
