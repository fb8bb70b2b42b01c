pub mod client_ip;
pub mod validation;

pub use client_ip::ClientIp;
pub use validation::{ValidatedJson, ValidatedQuery};
