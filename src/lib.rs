pub mod archive;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod images;
pub mod reference;
pub mod session;

pub use error::Error;
