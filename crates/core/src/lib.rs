pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod series;
pub mod trace;

pub use backend::SearchBackend;
pub use config::Config;
pub use document::*;
pub use error::*;
pub use series::*;
pub use trace::*;
