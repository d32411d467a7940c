pub mod attribute;
pub mod config;
pub mod error;
pub mod event;
pub mod selector;

pub use attribute::*;
pub use config::Config;
pub use error::*;
pub use event::*;
pub use selector::*;
