pub mod config;
pub mod credential;
pub mod environment;
pub mod events;
pub mod http;
pub mod registry;
pub mod relay;
pub mod server;
pub mod sse;
pub mod store;
pub mod supervisor;
pub mod upstream;

pub use config::Config;
pub use store::{Kind, Store};
