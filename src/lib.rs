pub mod controller;
pub mod hardware;
pub mod nvs_storage;
pub mod pump;
pub mod safety;
pub mod server;
pub mod state;
pub mod system;
pub mod transition;
pub mod types;
pub mod wifi;

pub use types::*;
pub use controller::*;
