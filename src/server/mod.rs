pub mod api;
#[cfg(target_os = "espidf")]
pub mod http;
