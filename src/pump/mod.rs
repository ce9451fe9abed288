pub mod controller;
pub mod states;

pub use controller::*;
pub use states::*;
