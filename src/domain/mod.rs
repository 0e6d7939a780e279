pub mod asset;
pub mod state;

pub use asset::*;
pub use state::*;
