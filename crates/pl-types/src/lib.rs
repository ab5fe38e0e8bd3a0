pub mod errors;
pub mod params;
pub mod registry;
pub mod tracking;

pub use errors::*;
pub use params::*;
pub use registry::*;
pub use tracking::*;
