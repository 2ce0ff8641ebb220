pub mod arch;
pub mod data;
pub mod error;
pub mod inference;
pub mod initialization;
pub mod optimization;
pub mod params;
pub mod prototypes;
pub mod training;

pub use error::{MlErr, Result};
