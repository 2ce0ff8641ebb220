//! Class prototypes: the mean embedding of every class.
//!
//! The same accumulation backs both the episodic prototypes built inside the loss for
//! every batch and the persistent table built once over a whole training set.

mod accumulator;
mod label_map;
mod table;

pub use accumulator::{PrototypeAccumulator, build_prototypes};
pub use label_map::LabelMap;
pub use table::{Prototype, PrototypeTable};
