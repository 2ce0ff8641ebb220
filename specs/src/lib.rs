//! Serializable specifications shared by the training core and the orchestrator.
//!
//! Every runtime object of the system (embedder, optimizer, trainer, preprocessing transform, a
//! whole run) has a plain-data counterpart here that can be read from or written to JSON.

pub mod machine_learning;
pub mod run;
