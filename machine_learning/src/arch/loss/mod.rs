pub mod distance;
mod loss_fn;
mod prototypical;

pub use loss_fn::{EpisodeStats, EpisodicLoss};
pub use prototypical::{DEFAULT_DISTANCE_FLOOR, PrototypicalLoss};
