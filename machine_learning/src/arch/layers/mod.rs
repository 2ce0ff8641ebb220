mod block;
mod dense;
mod l2_norm;
mod patch_embed;

pub use block::Block;
pub use dense::Dense;
pub use l2_norm::L2Norm;
pub use patch_embed::PatchEmbed;
