mod act_fn;
mod gelu;
mod relu;
mod sigmoid;

pub use act_fn::ActFn;
pub use gelu::Gelu;
pub use relu::Relu;
pub use sigmoid::Sigmoid;
