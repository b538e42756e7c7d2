mod act_fn;
mod relu;
mod softmax;

pub use act_fn::ActFn;
pub use relu::Relu;
pub use softmax::{softmax, softmax_backward};
