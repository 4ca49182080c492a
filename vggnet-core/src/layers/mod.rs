//! Network stages. Only convolution is offloaded; pooling, dense layers and the
//! classification head run on the host.

pub mod classify;
pub mod conv;
pub mod dense;
pub mod pool;

pub use classify::{Prediction, arg_max, classify, softmax};
pub use conv::{ConvGeometry, ConvRequest, ConvolutionBackend, HostConvolution};
pub use dense::dense_forward;
pub use pool::max_pool_2x2;
