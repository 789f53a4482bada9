//! # shardwise
//!
//! `shardwise` is a pure Rust toolkit for reasoning about sharded tensor programs on CPU.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: contiguous N-dimensional tensors with the layout and indexing ops the
//!   planner and the layers need (`permute`, `transpose2`, `gather`, broadcasting).
//! - [`nn`]: activation layers and their functional forms.
//! - [`distributed`]: the auto-parallel planner: process meshes, dims-mapping propagation, the
//!   distributed operator registry and the per-process cost model.
//! - [`conformance`]: runs an op under several execution modes and checks they agree.
//!
//! ## Example
//!
//! ```rust
//! use shardwise::nn::{ActivationLayer, Relu};
//! use shardwise::tensor::Tensor;
//!
//! let x = Tensor::<f32, 2>::new(vec![-1.0, 2.0, -3.0, 4.0], [2, 2]).unwrap();
//! let y = Relu::new().forward(&x).unwrap();
//! assert_eq!(y.data(), &[0.0, 2.0, 0.0, 4.0]);
//! assert_eq!(Relu::new().with_name("act").to_string(), "ReLU(name=act)");
//! ```

pub mod conformance;
pub mod distributed;
pub mod nn;
pub mod tensor;

pub use tensor::{FloatElem, Tensor, TensorElem, TensorError};
