//! # Distributed Planning
//!
//! Training a model that does not fit on one device means splitting its tensors across many.
//! This module holds the planning side of that split: deciding *how* each tensor is sharded,
//! what that costs, and which communication the split forces into the program.
//!
//! ## 🧩 Parallelism in one picture
//!
//! A device **mesh** arranges processes in a grid, e.g. `[2, 4]` for 2 nodes with 4 devices each.
//! Every tensor axis is either replicated or split along one mesh dimension:
//!
//! ```text
//!              mesh dim 1 ->
//!            +----+----+----+----+
//! mesh dim 0 | p0 | p1 | p2 | p3 |      activations [batch, hidden] with mapping [0, -1]:
//!     |      +----+----+----+----+      batch split over the rows (data parallelism),
//!     v      | p4 | p5 | p6 | p7 |      hidden replicated on every device of a row.
//!            +----+----+----+----+
//! ```
//!
//! *   **Data Parallelism**: the batch axis is split. Parameter gradients differ per shard and are
//!     averaged with an **All-Reduce** followed by a scale.
//! *   **Tensor Parallelism**: a weight axis is split. Ops must agree on how their inputs and
//!     outputs are split, which is what dims-mapping propagation enforces.
//!
//! ## 📦 Module Contents
//!
//! *   [`auto_parallel`]: process meshes, dims mappings, per-op distributed implementations, the
//!     operator registry and the cost model.

pub mod auto_parallel;
