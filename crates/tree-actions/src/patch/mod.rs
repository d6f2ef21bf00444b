//! Patches: the forward/inverse description of every mutation.
//!
//! # Operations
//!
//! `add`, `remove` and `replace`, with RFC 6902 meaning on arrays (`add`
//! inserts, `remove` shifts left). Paths are [`tree_path::Path`] values and
//! serialize as JSON arrays of keys and indices.

pub mod apply;
pub(crate) mod emitter;
pub mod types;

pub use apply::{apply_patch, apply_patches};
pub use emitter::{batch_patches, patch_pair};
pub use types::{merge_batches, Patch, PatchBatch};
