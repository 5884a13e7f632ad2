//! Uninitialized storage and the algorithms that initialize, relocate and
//! destroy values in raw memory.

mod algorithms;
mod storage;

pub use algorithms::{
    destroy_range, relocate, relocate_at, relocate_backward, relocate_no_overlap, uninit_copy,
    uninit_copy_no_overlap, uninit_fill,
};
pub use storage::UninitStorage;
