//! Allocator-aware containers.

mod static_vector;
mod vector;

pub use static_vector::{IntoIter as StaticVecIntoIter, StaticVec};
pub use vector::Vector;
