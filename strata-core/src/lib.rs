//! Contains the core types needed for most APIs of the strata world engine.

mod block_id;
mod block_pos;
mod chunk_pos;

pub use block_id::*;
pub use block_pos::*;
pub use chunk_pos::*;
