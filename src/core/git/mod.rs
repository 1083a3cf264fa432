mod primitives;
mod sync;

pub use primitives::*;
pub use sync::*;
