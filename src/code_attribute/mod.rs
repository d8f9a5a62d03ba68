mod decoder;
mod types;

pub use self::decoder::*;
pub use self::types::*;
