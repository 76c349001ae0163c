mod priority;

pub use priority::*;
