pub mod contract;
pub mod report;

pub use contract::*;
pub use report::*;
