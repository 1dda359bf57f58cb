//! Type definitions

pub mod mapping;
pub mod qdata;
pub mod report;
pub mod table;
pub mod voc;

pub use mapping::*;
pub use qdata::*;
pub use report::*;
pub use table::*;
pub use voc::*;
