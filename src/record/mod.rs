//! Run records and their on-disk store

mod run;
mod store;

pub use run::*;
pub use store::*;
