//! SQL for the PostgreSQL store: identifiers from model definitions, values as bind parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
