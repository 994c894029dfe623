//! Clock synchronization and beat planning.

pub mod clock;
pub mod schedule;
