//! Scheduler driver: the entry points workers call.
//!
//! Split into focused submodules:
//! - `core`: Driver struct, constructor, collaborators and accessors
//! - `ops`: give / take / done / register_context and affinity group management
//! - `lifecycle`: runlevel participation (context allocation, binding, shutdown)

mod core;
mod lifecycle;
mod ops;
#[cfg(test)]
mod tests;

pub use self::core::Driver;
