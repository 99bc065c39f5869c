//! TOML configuration for a node taking part in the distributed take
//! protocol, with `HIVE_DIST_*` environment overrides.

mod loading;
mod types;
mod validation;


pub use types::{DistConfig, NeighborConfig, ProtocolConfig};
