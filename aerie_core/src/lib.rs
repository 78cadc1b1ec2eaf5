// aerie_core/src/lib.rs

// The public modules of the fusion engine. No I/O and no global state:
// everything here is driven by the caller's clock.
pub mod aid;
pub mod buffer;
pub mod error;
pub mod estimation;
pub mod estimator;
pub mod hover_thrust;
pub mod nav;
pub mod params;
pub mod prelude;
pub mod types;
