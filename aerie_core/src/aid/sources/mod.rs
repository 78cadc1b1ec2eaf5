// aerie_core/src/aid/sources/mod.rs

pub mod fake_height;
pub mod gnss_height;
pub mod gravity;
pub mod vision;
pub mod zero_heading;

pub use fake_height::FakeHeight;
pub use gnss_height::{GnssHeight, GnssSample};
pub use gravity::GravityVector;
pub use vision::{VisionHeight, VisionPosition, VisionSample, VisionVelocity, VisionYaw};
pub use zero_heading::ZeroHeading;
