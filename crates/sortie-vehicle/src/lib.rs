pub mod endpoint;
pub mod error;
pub mod mav;
pub mod state;
pub mod traits;

pub use endpoint::Endpoint;
pub use error::VehicleError;
pub use mav::MavVehicle;
pub use traits::{BodyVelocity, OffboardControl, Position, TelemetryStream, VehicleControl};
