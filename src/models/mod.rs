mod device;
mod entitlement;
mod license;
mod plan;
mod validation;

pub use device::*;
pub use entitlement::*;
pub use license::*;
pub use plan::*;
pub use validation::*;
