//! Ports - the engine's seams to the outside world.
//!
//! - **Clock**: wall-clock time, swapped for `ManualClock` in tests.
//! - **Transport**: the outbound delivery call, swapped for scripted transports in tests.

pub mod clock;
pub mod transport;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::transport::{DeliveryRequest, Transport};
