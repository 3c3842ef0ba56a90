//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockCall, MockEffect, MockFailure, MockTransport};
pub use nusb::{EndpointInfo, NusbTransport};
pub use traits::{ProbeTransport, TransportError};
