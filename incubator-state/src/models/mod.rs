//! The fixed set of shared models
//!
//! Each model is inserted into the [`StateManager`](crate::StateManager) once
//! at startup and mutated only through transactions.

mod device;
mod experiment;
mod icb;
mod imaging;
mod protocol;
mod setpoint;

pub use device::{CredentialClaims, Device};
pub use experiment::Experiment;
pub use icb::{Icb, Readings};
pub use imaging::{Bounded, ChannelSettings, ChannelUpdate, ImagingProfile, ImagingUpdate};
pub use protocol::{Protocol, ProtocolStep};
pub use setpoint::{Bounds, IcbLimits, Setpoint};
