#![allow(clippy::module_name_repetitions)]

pub mod calibration;
pub mod dynamics;
pub mod events;
pub mod extensions;
pub mod input;
pub mod ir;
mod manager;
pub mod output;
mod queue;
mod remote;
mod result;
pub mod transport;

pub const REPORT_BUFFER_SIZE: usize = 32;

pub mod prelude {
    pub use crate::dynamics::{AccelCalibration, AccelSample, GravityForce, Orientation};
    pub use crate::events::Event;
    pub use crate::extensions::*;
    pub use crate::manager::RemoteManager;
    pub use crate::queue::RequestHandle;
    pub use crate::remote::Remote;
    pub use crate::result::*;
    pub use crate::transport::{Discovery, Transport};
    pub use crate::REPORT_BUFFER_SIZE;
}
