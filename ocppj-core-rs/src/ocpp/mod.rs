//! OCPP 1.6 payload catalogue
//!
//! - `types`: enumerations and complex types shared across profiles
//! - `core`: Core profile requests and confirmations
//! - `firmware`: FirmwareManagement profile requests and confirmations
//! - `feature`: the closed action set and the `Feature` trait

pub mod types;
pub mod core;
pub mod firmware;
pub mod feature;

pub use types::*;
pub use self::core::*;
pub use firmware::*;
pub use feature::{features, Action, Confirmation, Feature, Profile, Request, UnknownAction};
