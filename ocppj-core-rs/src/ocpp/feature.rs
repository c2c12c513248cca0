//! The closed OCPP 1.6 action set
//!
//! Every action appears exactly once in the `features!` table below, which
//! generates:
//! - [`Action`]: one variant per action, with its wire name, profile and origin
//! - [`Request`] / [`Confirmation`]: one tagged variant per action
//! - a marker type per action in [`features`], implementing [`Feature`]
//!
//! Dispatch matches on these variants; there are no runtime type assertions.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::core::*;
use super::firmware::*;
use crate::rpc::registry::{FeatureDescriptor, Origin};
use crate::validation::{Validate, Validator};

/// OCPP 1.6 feature profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Core,
    FirmwareManagement,
}

impl Profile {
    pub const ALL: &'static [Profile] = &[Profile::Core, Profile::FirmwareManagement];
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A wire action name outside the closed set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

/// A feature: an action with its typed request and confirmation
pub trait Feature: 'static {
    const ACTION: Action;
    type Request: Validate
        + Serialize
        + DeserializeOwned
        + Into<crate::ocpp::Request>
        + TryFrom<crate::ocpp::Request>
        + Send
        + 'static;
    type Confirmation: Validate
        + Serialize
        + DeserializeOwned
        + Into<crate::ocpp::Confirmation>
        + TryFrom<crate::ocpp::Confirmation>
        + Send
        + 'static;
}

macro_rules! features {
    ($( $name:ident => $profile:ident, $origin:ident, $req:ty, $conf:ty; )*) => {
        /// OCPP 1.6 action
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Action {
            $( $name, )*
        }

        impl Action {
            pub const ALL: &'static [Action] = &[ $( Action::$name, )* ];

            /// Wire name, case-sensitive
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Action::$name => stringify!($name), )*
                }
            }

            pub fn profile(&self) -> Profile {
                match self {
                    $( Action::$name => Profile::$profile, )*
                }
            }

            /// Which role may send this action
            pub fn origin(&self) -> Origin {
                match self {
                    $( Action::$name => Origin::$origin, )*
                }
            }

            /// Payload shapes and metadata of this action
            pub fn descriptor(&self) -> FeatureDescriptor {
                match self {
                    $(
                        Action::$name => FeatureDescriptor {
                            action: Action::$name,
                            profile: Profile::$profile,
                            origin: Origin::$origin,
                            request_shape: |payload| {
                                serde_json::from_value::<$req>(payload).map(Request::$name)
                            },
                            confirmation_shape: |payload| {
                                serde_json::from_value::<$conf>(payload).map(Confirmation::$name)
                            },
                        },
                    )*
                }
            }
        }

        /// A request of any action
        #[derive(Debug, Clone, PartialEq)]
        pub enum Request {
            $( $name($req), )*
        }

        impl Request {
            pub fn action(&self) -> Action {
                match self {
                    $( Request::$name(_) => Action::$name, )*
                }
            }

            pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $( Request::$name(request) => serde_json::to_value(request), )*
                }
            }
        }

        impl Validate for Request {
            fn check(&self, v: &mut Validator) {
                match self {
                    $( Request::$name(request) => request.check(v), )*
                }
            }
        }

        /// A confirmation of any action
        #[derive(Debug, Clone, PartialEq)]
        pub enum Confirmation {
            $( $name($conf), )*
        }

        impl Confirmation {
            pub fn action(&self) -> Action {
                match self {
                    $( Confirmation::$name(_) => Action::$name, )*
                }
            }

            pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $( Confirmation::$name(confirmation) => serde_json::to_value(confirmation), )*
                }
            }
        }

        impl Validate for Confirmation {
            fn check(&self, v: &mut Validator) {
                match self {
                    $( Confirmation::$name(confirmation) => confirmation.check(v), )*
                }
            }
        }

        $(
            impl From<$req> for Request {
                fn from(request: $req) -> Self {
                    Request::$name(request)
                }
            }

            impl TryFrom<Request> for $req {
                type Error = Request;

                fn try_from(request: Request) -> Result<Self, Request> {
                    match request {
                        Request::$name(inner) => Ok(inner),
                        #[allow(unreachable_patterns)]
                        other => Err(other),
                    }
                }
            }

            impl From<$conf> for Confirmation {
                fn from(confirmation: $conf) -> Self {
                    Confirmation::$name(confirmation)
                }
            }

            impl TryFrom<Confirmation> for $conf {
                type Error = Confirmation;

                fn try_from(confirmation: Confirmation) -> Result<Self, Confirmation> {
                    match confirmation {
                        Confirmation::$name(inner) => Ok(inner),
                        #[allow(unreachable_patterns)]
                        other => Err(other),
                    }
                }
            }
        )*

        /// Marker types, one per action, for typed sends and handlers
        pub mod features {
            use super::*;

            $(
                #[derive(Debug, Clone, Copy)]
                pub struct $name;

                impl Feature for $name {
                    const ACTION: Action = Action::$name;
                    type Request = $req;
                    type Confirmation = $conf;
                }
            )*
        }
    };
}

features! {
    Authorize => Core, ChargePoint, AuthorizeRequest, AuthorizeConfirmation;
    BootNotification => Core, ChargePoint, BootNotificationRequest, BootNotificationConfirmation;
    ChangeConfiguration => Core, CentralSystem, ChangeConfigurationRequest, ChangeConfigurationConfirmation;
    DataTransfer => Core, Either, DataTransferRequest, DataTransferConfirmation;
    GetConfiguration => Core, CentralSystem, GetConfigurationRequest, GetConfigurationConfirmation;
    Heartbeat => Core, ChargePoint, HeartbeatRequest, HeartbeatConfirmation;
    RemoteStartTransaction => Core, CentralSystem, RemoteStartTransactionRequest, RemoteStartTransactionConfirmation;
    RemoteStopTransaction => Core, CentralSystem, RemoteStopTransactionRequest, RemoteStopTransactionConfirmation;
    Reset => Core, CentralSystem, ResetRequest, ResetConfirmation;
    StatusNotification => Core, ChargePoint, StatusNotificationRequest, StatusNotificationConfirmation;
    DiagnosticsStatusNotification => FirmwareManagement, ChargePoint, DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationConfirmation;
    FirmwareStatusNotification => FirmwareManagement, ChargePoint, FirmwareStatusNotificationRequest, FirmwareStatusNotificationConfirmation;
    GetDiagnostics => FirmwareManagement, CentralSystem, GetDiagnosticsRequest, GetDiagnosticsConfirmation;
    UpdateFirmware => FirmwareManagement, CentralSystem, UpdateFirmwareRequest, UpdateFirmwareConfirmation;
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::types::*;
    use serde_json::json;

    #[test]
    fn test_action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), *action);
        }
        assert_eq!(Action::ALL.len(), 14);
    }

    #[test]
    fn test_action_names_are_case_sensitive() {
        assert!("heartbeat".parse::<Action>().is_err());
        assert_eq!(
            "Bogus".parse::<Action>().unwrap_err(),
            UnknownAction("Bogus".to_string())
        );
    }

    #[test]
    fn test_descriptor_shapes_decode_their_action() {
        let descriptor = Action::GetConfiguration.descriptor();
        let request = (descriptor.request_shape)(json!({"key": ["a"]})).unwrap();
        assert_eq!(request, Request::GetConfiguration(GetConfigurationRequest::new(["a"])));

        let confirmation = (descriptor.confirmation_shape)(json!({"unknownKey": ["x"]})).unwrap();
        assert_eq!(confirmation.action(), Action::GetConfiguration);
    }

    #[test]
    fn test_typed_conversions() {
        let request: Request = ResetRequest {
            reset_type: ResetType::Soft,
        }
        .into();
        assert_eq!(request.action(), Action::Reset);
        assert!(ResetRequest::try_from(request.clone()).is_ok());
        assert_eq!(HeartbeatRequest::try_from(request.clone()), Err(request));
    }

    #[test]
    fn test_feature_markers() {
        assert_eq!(<features::GetDiagnostics as Feature>::ACTION, Action::GetDiagnostics);
        assert_eq!(Action::GetDiagnostics.profile(), Profile::FirmwareManagement);
        assert_eq!(Action::DataTransfer.origin(), Origin::Either);
    }

    #[test]
    fn test_request_payload_omits_absent_fields() {
        let request = Request::from(GetDiagnosticsRequest::new("ftp:some/path"));
        assert_eq!(request.to_payload().unwrap(), json!({"location": "ftp:some/path"}));
    }
}
