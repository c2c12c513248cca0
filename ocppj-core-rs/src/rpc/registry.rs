//! Feature registry
//!
//! Built once per role from the selected profiles and immutable afterwards.
//! The inbound set of one role equals the outbound set of its peer.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::ocpp::{Action, Confirmation, Profile, Request};

/// Side of the protocol an endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    CentralSystem,
    ChargePoint,
}

impl Role {
    pub fn peer(&self) -> Role {
        match self {
            Role::CentralSystem => Role::ChargePoint,
            Role::ChargePoint => Role::CentralSystem,
        }
    }
}

/// Which role may initiate an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    CentralSystem,
    ChargePoint,
    Either,
}

impl Origin {
    pub fn allows(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (Origin::Either, _)
                | (Origin::CentralSystem, Role::CentralSystem)
                | (Origin::ChargePoint, Role::ChargePoint)
        )
    }
}

pub type RequestShape = fn(Value) -> Result<Request, serde_json::Error>;
pub type ConfirmationShape = fn(Value) -> Result<Confirmation, serde_json::Error>;

/// Registration record of one action
#[derive(Debug, Clone, Copy)]
pub struct FeatureDescriptor {
    pub action: Action,
    pub profile: Profile,
    pub origin: Origin,
    /// Decodes a request payload of this action
    pub request_shape: RequestShape,
    /// Decodes a confirmation payload of this action
    pub confirmation_shape: ConfirmationShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("action not registered: {0}")]
    NotFound(String),

    #[error("action registered twice: {0}")]
    Duplicate(Action),
}

/// Role-scoped mapping from action to descriptor
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    role: Role,
    inbound: HashMap<Action, FeatureDescriptor>,
    outbound: HashMap<Action, FeatureDescriptor>,
}

impl FeatureRegistry {
    /// Empty registry for `role`
    pub fn new(role: Role) -> Self {
        Self {
            role,
            inbound: HashMap::new(),
            outbound: HashMap::new(),
        }
    }

    /// Registry holding every action of the given profiles
    pub fn for_role(role: Role, profiles: &[Profile]) -> Self {
        let mut registry = Self::new(role);
        for action in Action::ALL {
            if profiles.contains(&action.profile()) {
                let registered = registry.register(action.descriptor());
                debug_assert!(registered.is_ok(), "Action::ALL repeats {}", action);
            }
        }
        registry
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Register a descriptor on whichever sides its origin allows
    pub fn register(&mut self, descriptor: FeatureDescriptor) -> Result<(), RegistryError> {
        let action = descriptor.action;
        if self.inbound.contains_key(&action) || self.outbound.contains_key(&action) {
            return Err(RegistryError::Duplicate(action));
        }
        if descriptor.origin.allows(self.role.peer()) {
            self.inbound.insert(action, descriptor);
        }
        if descriptor.origin.allows(self.role) {
            self.outbound.insert(action, descriptor);
        }
        Ok(())
    }

    /// Descriptor for an inbound CALL naming `action`
    pub fn resolve_inbound(&self, action: &str) -> Result<&FeatureDescriptor, RegistryError> {
        action
            .parse::<Action>()
            .ok()
            .and_then(|action| self.inbound.get(&action))
            .ok_or_else(|| RegistryError::NotFound(action.to_string()))
    }

    /// Descriptor for a CALL this role wants to send
    pub fn resolve_outbound(&self, action: Action) -> Result<&FeatureDescriptor, RegistryError> {
        self.outbound
            .get(&action)
            .ok_or_else(|| RegistryError::NotFound(action.as_str().to_string()))
    }

    pub fn inbound_actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.inbound.keys().copied()
    }

    pub fn outbound_actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.outbound.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_inbound_matches_peer_outbound() {
        let central = FeatureRegistry::for_role(Role::CentralSystem, Profile::ALL);
        let charge_point = FeatureRegistry::for_role(Role::ChargePoint, Profile::ALL);

        let central_in: HashSet<Action> = central.inbound_actions().collect();
        let cp_out: HashSet<Action> = charge_point.outbound_actions().collect();
        assert_eq!(central_in, cp_out);

        let central_out: HashSet<Action> = central.outbound_actions().collect();
        let cp_in: HashSet<Action> = charge_point.inbound_actions().collect();
        assert_eq!(central_out, cp_in);
    }

    #[test]
    fn test_direction_is_role_scoped() {
        let charge_point = FeatureRegistry::for_role(Role::ChargePoint, Profile::ALL);

        assert!(charge_point.resolve_inbound("GetConfiguration").is_ok());
        assert!(charge_point.resolve_inbound("BootNotification").is_err());
        assert!(charge_point.resolve_outbound(Action::BootNotification).is_ok());
        assert!(charge_point.resolve_outbound(Action::Reset).is_err());

        // DataTransfer goes both ways
        assert!(charge_point.resolve_inbound("DataTransfer").is_ok());
        assert!(charge_point.resolve_outbound(Action::DataTransfer).is_ok());
    }

    #[test]
    fn test_unselected_profile_is_not_found() {
        let central = FeatureRegistry::for_role(Role::CentralSystem, &[Profile::Core]);

        assert_eq!(
            central.resolve_outbound(Action::GetDiagnostics).unwrap_err(),
            RegistryError::NotFound("GetDiagnostics".to_string())
        );
        assert!(central.resolve_inbound("FirmwareStatusNotification").is_err());
        assert!(central.resolve_outbound(Action::GetConfiguration).is_ok());
    }

    #[test]
    fn test_unknown_action_is_not_found() {
        let central = FeatureRegistry::for_role(Role::CentralSystem, Profile::ALL);
        assert_eq!(
            central.resolve_inbound("NoSuchAction").unwrap_err(),
            RegistryError::NotFound("NoSuchAction".to_string())
        );
    }

    #[test]
    fn test_every_action_registered_once() {
        for role in [Role::CentralSystem, Role::ChargePoint] {
            let mut registry = FeatureRegistry::for_role(role, Profile::ALL);
            let known: HashSet<Action> = registry.inbound_actions().chain(registry.outbound_actions()).collect();
            assert_eq!(known, Action::ALL.iter().copied().collect::<HashSet<_>>());

            for action in Action::ALL {
                assert_eq!(
                    registry.register(action.descriptor()),
                    Err(RegistryError::Duplicate(*action))
                );
            }
        }
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = FeatureRegistry::new(Role::CentralSystem);
        registry.register(Action::Heartbeat.descriptor()).unwrap();
        assert_eq!(
            registry.register(Action::Heartbeat.descriptor()).unwrap_err(),
            RegistryError::Duplicate(Action::Heartbeat)
        );
    }
}
