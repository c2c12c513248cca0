//! Handler sets for the two node roles

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ocppj_core::ocpp::*;
use ocppj_core::HandlerMap;
use parking_lot::RwLock;
use tracing::info;

/// Central-system side: accepts every charge point and acknowledges its reports
pub fn central_system(heartbeat_interval: i32) -> HandlerMap {
    HandlerMap::new()
        .on::<features::BootNotification, _>(move |cp, request| {
            info!(
                "[{}] BootNotification: {} {} (firmware {:?})",
                cp, request.charge_point_vendor, request.charge_point_model, request.firmware_version
            );
            Ok(BootNotificationConfirmation {
                current_time: Utc::now(),
                interval: heartbeat_interval,
                status: RegistrationStatus::Accepted,
            })
        })
        .on::<features::Heartbeat, _>(|_, _| Ok(HeartbeatConfirmation { current_time: Utc::now() }))
        .on::<features::Authorize, _>(|cp, request| {
            info!("[{}] Authorize {}", cp, request.id_tag);
            Ok(AuthorizeConfirmation {
                id_tag_info: IdTagInfo::new(AuthorizationStatus::Accepted),
            })
        })
        .on::<features::StatusNotification, _>(|cp, request| {
            info!(
                "[{}] Connector {}: {:?} ({:?})",
                cp, request.connector_id, request.status, request.error_code
            );
            Ok(StatusNotificationConfirmation {})
        })
        .on::<features::DiagnosticsStatusNotification, _>(|cp, request| {
            info!("[{}] Diagnostics {:?}", cp, request.status);
            Ok(DiagnosticsStatusNotificationConfirmation {})
        })
        .on::<features::FirmwareStatusNotification, _>(|cp, request| {
            info!("[{}] Firmware {:?}", cp, request.status);
            Ok(FirmwareStatusNotificationConfirmation {})
        })
        .on::<features::DataTransfer, _>(|cp, request| {
            info!("[{}] DataTransfer from vendor {}", cp, request.vendor_id);
            Ok(DataTransferConfirmation {
                status: DataTransferStatus::UnknownVendorId,
                data: None,
            })
        })
}

#[derive(Debug, Clone)]
struct Setting {
    value: String,
    readonly: bool,
}

/// Charge point configuration keys served to GetConfiguration and ChangeConfiguration
#[derive(Debug, Clone, Default)]
pub struct ConfigurationTable {
    settings: Arc<RwLock<BTreeMap<String, Setting>>>,
}

impl ConfigurationTable {
    pub fn with_defaults() -> Self {
        let table = Self::default();
        table.define("HeartbeatInterval", "300", false);
        table.define("ConnectionTimeOut", "60", false);
        table.define("NumberOfConnectors", "1", true);
        table.define("SupportedFeatureProfiles", "Core,FirmwareManagement", true);
        table
    }

    pub fn define(&self, key: &str, value: &str, readonly: bool) {
        self.settings.write().insert(
            key.to_string(),
            Setting {
                value: value.to_string(),
                readonly,
            },
        );
    }

    /// Known keys as configuration entries, the rest as unknown keys
    pub fn lookup(&self, keys: &[String]) -> GetConfigurationConfirmation {
        let settings = self.settings.read();
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for key in keys {
            match settings.get(key) {
                Some(setting) => known.push(ConfigurationKey::new(
                    key.clone(),
                    setting.readonly,
                    Some(setting.value.clone()),
                )),
                None => unknown.push(key.clone()),
            }
        }
        GetConfigurationConfirmation::new(known).with_unknown_keys(unknown)
    }

    pub fn change(&self, key: &str, value: &str) -> ConfigurationStatus {
        let mut settings = self.settings.write();
        match settings.get_mut(key) {
            None => ConfigurationStatus::NotSupported,
            Some(setting) if setting.readonly => ConfigurationStatus::Rejected,
            Some(setting) => {
                setting.value = value.to_string();
                ConfigurationStatus::Accepted
            }
        }
    }
}

/// Charge-point side: a single-connector station with an in-memory configuration
pub fn charge_point(configuration: ConfigurationTable) -> HandlerMap {
    let reader = configuration.clone();
    HandlerMap::new()
        .on::<features::GetConfiguration, _>(move |_, request| Ok(reader.lookup(&request.key)))
        .on::<features::ChangeConfiguration, _>(move |_, request| {
            let status = configuration.change(&request.key, &request.value);
            info!("ChangeConfiguration {} = {}: {:?}", request.key, request.value, status);
            Ok(ChangeConfigurationConfirmation { status })
        })
        .on::<features::Reset, _>(|_, request| {
            info!("{:?} reset requested", request.reset_type);
            Ok(ResetConfirmation {
                status: ResetStatus::Accepted,
            })
        })
        .on::<features::RemoteStartTransaction, _>(|_, request| {
            let status = match request.connector_id {
                None | Some(1) => RemoteStartStopStatus::Accepted,
                Some(_) => RemoteStartStopStatus::Rejected,
            };
            info!("RemoteStartTransaction for {}: {:?}", request.id_tag, status);
            Ok(RemoteStartTransactionConfirmation { status })
        })
        .on::<features::RemoteStopTransaction, _>(|_, request| {
            info!("RemoteStopTransaction {}", request.transaction_id);
            Ok(RemoteStopTransactionConfirmation {
                status: RemoteStartStopStatus::Accepted,
            })
        })
        .on::<features::GetDiagnostics, _>(|_, request| {
            info!("Diagnostics upload requested to {}", request.location);
            Ok(GetDiagnosticsConfirmation {
                file_name: Some(format!("diagnostics-{}.log", Utc::now().format("%Y%m%dT%H%M%S"))),
            })
        })
        .on::<features::UpdateFirmware, _>(|_, request| {
            info!("Firmware update from {} at {}", request.location, request.retrieve_date);
            Ok(UpdateFirmwareConfirmation {})
        })
        .on::<features::DataTransfer, _>(|_, request| {
            info!("DataTransfer from vendor {}", request.vendor_id);
            Ok(DataTransferConfirmation {
                status: DataTransferStatus::UnknownVendorId,
                data: None,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_splits_known_and_unknown() {
        let table = ConfigurationTable::with_defaults();
        let conf = table.lookup(&["HeartbeatInterval".to_string(), "NoSuchKey".to_string()]);
        assert_eq!(
            conf.configuration_key,
            vec![ConfigurationKey::new("HeartbeatInterval", false, Some("300".to_string()))]
        );
        assert_eq!(conf.unknown_key, vec!["NoSuchKey".to_string()]);
    }

    #[test]
    fn test_change_respects_readonly() {
        let table = ConfigurationTable::with_defaults();
        assert_eq!(table.change("HeartbeatInterval", "60"), ConfigurationStatus::Accepted);
        assert_eq!(table.change("NumberOfConnectors", "2"), ConfigurationStatus::Rejected);
        assert_eq!(table.change("Nope", "1"), ConfigurationStatus::NotSupported);

        let conf = table.lookup(&["HeartbeatInterval".to_string()]);
        assert_eq!(conf.configuration_key[0].value.as_deref(), Some("60"));
    }

    #[test]
    fn test_handler_sets_cover_their_direction() {
        let central = central_system(300);
        assert!(central.contains(Action::BootNotification));
        assert!(!central.contains(Action::Reset));

        let charge_point = charge_point(ConfigurationTable::with_defaults());
        assert!(charge_point.contains(Action::GetConfiguration));
        assert!(!charge_point.contains(Action::Heartbeat));
    }
}
