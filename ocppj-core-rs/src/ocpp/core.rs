//! Core profile payloads
//!
//! Requests and confirmations of the OCPP 1.6 Core profile, each with its
//! field rules. Direction is noted per message (CP = charge point,
//! CS = central system).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::*;
use crate::validation::{Validate, Validator};

/// Longest configuration key name (CiString50Type)
pub const CONFIGURATION_KEY_MAX: usize = 50;

// ============================================================================
// Authorize (CP -> CS)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

impl Validate for AuthorizeRequest {
    fn check(&self, v: &mut Validator) {
        v.string("idTag", &self.id_tag).required().max_len(ID_TOKEN_MAX);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeConfirmation {
    pub id_tag_info: IdTagInfo,
}

impl Validate for AuthorizeConfirmation {
    fn check(&self, v: &mut Validator) {
        v.nested("idTagInfo", &self.id_tag_info);
    }
}

// ============================================================================
// BootNotification (CP -> CS)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

impl BootNotificationRequest {
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            charge_point_vendor: vendor.into(),
            charge_point_model: model.into(),
            charge_point_serial_number: None,
            charge_box_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        }
    }
}

impl Validate for BootNotificationRequest {
    fn check(&self, v: &mut Validator) {
        v.string("chargePointVendor", &self.charge_point_vendor).required().max_len(20);
        v.string("chargePointModel", &self.charge_point_model).required().max_len(20);
        v.opt_string("chargePointSerialNumber", self.charge_point_serial_number.as_deref())
            .max_len(25);
        v.opt_string("chargeBoxSerialNumber", self.charge_box_serial_number.as_deref())
            .max_len(25);
        v.opt_string("firmwareVersion", self.firmware_version.as_deref()).max_len(50);
        v.opt_string("iccid", self.iccid.as_deref()).max_len(20);
        v.opt_string("imsi", self.imsi.as_deref()).max_len(20);
        v.opt_string("meterType", self.meter_type.as_deref()).max_len(25);
        v.opt_string("meterSerialNumber", self.meter_serial_number.as_deref()).max_len(25);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationConfirmation {
    pub current_time: DateTime<Utc>,
    /// Heartbeat interval in seconds
    pub interval: i32,
    pub status: RegistrationStatus,
}

impl Validate for BootNotificationConfirmation {
    fn check(&self, v: &mut Validator) {
        v.number("interval", self.interval).non_negative();
    }
}

// ============================================================================
// ChangeConfiguration (CS -> CP)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeConfigurationRequest {
    pub key: String,
    pub value: String,
}

impl Validate for ChangeConfigurationRequest {
    fn check(&self, v: &mut Validator) {
        v.string("key", &self.key).required().max_len(CONFIGURATION_KEY_MAX);
        v.string("value", &self.value).required().max_len(500);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeConfigurationConfirmation {
    pub status: ConfigurationStatus,
}

impl Validate for ChangeConfigurationConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// DataTransfer (either direction)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferRequest {
    pub vendor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Validate for DataTransferRequest {
    fn check(&self, v: &mut Validator) {
        v.string("vendorId", &self.vendor_id).required().max_len(255);
        v.opt_string("messageId", self.message_id.as_deref()).max_len(50);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferConfirmation {
    pub status: DataTransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Validate for DataTransferConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// GetConfiguration (CS -> CP)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConfigurationRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
}

impl GetConfigurationRequest {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validate for GetConfigurationRequest {
    fn check(&self, v: &mut Validator) {
        v.list("key", &self.key)
            .required()
            .unique()
            .each(|v, field, key| {
                v.string(field, key).max_len(CONFIGURATION_KEY_MAX);
            });
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConfigurationConfirmation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configuration_key: Vec<ConfigurationKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_key: Vec<String>,
}

impl GetConfigurationConfirmation {
    pub fn new(configuration_key: Vec<ConfigurationKey>) -> Self {
        Self {
            configuration_key,
            unknown_key: Vec::new(),
        }
    }

    pub fn with_unknown_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unknown_key = keys.into_iter().map(Into::into).collect();
        self
    }
}

impl Validate for GetConfigurationConfirmation {
    fn check(&self, v: &mut Validator) {
        v.list("configurationKey", &self.configuration_key).each_nested();
        v.list("unknownKey", &self.unknown_key).each(|v, field, key| {
            v.string(field, key).max_len(CONFIGURATION_KEY_MAX);
        });
    }
}

// ============================================================================
// Heartbeat (CP -> CS)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

impl Validate for HeartbeatRequest {
    fn check(&self, _v: &mut Validator) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfirmation {
    pub current_time: DateTime<Utc>,
}

impl Validate for HeartbeatConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// RemoteStartTransaction (CS -> CP)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<i32>,
    pub id_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charging_profile: Option<ChargingProfile>,
}

impl Validate for RemoteStartTransactionRequest {
    fn check(&self, v: &mut Validator) {
        v.opt_number("connectorId", self.connector_id).min(1.0);
        v.string("idTag", &self.id_tag).required().max_len(ID_TOKEN_MAX);
        if let Some(profile) = &self.charging_profile {
            v.custom(
                "chargingProfile.chargingProfilePurpose",
                "TxProfile",
                profile.charging_profile_purpose == ChargingProfilePurpose::TxProfile,
                format!("{:?}", profile.charging_profile_purpose),
            );
        }
        v.opt_nested("chargingProfile", self.charging_profile.as_ref());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionConfirmation {
    pub status: RemoteStartStopStatus,
}

impl Validate for RemoteStartTransactionConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// RemoteStopTransaction (CS -> CP)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionRequest {
    pub transaction_id: i32,
}

impl Validate for RemoteStopTransactionRequest {
    fn check(&self, _v: &mut Validator) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionConfirmation {
    pub status: RemoteStartStopStatus,
}

impl Validate for RemoteStopTransactionConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// Reset (CS -> CP)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
}

impl Validate for ResetRequest {
    fn check(&self, _v: &mut Validator) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetConfirmation {
    pub status: ResetStatus,
}

impl Validate for ResetConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// StatusNotification (CP -> CS)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: i32,
    pub error_code: ChargePointErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    pub status: ChargePointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

impl StatusNotificationRequest {
    pub fn new(connector_id: i32, error_code: ChargePointErrorCode, status: ChargePointStatus) -> Self {
        Self {
            connector_id,
            error_code,
            info: None,
            status,
            timestamp: None,
            vendor_id: None,
            vendor_error_code: None,
        }
    }
}

impl Validate for StatusNotificationRequest {
    fn check(&self, v: &mut Validator) {
        v.number("connectorId", self.connector_id).non_negative();
        v.opt_string("info", self.info.as_deref()).max_len(50);
        v.opt_string("vendorId", self.vendor_id.as_deref()).max_len(255);
        v.opt_string("vendorErrorCode", self.vendor_error_code.as_deref()).max_len(50);
        v.required_with(
            "vendorId",
            self.vendor_id.is_some(),
            "vendorErrorCode",
            self.vendor_error_code.is_some(),
        );
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusNotificationConfirmation {}

impl Validate for StatusNotificationConfirmation {
    fn check(&self, _v: &mut Validator) {}
}
