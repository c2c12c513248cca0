//! FirmwareManagement profile payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::{Validate, Validator};

/// Diagnostics upload state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticsStatus {
    Idle,
    Uploaded,
    UploadFailed,
    Uploading,
}

/// Firmware installation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareStatus {
    Downloaded,
    DownloadFailed,
    Downloading,
    Idle,
    InstallationFailed,
    Installing,
    Installed,
}

// ============================================================================
// DiagnosticsStatusNotification (CP -> CS)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsStatusNotificationRequest {
    pub status: DiagnosticsStatus,
}

impl Validate for DiagnosticsStatusNotificationRequest {
    fn check(&self, _v: &mut Validator) {}
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiagnosticsStatusNotificationConfirmation {}

impl Validate for DiagnosticsStatusNotificationConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// FirmwareStatusNotification (CP -> CS)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareStatusNotificationRequest {
    pub status: FirmwareStatus,
}

impl Validate for FirmwareStatusNotificationRequest {
    fn check(&self, _v: &mut Validator) {}
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FirmwareStatusNotificationConfirmation {}

impl Validate for FirmwareStatusNotificationConfirmation {
    fn check(&self, _v: &mut Validator) {}
}

// ============================================================================
// GetDiagnostics (CS -> CP)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDiagnosticsRequest {
    /// Upload target
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    /// Seconds between retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl GetDiagnosticsRequest {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            retries: None,
            retry_interval: None,
            start_time: None,
            end_time: None,
        }
    }
}

impl Validate for GetDiagnosticsRequest {
    fn check(&self, v: &mut Validator) {
        v.string("location", &self.location).required().uri();
        v.opt_number("retries", self.retries).non_negative();
        v.opt_number("retryInterval", self.retry_interval).non_negative();
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            v.custom("endTime", "endTime not before startTime", end >= start, end);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDiagnosticsConfirmation {
    /// Name of the uploaded file; absent when there is nothing to upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Validate for GetDiagnosticsConfirmation {
    fn check(&self, v: &mut Validator) {
        v.opt_string("fileName", self.file_name.as_deref()).max_len(255);
    }
}

// ============================================================================
// UpdateFirmware (CS -> CP)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFirmwareRequest {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    pub retrieve_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<i32>,
}

impl Validate for UpdateFirmwareRequest {
    fn check(&self, v: &mut Validator) {
        v.string("location", &self.location).required().uri();
        v.opt_number("retries", self.retries).non_negative();
        v.opt_number("retryInterval", self.retry_interval).non_negative();
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateFirmwareConfirmation {}

impl Validate for UpdateFirmwareConfirmation {
    fn check(&self, _v: &mut Validator) {}
}
