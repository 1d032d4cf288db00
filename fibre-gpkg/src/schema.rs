//! The home drop feature table consumed by the desktop GIS projects.
//!
//! Column names, types and nullability are fixed. Deployed projects bind to
//! them by name, so changes here break existing layers.

use crate::container::format_timestamp;
use crate::model::{Column, ColumnType};
use crate::result::Result;
use crate::types::Value;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use ColumnType::{Integer, Real, Text};

pub const PRIMARY_KEY_COLUMN: &str = "fid";
pub const GEOMETRY_COLUMN: &str = "geom";

/// Property columns in table order as `(name, type, nullable)`.
pub const HOME_DROP_COLUMNS: &[(&str, ColumnType, bool)] = &[
    ("home_drop_id", Text, false),
    ("pole_number", Text, true),
    ("project_id", Text, false),
    ("project_name", Text, true),
    ("contractor_id", Text, true),
    ("status", Text, false),
    ("priority", Text, true),
    ("customer_name", Text, true),
    ("customer_address", Text, true),
    ("customer_phone", Text, true),
    ("customer_email", Text, true),
    ("customer_account", Text, true),
    ("ont_serial_number", Text, true),
    ("ont_model", Text, true),
    ("ont_manufacturer", Text, true),
    ("router_serial", Text, true),
    ("drop_cable_length", Real, true),
    ("connector_type", Text, true),
    ("optical_power_dbm", Real, true),
    ("signal_strength", Integer, true),
    ("link_quality", Integer, true),
    ("test_passed", Integer, true),
    ("service_type", Text, true),
    ("bandwidth_profile", Text, true),
    ("vlan_id", Integer, true),
    ("service_activated", Integer, true),
    ("activation_date", Text, true),
    ("captured_by", Text, true),
    ("captured_at", Text, true),
    ("gps_accuracy", Real, true),
    ("altitude", Real, true),
    ("approval_status", Text, true),
    ("approved", Integer, true),
    ("approved_by", Text, true),
    ("approved_at", Text, true),
    ("rejection_reason", Text, true),
    ("photo_count", Integer, true),
    ("photos", Text, true),
    ("notes", Text, true),
    ("created_at", Text, false),
    ("updated_at", Text, false),
    ("sync_status", Text, true),
];

pub const STATUS_VALUES: &[&str] = &[
    "pending",
    "assigned",
    "in_progress",
    "captured",
    "approved",
    "rejected",
    "completed",
];
pub const PRIORITY_VALUES: &[&str] = &["high", "medium", "low"];
pub const APPROVAL_VALUES: &[&str] = &["pending", "approved", "rejected"];
pub const SYNC_VALUES: &[&str] = &["pending", "synced", "failed"];

/// The closed value list of an enumerated column, if it has one.
pub fn enumerated_values(column: &str) -> Option<&'static [&'static str]> {
    let name = column.to_lowercase();
    if name.contains("priority") {
        Some(PRIORITY_VALUES)
    } else if name.contains("approval_status") {
        Some(APPROVAL_VALUES)
    } else if name.contains("sync_status") {
        Some(SYNC_VALUES)
    } else if name.contains("status") {
        Some(STATUS_VALUES)
    } else {
        None
    }
}

/// Every column of the home drop table, key and geometry first.
pub fn home_drop_columns() -> Vec<Column> {
    let mut columns = Vec::with_capacity(HOME_DROP_COLUMNS.len() + 2);
    columns.push(Column::primary_key(PRIMARY_KEY_COLUMN));
    columns.push(Column::new(GEOMETRY_COLUMN, ColumnType::Geometry));
    columns.extend(HOME_DROP_COLUMNS.iter().map(|&(name, column_type, nullable)| {
        let column = Column::new(name, column_type);
        if nullable {
            column
        } else {
            column.not_null()
        }
    }));
    columns
}

/// Column type for a value that has no fixed column.
pub fn infer_column_type(value: &Value) -> ColumnType {
    match value {
        Value::Integer(_) => ColumnType::Integer,
        Value::Real(_) => ColumnType::Real,
        Value::Blob(_) => ColumnType::Blob,
        Value::Text(_) | Value::Null => ColumnType::Text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapturedLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Horizontal accuracy in metres as reported by the device.
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerInfo {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub account_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentInfo {
    pub ont_serial_number: Option<String>,
    pub ont_model: Option<String>,
    pub ont_manufacturer: Option<String>,
    pub router_serial: Option<String>,
    /// Metres.
    pub drop_cable_length: Option<f64>,
    pub connector_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerReading {
    pub optical_power_dbm: Option<f64>,
    pub signal_strength: Option<i64>,
    pub link_quality: Option<i64>,
    pub test_passed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service_type: Option<String>,
    pub bandwidth_profile: Option<String>,
    pub vlan_id: Option<i64>,
    pub activated: Option<bool>,
    pub activation_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalInfo {
    pub status: Option<String>,
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

/// A home drop installation as captured in the field.
///
/// Locations are WGS 84 longitude/latitude.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeDropRecord {
    pub id: String,
    pub pole_number: Option<String>,
    pub project_id: String,
    pub project_name: Option<String>,
    pub contractor_id: Option<String>,
    pub status: String,
    pub priority: Option<String>,
    pub customer: CustomerInfo,
    pub equipment: EquipmentInfo,
    pub power: PowerReading,
    pub service: ServiceConfig,
    pub location: Option<CapturedLocation>,
    pub captured_by: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub approval: ApprovalInfo,
    /// Photo references, usually storage paths or URLs.
    pub photos: Vec<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub sync_status: Option<String>,
}

fn text(s: &Option<String>) -> Value {
    s.clone().into()
}

fn timestamp(t: &Option<DateTime<Utc>>) -> Value {
    t.as_ref().map(format_timestamp).into()
}

impl HomeDropRecord {
    /// Projects the record onto [`HOME_DROP_COLUMNS`], in column order.
    ///
    /// `now` fills the mandatory timestamps the record lacks.
    pub fn to_properties(&self, now: DateTime<Utc>) -> Result<IndexMap<String, Value>> {
        let status = if self.status.trim().is_empty() {
            STATUS_VALUES[0].to_owned()
        } else {
            self.status.clone()
        };
        let created_at = self.created_at.unwrap_or(now);
        let updated_at = self.updated_at.unwrap_or(created_at);
        let photos = serde_json::to_string(&self.photos)?;

        let values: [Value; 42] = [
            self.id.clone().into(),
            text(&self.pole_number),
            self.project_id.clone().into(),
            text(&self.project_name),
            text(&self.contractor_id),
            status.into(),
            text(&self.priority),
            text(&self.customer.name),
            text(&self.customer.address),
            text(&self.customer.phone),
            text(&self.customer.email),
            text(&self.customer.account_number),
            text(&self.equipment.ont_serial_number),
            text(&self.equipment.ont_model),
            text(&self.equipment.ont_manufacturer),
            text(&self.equipment.router_serial),
            self.equipment.drop_cable_length.into(),
            text(&self.equipment.connector_type),
            self.power.optical_power_dbm.into(),
            self.power.signal_strength.into(),
            self.power.link_quality.into(),
            self.power.test_passed.into(),
            text(&self.service.service_type),
            text(&self.service.bandwidth_profile),
            self.service.vlan_id.into(),
            self.service.activated.into(),
            text(&self.service.activation_date),
            text(&self.captured_by),
            timestamp(&self.captured_at),
            self.location.and_then(|l| l.accuracy).into(),
            self.location.and_then(|l| l.altitude).into(),
            text(&self.approval.status),
            self.approval.approved.into(),
            text(&self.approval.approved_by),
            timestamp(&self.approval.approved_at),
            text(&self.approval.rejection_reason),
            (self.photos.len() as i64).into(),
            photos.into(),
            text(&self.notes),
            format_timestamp(&created_at).into(),
            format_timestamp(&updated_at).into(),
            text(&self.sync_status),
        ];
        Ok(HOME_DROP_COLUMNS
            .iter()
            .map(|(name, _, _)| name.to_string())
            .zip(values)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_fixed() {
        let columns = home_drop_columns();
        assert_eq!(columns.len(), 44);
        assert_eq!(columns[0].name, "fid");
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].column_type, ColumnType::Geometry);
        let required: Vec<&str> = columns
            .iter()
            .filter(|c| !c.nullable && !c.primary_key)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            required,
            ["home_drop_id", "project_id", "status", "created_at", "updated_at"]
        );
    }

    #[test]
    fn properties_follow_column_order() {
        let now = Utc::now();
        let record = HomeDropRecord {
            id: "HD-001".into(),
            project_id: "P-7".into(),
            photos: vec!["a.jpg".into(), "b.jpg".into()],
            power: PowerReading {
                test_passed: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        let props = record.to_properties(now).unwrap();
        let names: Vec<&str> = props.keys().map(String::as_str).collect();
        let expected: Vec<&str> = HOME_DROP_COLUMNS.iter().map(|c| c.0).collect();
        assert_eq!(names, expected);
        assert_eq!(props["status"], Value::from("pending"));
        assert_eq!(props["photos"], Value::from(r#"["a.jpg","b.jpg"]"#));
        assert_eq!(props["photo_count"], Value::Integer(2));
        assert_eq!(props["test_passed"], Value::Integer(1));
        assert_eq!(props["created_at"], props["updated_at"]);
        assert!(props["pole_number"].is_null());
    }

    #[test]
    fn record_from_json() {
        let record: HomeDropRecord = serde_json::from_str(
            r#"{
                "id": "HD-9",
                "project_id": "P-1",
                "status": "captured",
                "customer": {"name": "T. Mokoena"},
                "location": {"latitude": -26.2, "longitude": 28.04, "accuracy": 3.5}
            }"#,
        )
        .unwrap();
        assert_eq!(record.customer.name.as_deref(), Some("T. Mokoena"));
        let location = record.location.unwrap();
        assert_eq!(location.accuracy, Some(3.5));
        assert_eq!(location.altitude, None);
    }

    #[test]
    fn enumerations() {
        assert_eq!(enumerated_values("priority"), Some(PRIORITY_VALUES));
        assert_eq!(enumerated_values("status"), Some(STATUS_VALUES));
        assert_eq!(enumerated_values("approval_status"), Some(APPROVAL_VALUES));
        assert_eq!(enumerated_values("notes"), None);
    }
}
