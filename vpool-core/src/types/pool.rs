//! Storage pool domain types.

use crate::descriptor::SourceDefinition;
use crate::error::{Result, VpoolError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Name of the synthesized ISO catalog pool. No real pool may use it.
pub const ISO_POOL_NAME: &str = "kimchi_isos";

/// Pool type as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolType {
    #[serde(rename = "dir")]
    Dir,
    #[serde(rename = "netfs")]
    Netfs,
    #[serde(rename = "logical")]
    Logical,
    #[serde(rename = "iscsi")]
    Iscsi,
    /// Directory pool populated by a deep scan
    #[serde(rename = "kimchi-iso")]
    KimchiIso,
}

impl PoolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Dir => "dir",
            PoolType::Netfs => "netfs",
            PoolType::Logical => "logical",
            PoolType::Iscsi => "iscsi",
            PoolType::KimchiIso => "kimchi-iso",
        }
    }
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dir" => Ok(PoolType::Dir),
            "netfs" => Ok(PoolType::Netfs),
            "logical" => Ok(PoolType::Logical),
            "iscsi" => Ok(PoolType::Iscsi),
            "kimchi-iso" => Ok(PoolType::KimchiIso),
            other => Err(format!("unsupported pool type '{}'", other)),
        }
    }
}

impl From<crate::descriptor::PoolKind> for PoolType {
    fn from(kind: crate::descriptor::PoolKind) -> Self {
        use crate::descriptor::PoolKind;
        match kind {
            PoolKind::Dir => PoolType::Dir,
            PoolKind::Netfs => PoolType::Netfs,
            PoolKind::Logical => PoolType::Logical,
            PoolKind::Iscsi => PoolType::Iscsi,
        }
    }
}

/// Pool state as reported by the external manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Inactive,
    Initializing,
    Active,
    Degraded,
    Inaccessible,
}

impl PoolState {
    /// Map the manager's numeric state code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(PoolState::Inactive),
            1 => Some(PoolState::Initializing),
            2 => Some(PoolState::Active),
            3 => Some(PoolState::Degraded),
            4 => Some(PoolState::Inaccessible),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Inactive => "inactive",
            PoolState::Initializing => "initializing",
            PoolState::Active => "active",
            PoolState::Degraded => "degraded",
            PoolState::Inaccessible => "inaccessible",
        }
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific source of a pool, as reported to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl From<&SourceDefinition> for PoolSource {
    fn from(def: &SourceDefinition) -> Self {
        Self {
            addr: def.host.clone(),
            path: def.dir.clone(),
            devices: def.devices.clone(),
            target: def.target.clone(),
        }
    }
}

/// Read projection of a storage pool, rebuilt on every lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,

    #[serde(rename = "type")]
    pub pool_type: PoolType,

    pub state: PoolState,

    /// Target path on the host
    pub path: PathBuf,

    pub source: PoolSource,

    pub autostart: bool,

    /// Capacity in bytes
    pub capacity: u64,

    /// Allocated bytes
    pub allocated: u64,

    /// Available bytes
    pub available: u64,

    pub nr_volumes: u32,

    /// Scan task populating the pool (transient scan pools only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Source fields of a creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRequest {
    pub host: Option<String>,
    pub path: Option<String>,
    pub devices: Vec<String>,
    pub target: Option<String>,
}

/// Pool creation request, as received from the REST layer.
///
/// Every recognized field is listed here; absent fields default to `None`.
/// Use [`PoolCreateRequest::validate`] to get every violation at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolCreateRequest {
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub pool_type: Option<String>,

    pub path: Option<PathBuf>,

    /// Requested capacity in bytes. Only checked against `allocated`; the
    /// manager sizes the pool.
    pub capacity: Option<u64>,

    /// Requested allocation in bytes
    pub allocated: Option<u64>,

    pub source: SourceRequest,
}

/// One problem found while validating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Missing(&'static str),
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Missing(field) => write!(f, "{} is required", field),
            Violation::Invalid { field, reason } => write!(f, "{}: {}", field, reason),
        }
    }
}

/// Validated source fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSpec {
    pub host: Option<String>,
    pub path: Option<String>,
    pub devices: Vec<String>,
    pub target: Option<String>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub name: String,
    pub pool_type: PoolType,
    pub path: Option<PathBuf>,
    pub source: SourceSpec,
}

impl PoolCreateRequest {
    /// Collect every violation, in field order.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        match self.name.as_deref() {
            None | Some("") => violations.push(Violation::Missing("name")),
            Some(name) if name.contains('/') => violations.push(Violation::Invalid {
                field: "name",
                reason: format!("'{}' must not contain '/'", name),
            }),
            Some(_) => {}
        }

        let pool_type = match self.pool_type.as_deref() {
            None | Some("") => {
                violations.push(Violation::Missing("type"));
                None
            }
            Some(raw) => match raw.parse::<PoolType>() {
                Ok(t) => Some(t),
                Err(reason) => {
                    violations.push(Violation::Invalid { field: "type", reason });
                    None
                }
            },
        };

        let source = &self.source;
        match pool_type {
            Some(PoolType::Dir) | Some(PoolType::KimchiIso) => match &self.path {
                None => violations.push(Violation::Missing("path")),
                Some(path) if !path.is_absolute() => violations.push(Violation::Invalid {
                    field: "path",
                    reason: format!("{} is not an absolute path", path.display()),
                }),
                Some(_) => {}
            },
            Some(PoolType::Netfs) => {
                if is_blank(&source.host) {
                    violations.push(Violation::Missing("source.host"));
                }
                if is_blank(&source.path) {
                    violations.push(Violation::Missing("source.path"));
                }
            }
            Some(PoolType::Logical) => {
                if source.devices.is_empty() {
                    violations.push(Violation::Missing("source.devices"));
                }
            }
            Some(PoolType::Iscsi) => {
                if is_blank(&source.host) {
                    violations.push(Violation::Missing("source.host"));
                }
                if is_blank(&source.target) {
                    violations.push(Violation::Missing("source.target"));
                }
            }
            None => {}
        }

        if let (Some(capacity), Some(allocated)) = (self.capacity, self.allocated) {
            if allocated > capacity {
                violations.push(Violation::Invalid {
                    field: "allocated",
                    reason: format!("{} exceeds capacity {}", allocated, capacity),
                });
            }
        }

        violations
    }

    /// Validate the whole request and convert it into a [`PoolSpec`].
    ///
    /// Missing fields win over invalid ones: the error names the first
    /// missing key and carries all of them.
    pub fn into_spec(self) -> Result<PoolSpec> {
        let violations = self.validate();

        let missing: Vec<String> = violations
            .iter()
            .filter_map(|v| match v {
                Violation::Missing(field) => Some(field.to_string()),
                Violation::Invalid { .. } => None,
            })
            .collect();
        if let Some(first) = missing.first() {
            return Err(VpoolError::MissingParameter { param: first.clone(), missing });
        }
        if !violations.is_empty() {
            let reasons: Vec<String> = violations.iter().map(ToString::to_string).collect();
            return Err(VpoolError::invalid(reasons.join("; ")));
        }

        // Validation guarantees both are present and parse
        let name = self.name.unwrap_or_default();
        let pool_type = self
            .pool_type
            .as_deref()
            .unwrap_or_default()
            .parse::<PoolType>()
            .map_err(VpoolError::invalid)?;

        Ok(PoolSpec {
            name,
            pool_type,
            path: self.path,
            source: SourceSpec {
                host: self.source.host,
                path: self.source.path,
                devices: self.source.devices,
                target: self.source.target,
            },
        })
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::is_empty).unwrap_or(true)
}

/// Result of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    /// The pool is defined and ready; carries its name
    Pool(String),
    /// The pool is being populated in the background; carries the task id
    Task(String),
}

impl CreateOutcome {
    /// Pool name or task id.
    pub fn id(&self) -> &str {
        match self {
            CreateOutcome::Pool(id) | CreateOutcome::Task(id) => id,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            CreateOutcome::Task(id) => Some(id),
            CreateOutcome::Pool(_) => None,
        }
    }
}

/// Update request for a single pool.
///
/// `autostart` stays loosely typed so non-boolean input can be rejected
/// with a proper error instead of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolUpdate {
    pub autostart: Option<serde_json::Value>,
}

impl PoolUpdate {
    pub fn autostart(enabled: bool) -> Self {
        Self { autostart: Some(serde_json::Value::Bool(enabled)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> PoolCreateRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_pool_type_roundtrip_names() {
        assert_eq!("kimchi-iso".parse::<PoolType>().unwrap(), PoolType::KimchiIso);
        assert_eq!(PoolType::KimchiIso.to_string(), "kimchi-iso");
        assert_eq!(serde_json::to_string(&PoolType::Netfs).unwrap(), "\"netfs\"");
        assert!("zfs".parse::<PoolType>().is_err());
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(PoolState::from_code(0), Some(PoolState::Inactive));
        assert_eq!(PoolState::from_code(2), Some(PoolState::Active));
        assert_eq!(PoolState::from_code(4), Some(PoolState::Inaccessible));
        assert_eq!(PoolState::from_code(9), None);
    }

    #[test]
    fn test_valid_dir_request() {
        let spec = request(
            r#"{"name": "alt", "type": "dir", "path": "/tmp", "capacity": 1024, "allocated": 512}"#,
        )
        .into_spec()
        .unwrap();
        assert_eq!(spec.name, "alt");
        assert_eq!(spec.pool_type, PoolType::Dir);
        assert_eq!(spec.path.as_deref(), Some(std::path::Path::new("/tmp")));
    }

    #[test]
    fn test_collects_all_missing_fields() {
        let violations = request(r#"{}"#).validate();
        assert_eq!(violations, vec![Violation::Missing("name"), Violation::Missing("type")]);

        let err = request(r#"{"type": "netfs"}"#).into_spec().unwrap_err();
        match err {
            VpoolError::MissingParameter { param, missing } => {
                assert_eq!(param, "name");
                assert_eq!(missing, vec!["name", "source.host", "source.path"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_path_for_dir() {
        let err = request(r#"{"name": "p", "type": "dir"}"#).into_spec().unwrap_err();
        assert!(matches!(err, VpoolError::MissingParameter { ref param, .. } if param == "path"));
    }

    #[test]
    fn test_invalid_values_are_invalid_operation() {
        let err = request(r#"{"name": "a/b", "type": "zfs"}"#).into_spec().unwrap_err();
        match err {
            VpoolError::InvalidOperation { reason } => {
                assert!(reason.contains("name"));
                assert!(reason.contains("unsupported pool type 'zfs'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = request(r#"{"name": "p", "type": "dir", "path": "relative"}"#)
            .into_spec()
            .unwrap_err();
        assert!(matches!(err, VpoolError::InvalidOperation { .. }));
    }

    #[test]
    fn test_allocation_over_capacity() {
        let violations = request(
            r#"{"name": "p", "type": "dir", "path": "/x", "capacity": 1, "allocated": 2}"#,
        )
        .validate();
        assert_eq!(violations.len(), 1);
        assert!(matches!(violations[0], Violation::Invalid { field: "allocated", .. }));
    }

    #[test]
    fn test_logical_and_iscsi_sources() {
        let logical = r#"{"name": "vg", "type": "logical", "source": {"devices": ["/dev/sdb"]}}"#;
        let spec = request(logical).into_spec().unwrap();
        assert_eq!(spec.source.devices, vec!["/dev/sdb"]);

        let violations = request(r#"{"name": "t", "type": "iscsi", "source": {"host": "h"}}"#)
            .validate();
        assert_eq!(violations, vec![Violation::Missing("source.target")]);
    }

    #[test]
    fn test_create_outcome_serialization() {
        let outcome = CreateOutcome::Task("3".to_string());
        assert_eq!(outcome.id(), "3");
        assert_eq!(outcome.task_id(), Some("3"));
        assert_eq!(serde_json::to_string(&outcome).unwrap(), r#"{"task":"3"}"#);
        assert_eq!(CreateOutcome::Pool("alt".into()).task_id(), None);
    }

    #[test]
    fn test_pool_projection_omits_task_id() {
        let pool = StoragePool {
            name: "alt".to_string(),
            pool_type: PoolType::Dir,
            state: PoolState::Inactive,
            path: PathBuf::from("/tmp"),
            source: PoolSource::default(),
            autostart: true,
            capacity: 0,
            allocated: 0,
            available: 0,
            nr_volumes: 0,
            task_id: None,
        };
        let json = serde_json::to_value(&pool).unwrap();
        assert_eq!(json["type"], "dir");
        assert_eq!(json["state"], "inactive");
        assert!(json.get("task_id").is_none());
    }
}
