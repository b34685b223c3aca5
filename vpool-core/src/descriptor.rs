//! Pool definitions handed to the external pool manager.
//!
//! A [`PoolDefinition`] is the typed form of the manager's XML pool
//! descriptor. Managers that speak XML render it with [`PoolDefinition::to_xml`].

use crate::paths;
use crate::types::pool::{PoolSpec, PoolType};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Pool kinds the external manager understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Dir,
    Netfs,
    Logical,
    Iscsi,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Dir => "dir",
            PoolKind::Netfs => "netfs",
            PoolKind::Logical => "logical",
            PoolKind::Iscsi => "iscsi",
        }
    }

    /// Kinds whose backing storage must be built and which autostart.
    pub fn is_on_disk(&self) -> bool {
        matches!(self, PoolKind::Dir | PoolKind::Netfs | PoolKind::Logical)
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source section of a pool descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Remote host (netfs, iscsi)
    pub host: Option<String>,

    /// Exported directory on the remote host (netfs)
    pub dir: Option<String>,

    /// Physical volumes (logical)
    pub devices: Vec<String>,

    /// iSCSI target IQN
    pub target: Option<String>,
}

/// Typed pool descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDefinition {
    pub name: String,
    pub kind: PoolKind,
    /// Target path where the pool's volumes appear on the host
    pub target_path: PathBuf,
    pub source: SourceDefinition,
}

impl PoolDefinition {
    /// Directory pool rooted at `path`.
    pub fn dir(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: PoolKind::Dir,
            target_path: path.into(),
            source: SourceDefinition::default(),
        }
    }

    /// Build the descriptor for a validated request.
    ///
    /// ISO pools are directory pools rooted at `path`; callers rewrite that
    /// path to a staging directory before calling this.
    pub fn from_spec(spec: &PoolSpec) -> Self {
        Self::from_spec_in(spec, &paths::nfs_mount_dir())
    }

    /// Same as [`PoolDefinition::from_spec`] with an explicit netfs mount root.
    pub fn from_spec_in(spec: &PoolSpec, nfs_mount_root: &Path) -> Self {
        let source = SourceDefinition {
            host: spec.source.host.clone(),
            dir: spec.source.path.clone(),
            devices: spec.source.devices.clone(),
            target: spec.source.target.clone(),
        };

        let (kind, target_path) = match spec.pool_type {
            PoolType::Dir | PoolType::KimchiIso => {
                (PoolKind::Dir, spec.path.clone().unwrap_or_default())
            }
            PoolType::Netfs => (PoolKind::Netfs, nfs_mount_root.join(&spec.name)),
            PoolType::Logical => (PoolKind::Logical, PathBuf::from("/dev").join(&spec.name)),
            PoolType::Iscsi => (PoolKind::Iscsi, PathBuf::from("/dev/disk/by-id")),
        };

        Self { name: spec.name.clone(), kind, target_path, source }
    }

    /// Render the libvirt-style XML descriptor.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        let _ = writeln!(xml, "<pool type='{}'>", self.kind);
        let _ = writeln!(xml, "  <name>{}</name>", escape(&self.name));

        let source = &self.source;
        let has_source = source.host.is_some()
            || source.dir.is_some()
            || source.target.is_some()
            || !source.devices.is_empty();
        if has_source {
            xml.push_str("  <source>\n");
            if let Some(host) = &source.host {
                let _ = writeln!(xml, "    <host name='{}'/>", escape(host));
            }
            if let Some(dir) = &source.dir {
                let _ = writeln!(xml, "    <dir path='{}'/>", escape(dir));
            }
            for device in &source.devices {
                let _ = writeln!(xml, "    <device path='{}'/>", escape(device));
            }
            if let Some(target) = &source.target {
                let _ = writeln!(xml, "    <device path='{}'/>", escape(target));
            }
            xml.push_str("  </source>\n");
        }

        xml.push_str("  <target>\n");
        let _ = writeln!(
            xml,
            "    <path>{}</path>",
            escape(&self.target_path.to_string_lossy())
        );
        xml.push_str("  </target>\n");
        xml.push_str("</pool>\n");
        xml
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pool::SourceSpec;

    fn spec(name: &str, pool_type: PoolType) -> PoolSpec {
        PoolSpec {
            name: name.to_string(),
            pool_type,
            path: None,
            source: SourceSpec::default(),
        }
    }

    #[test]
    fn test_dir_pool_xml() {
        let def = PoolDefinition::dir("alt", "/tmp");
        let xml = def.to_xml();
        assert!(xml.starts_with("<pool type='dir'>"));
        assert!(xml.contains("<name>alt</name>"));
        assert!(xml.contains("<path>/tmp</path>"));
        assert!(!xml.contains("<source>"));
    }

    #[test]
    fn test_netfs_pool_mounts_under_root() {
        let mut spec = spec("nfs", PoolType::Netfs);
        spec.source.host = Some("10.0.0.1".to_string());
        spec.source.path = Some("/export".to_string());

        let def = PoolDefinition::from_spec_in(&spec, Path::new("/var/lib/vpool/nfs_mount"));
        assert_eq!(def.kind, PoolKind::Netfs);
        assert_eq!(def.target_path, PathBuf::from("/var/lib/vpool/nfs_mount/nfs"));

        let xml = def.to_xml();
        assert!(xml.contains("<host name='10.0.0.1'/>"));
        assert!(xml.contains("<dir path='/export'/>"));
    }

    #[test]
    fn test_logical_pool_targets_dev() {
        let mut spec = spec("vg0", PoolType::Logical);
        spec.source.devices = vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()];

        let def = PoolDefinition::from_spec(&spec);
        assert_eq!(def.target_path, PathBuf::from("/dev/vg0"));
        assert_eq!(def.to_xml().matches("<device path=").count(), 2);
    }

    #[test]
    fn test_iso_pool_is_dir_kind() {
        let mut spec = spec("isos", PoolType::KimchiIso);
        spec.path = Some(PathBuf::from("/tmp/vpool-scan-isos"));
        let def = PoolDefinition::from_spec(&spec);
        assert_eq!(def.kind, PoolKind::Dir);
        assert_eq!(def.target_path, PathBuf::from("/tmp/vpool-scan-isos"));
        assert!(def.kind.is_on_disk());
        assert!(!PoolKind::Iscsi.is_on_disk());
    }

    #[test]
    fn test_xml_escaping() {
        let def = PoolDefinition::dir("a<b>&'c'", "/tmp/x");
        let xml = def.to_xml();
        assert!(xml.contains("<name>a&lt;b&gt;&amp;&apos;c&apos;</name>"));
    }
}
