//! The ISO catalog pool.
//!
//! `kimchi_isos` aggregates the images of every pool. It is never defined
//! in the manager; lookups are answered here.

use crate::error::{Result, VpoolError};
use crate::types::{PoolState, PoolType, ISO_POOL_NAME};
use serde::{Deserialize, Serialize};

/// Report of the ISO catalog pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoPool {
    pub name: String,
    pub state: PoolState,
    #[serde(rename = "type")]
    pub pool_type: PoolType,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IsoPoolModel;

impl IsoPoolModel {
    pub fn new() -> Self {
        Self
    }

    pub fn lookup(&self, name: &str) -> Result<IsoPool> {
        if name != ISO_POOL_NAME {
            return Err(VpoolError::PoolNotFound { name: name.to_string() });
        }
        Ok(IsoPool {
            name: ISO_POOL_NAME.to_string(),
            state: PoolState::Active,
            pool_type: PoolType::KimchiIso,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_reserved_pool() {
        let pool = IsoPoolModel::new().lookup(ISO_POOL_NAME).unwrap();
        assert_eq!(pool.state, PoolState::Active);
        let json = serde_json::to_value(&pool).unwrap();
        assert_eq!(json["type"], "kimchi-iso");
        assert_eq!(json["state"], "active");
    }

    #[test]
    fn test_other_names_not_found() {
        let err = IsoPoolModel::new().lookup("isos").unwrap_err();
        assert!(matches!(err, VpoolError::PoolNotFound { ref name } if name == "isos"));
    }
}
