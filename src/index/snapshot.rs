use crate::error::{Result, SupervisorError};
use crate::symbols::SymbolRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Exported index contents for an external persistence layer. The
/// membership filter is not stored; it is rebuilt on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub symbols: Vec<SymbolRecord>,
    pub indexed_files: Vec<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub filter_capacity: usize,
}

impl IndexSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = bincode::deserialize(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SupervisorError::Validation(format!(
                "unsupported index snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_foreign_version_and_garbage() {
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION + 1,
            symbols: Vec::new(),
            indexed_files: Vec::new(),
            last_update: None,
            filter_capacity: 10,
        };
        let bytes = snapshot.to_bytes().unwrap();
        assert!(matches!(
            IndexSnapshot::from_bytes(&bytes),
            Err(SupervisorError::Validation(_))
        ));
        assert!(IndexSnapshot::from_bytes(&[1, 2, 3]).is_err());
    }
}
