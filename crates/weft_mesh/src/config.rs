//! Mesh configuration.

use serde::Deserialize;

use weft_crypt::CsId;

use crate::error::MeshError;

/// Host-supplied options; all fields have working defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Force a single ciphersuite by hex ID ("1a"); absent enables
    /// negotiation.
    pub force: Option<String>,
    /// Frame payload bytes per frame, 16..=128.
    pub size: u8,
    /// Ceiling on buffered partial inbound frames per link.
    pub max_frames: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self { force: None, size: 64, max_frames: 64 }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<(), MeshError> {
        if !(16..=128).contains(&self.size) {
            return Err(MeshError::Config(format!("frame size {} outside 16..=128", self.size)));
        }
        if self.max_frames == 0 {
            return Err(MeshError::Config("max_frames must be nonzero".into()));
        }
        self.forced_suite()?;
        Ok(())
    }

    /// The forced ciphersuite, parsed, if one is configured.
    pub fn forced_suite(&self) -> Result<Option<CsId>, MeshError> {
        match &self.force {
            None => Ok(None),
            Some(hex) => CsId::from_hex(hex)
                .map(Some)
                .map_err(|_| MeshError::Config(format!("unknown ciphersuite {hex:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        MeshConfig::default().validate().unwrap();
    }

    #[test]
    fn size_bounds_enforced() {
        let mut cfg = MeshConfig::default();
        cfg.size = 15;
        assert!(cfg.validate().is_err());
        cfg.size = 129;
        assert!(cfg.validate().is_err());
        cfg.size = 16;
        cfg.validate().unwrap();
    }

    #[test]
    fn force_parses_known_suites() {
        let cfg: MeshConfig = serde_json::from_str(r#"{"force":"3a","size":32}"#).unwrap();
        assert_eq!(cfg.forced_suite().unwrap(), Some(CsId::Cs3a));
        assert_eq!(cfg.size, 32);

        let bad: MeshConfig = serde_json::from_str(r#"{"force":"zz"}"#).unwrap();
        assert!(bad.validate().is_err());
    }
}
