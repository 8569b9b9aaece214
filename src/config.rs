//! Configuration types and validation for the signing pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Watermark band and caption layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Domain that appears in the caption and the hyperlink target.
    pub domain: String,
    /// Width of the solid band along the left edge, in points.
    pub band_width: f64,
    /// Band fill color, 0.0..=1.0 RGB.
    pub band_color: [f64; 3],
    /// Text repeated up the band, rotated 90 degrees.
    pub band_text: String,
    pub band_font_size: f64,
    /// Vertical distance between band text repetitions, in points.
    pub band_spacing: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    /// Caption font size at the bottom of each page.
    pub caption_font_size: f64,
    /// Baseline height of the caption above the page bottom.
    pub caption_baseline: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            domain: "courtrecords.example.org".to_string(),
            band_width: 30.0,
            band_color: [0.85, 0.85, 0.85],
            band_text: "TRUE COPY".to_string(),
            band_font_size: 9.0,
            band_spacing: 120.0,
            margin_top: 40.0,
            margin_bottom: 40.0,
            caption_font_size: 8.0,
            caption_baseline: 18.0,
        }
    }
}

/// Certificate revocation posture for chain construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationPolicy {
    /// No revocation checking. The offline default.
    Disabled,
    /// CRL checking requested. Fails chain construction until a CRL source
    /// is wired in, rather than silently passing.
    CrlCheck,
}

/// Signing identity and PKCS#12 bundle location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Path to the PKCS#12 bundle holding key, leaf and intermediates.
    pub bundle_path: PathBuf,
    /// Environment variable holding the bundle password.
    pub password_env: String,
    pub custodian_name: String,
    pub custodian_location: String,
    pub signing_reason: String,
    pub revocation: RevocationPolicy,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            bundle_path: PathBuf::from("signing.p12"),
            password_env: "TRUECOPY_BUNDLE_PASSWORD".to_string(),
            custodian_name: "Court Records Custodian".to_string(),
            custodian_location: "Registry".to_string(),
            signing_reason: "Certified true copy".to_string(),
            revocation: RevocationPolicy::Disabled,
        }
    }
}

/// Reader permissions carried into the encryption dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionFlags {
    pub print: bool,
    pub modify: bool,
    pub copy: bool,
    pub annotate: bool,
    pub fill_forms: bool,
    pub extract_for_accessibility: bool,
    pub assemble: bool,
    pub high_quality_print: bool,
}

impl Default for PermissionFlags {
    /// Print-only: the published copy may be reproduced but not altered.
    fn default() -> Self {
        Self {
            print: true,
            modify: false,
            copy: false,
            annotate: false,
            fill_forms: false,
            extract_for_accessibility: false,
            assemble: false,
            high_quality_print: true,
        }
    }
}

/// Standard security handler settings (AES-128, revision 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Owner password protecting the permission settings. Required.
    pub owner_password: String,
    /// User password; empty means the document opens without one.
    pub user_password: String,
    pub permissions: PermissionFlags,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            owner_password: String::new(),
            user_password: String::new(),
            permissions: PermissionFlags::default(),
        }
    }
}

/// Admission control for concurrent requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub permits: usize,
    /// When set, a request that cannot acquire a slot within this many
    /// milliseconds fails with a gate timeout instead of waiting forever.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            permits: num_cpus::get().min(4),
            acquire_timeout_ms: None,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root under which per-request scratch directories are created.
    pub scratch_root: PathBuf,
    /// Directory the publisher copies finished artifacts into.
    pub publish_root: PathBuf,
    /// Public URL base reported back for published artifacts.
    pub public_base: String,
    pub watermark: WatermarkConfig,
    pub signature: SignatureConfig,
    pub encryption: EncryptionConfig,
    pub gate: GateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let watermark = WatermarkConfig::default();
        Self {
            scratch_root: std::env::temp_dir().join("truecopy"),
            publish_root: PathBuf::from("published"),
            public_base: format!("https://{}/TrueCopy", watermark.domain),
            watermark,
            signature: SignatureConfig::default(),
            encryption: EncryptionConfig::default(),
            gate: GateConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gate.permits == 0 {
            return Err(Error::Config("Gate must allow at least 1 permit".into()));
        }
        if self.watermark.band_spacing <= 0.0 {
            return Err(Error::Config("Band spacing must be positive".into()));
        }
        if self.watermark.margin_top < 0.0 || self.watermark.margin_bottom < 0.0 {
            return Err(Error::Config("Margins must be non-negative".into()));
        }
        if self.watermark.band_font_size <= 0.0 || self.watermark.caption_font_size <= 0.0 {
            return Err(Error::Config("Font sizes must be positive".into()));
        }
        if self.watermark.domain.is_empty() {
            return Err(Error::Config("Watermark domain must be set".into()));
        }
        if self.encryption.owner_password.is_empty() {
            return Err(Error::Config("Owner password must be set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.encryption.owner_password = "registry-secret".into();
        config
    }

    #[test]
    fn default_config_fails_without_owner_password() {
        assert!(PipelineConfig::default().validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn zero_permit_gate_rejected() {
        let mut config = valid_config();
        config.gate.permits = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_spacing_rejected() {
        let mut config = valid_config();
        config.watermark.band_spacing = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = valid_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.gate.permits, config.gate.permits);
        assert_eq!(parsed.encryption.owner_password, "registry-secret");
    }
}
