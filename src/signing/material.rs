//! Process-wide signing material.
//!
//! The PKCS#12 bundle is read and parsed once; the resulting material is
//! shared behind an `Arc` and never mutated, so every request signs with the
//! same key and certificates without re-reading the bundle.

use std::sync::Arc;

use openssl::{
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    x509::X509,
};
use tracing::info;

use crate::{
    config::SignatureConfig,
    error::{Result, SigningError},
};

pub struct SigningMaterial {
    key: PKey<Private>,
    leaf: X509,
    extra_certs: Vec<X509>,
}

impl SigningMaterial {
    /// Loads the bundle named by the config, taking the password from the
    /// configured environment variable.
    pub fn load(config: &SignatureConfig) -> Result<Arc<Self>> {
        let password = std::env::var(&config.password_env).map_err(|_| {
            SigningError::MaterialUnavailable(format!(
                "Bundle password not present in environment variable {}",
                config.password_env
            ))
        })?;

        let bytes = std::fs::read(&config.bundle_path).map_err(|e| {
            SigningError::MaterialUnavailable(format!(
                "Cannot read bundle {}: {}",
                config.bundle_path.display(),
                e
            ))
        })?;

        let parsed = Pkcs12::from_der(&bytes)
            .and_then(|p| p.parse2(&password))
            .map_err(|e| SigningError::MaterialUnavailable(format!("Bundle parse failed: {}", e)))?;

        let key = parsed
            .pkey
            .ok_or_else(|| SigningError::MaterialUnavailable("Bundle carries no private key".into()))?;
        let leaf = parsed
            .cert
            .ok_or_else(|| SigningError::MaterialUnavailable("Bundle carries no certificate".into()))?;
        let extra_certs: Vec<X509> = parsed
            .ca
            .map(|stack| stack.iter().map(|c| c.to_owned()).collect())
            .unwrap_or_default();

        info!(
            bundle = %config.bundle_path.display(),
            extras = extra_certs.len(),
            "signing material loaded"
        );
        Ok(Arc::new(Self {
            key,
            leaf,
            extra_certs,
        }))
    }

    /// Builds material from already-parsed parts. Used by tests and by
    /// callers that manage key storage themselves.
    pub fn from_parts(key: PKey<Private>, leaf: X509, extra_certs: Vec<X509>) -> Arc<Self> {
        Arc::new(Self {
            key,
            leaf,
            extra_certs,
        })
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    pub fn leaf(&self) -> &X509 {
        &self.leaf
    }

    pub fn extra_certs(&self) -> &[X509] {
        &self.extra_certs
    }
}
