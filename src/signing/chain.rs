//! Certificate chain construction.
//!
//! Orders the loaded certificates leaf-first by issuer linking: starting at
//! the signing certificate, the extra certificates from the bundle are
//! searched for the one that issued the current tail, until a self-signed
//! anchor or an unresolved issuer stops the walk.

use openssl::x509::{X509VerifyResult, X509};
use tracing::debug;

use crate::{
    config::RevocationPolicy,
    error::{ChainBuildError, Result},
    signing::material::SigningMaterial,
};

/// A leaf-first certificate chain ready for embedding.
#[derive(Clone)]
pub struct CertificateChain {
    certs: Vec<X509>,
}

impl CertificateChain {
    pub fn leaf(&self) -> &X509 {
        &self.certs[0]
    }

    /// Certificates above the leaf, in issuing order.
    pub fn intermediates(&self) -> &[X509] {
        &self.certs[1..]
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

pub struct ChainBuilder {
    policy: RevocationPolicy,
}

impl ChainBuilder {
    pub fn new(policy: RevocationPolicy) -> Self {
        Self { policy }
    }

    pub fn build(&self, material: &SigningMaterial) -> Result<CertificateChain> {
        if self.policy == RevocationPolicy::CrlCheck {
            // No CRL source is wired into this offline core. Failing here is
            // honest; silently skipping the check would not be.
            return Err(ChainBuildError::RevocationUnavailable.into());
        }

        let mut certs = vec![material.leaf().clone()];
        let mut pool: Vec<X509> = material.extra_certs().to_vec();

        loop {
            let tail = match certs.last() {
                Some(cert) => cert.clone(),
                None => return Err(ChainBuildError::EmptyChain.into()),
            };
            if tail.issued(&tail) == X509VerifyResult::OK {
                // Self-signed anchor reached.
                break;
            }
            let issuer_idx = pool
                .iter()
                .position(|candidate| candidate.issued(&tail) == X509VerifyResult::OK);
            match issuer_idx {
                Some(idx) => certs.push(pool.swap_remove(idx)),
                None => break,
            }
        }

        if certs.is_empty() {
            return Err(ChainBuildError::EmptyChain.into());
        }
        debug!(length = certs.len(), "certificate chain built");
        Ok(CertificateChain { certs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::{
        asn1::Asn1Time,
        hash::MessageDigest,
        pkey::{PKey, Private},
        rsa::Rsa,
        x509::{X509Builder, X509NameBuilder},
    };

    fn make_key() -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
    }

    fn make_cert(
        subject: &str,
        subject_key: &PKey<Private>,
        issuer: Option<(&str, &PKey<Private>)>,
    ) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", subject).unwrap();
        let name = name.build();

        let mut issuer_name = X509NameBuilder::new().unwrap();
        let (issuer_cn, signing_key) = issuer.unwrap_or((subject, subject_key));
        issuer_name.append_entry_by_text("CN", issuer_cn).unwrap();
        let issuer_name = issuer_name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&issuer_name).unwrap();
        builder.set_pubkey(subject_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(signing_key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn chain_orders_leaf_first_up_to_the_root() {
        let root_key = make_key();
        let inter_key = make_key();
        let leaf_key = make_key();

        let root = make_cert("Test Root", &root_key, None);
        let inter = make_cert("Test Intermediate", &inter_key, Some(("Test Root", &root_key)));
        let leaf = make_cert("Test Leaf", &leaf_key, Some(("Test Intermediate", &inter_key)));

        // Pool order deliberately scrambled.
        let material =
            SigningMaterial::from_parts(leaf_key, leaf, vec![root.clone(), inter.clone()]);
        let chain = ChainBuilder::new(RevocationPolicy::Disabled)
            .build(&material)
            .unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.leaf().subject_name().entries().count(),
            1
        );
        assert_eq!(chain.intermediates().len(), 2);
    }

    #[test]
    fn self_signed_leaf_yields_single_entry_chain() {
        let key = make_key();
        let cert = make_cert("Solo", &key, None);
        let material = SigningMaterial::from_parts(key, cert, vec![]);
        let chain = ChainBuilder::new(RevocationPolicy::Disabled)
            .build(&material)
            .unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn crl_policy_fails_without_a_crl_source() {
        let key = make_key();
        let cert = make_cert("Solo", &key, None);
        let material = SigningMaterial::from_parts(key, cert, vec![]);
        let result = ChainBuilder::new(RevocationPolicy::CrlCheck).build(&material);
        assert!(matches!(
            result,
            Err(crate::error::Error::ChainBuild(
                ChainBuildError::RevocationUnavailable
            ))
        ));
    }
}
