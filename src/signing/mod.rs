//! Digital signing: key material, chain construction and detached signatures.

pub mod chain;
pub mod material;
pub mod signer;

pub use chain::{CertificateChain, ChainBuilder};
pub use material::SigningMaterial;
pub use signer::{DetachedSigner, RsaSha256Pkcs7, SignatureAlgorithm};
