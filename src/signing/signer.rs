//! Detached PKCS#7 signing.
//!
//! The signature travels in a standard signature field: a /Sig dictionary
//! with ByteRange and Contents placeholders is embedded, the document is
//! serialized, and the placeholders are patched at the byte level so the
//! digest covers every byte of the file outside the Contents hex gap. The
//! watermarked input is only ever read; the signed bytes go to a separate
//! output file.

use std::path::Path;

use chrono::Utc;
use lopdf::{dictionary, Dictionary, Document, Object, StringFormat};
use openssl::{
    pkcs7::{Pkcs7, Pkcs7Flags},
    stack::Stack,
    x509::X509,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::{
    config::SignatureConfig,
    error::{Result, SigningError},
    security::ObjectCipher,
    signing::{chain::CertificateChain, material::SigningMaterial},
};

/// Reserved space for the DER signature inside /Contents, in bytes.
const CONTENTS_CAPACITY: usize = 8192;
/// Sentinel for the three patched ByteRange entries; 10 digits each.
const BYTE_RANGE_SENTINEL: i64 = 9_999_999_999;

/// A signature production capability.
///
/// The embedding machinery is algorithm-agnostic; swapping the signature
/// scheme means providing another implementation of this trait.
pub trait SignatureAlgorithm: Send + Sync {
    fn digest_algorithm(&self) -> &'static str;
    fn signature_algorithm(&self) -> &'static str;

    /// Produces the detached signature blob over `data`, with the chain
    /// embedded so verifiers can rebuild the trust path.
    fn sign_detached(
        &self,
        material: &SigningMaterial,
        chain: &CertificateChain,
        data: &[u8],
    ) -> Result<Vec<u8>>;
}

/// RSA with SHA-256 producing a detached PKCS#7 (CMS) structure.
pub struct RsaSha256Pkcs7;

impl SignatureAlgorithm for RsaSha256Pkcs7 {
    fn digest_algorithm(&self) -> &'static str {
        "SHA-256"
    }

    fn signature_algorithm(&self) -> &'static str {
        "RSA"
    }

    fn sign_detached(
        &self,
        material: &SigningMaterial,
        chain: &CertificateChain,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut extras = Stack::<X509>::new()
            .map_err(|e| SigningError::Pkcs7(e.to_string()))?;
        for cert in chain.intermediates() {
            extras
                .push(cert.clone())
                .map_err(|e| SigningError::Pkcs7(e.to_string()))?;
        }

        let pkcs7 = Pkcs7::sign(
            chain.leaf(),
            material.key(),
            &extras,
            data,
            Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
        )
        .map_err(|e| SigningError::Pkcs7(e.to_string()))?;

        pkcs7
            .to_der()
            .map_err(|e| SigningError::Pkcs7(e.to_string()))
            .map_err(Into::into)
    }
}

pub struct DetachedSigner {
    config: SignatureConfig,
    algorithm: Box<dyn SignatureAlgorithm>,
}

impl DetachedSigner {
    pub fn new(config: SignatureConfig) -> Self {
        Self {
            config,
            algorithm: Box::new(RsaSha256Pkcs7),
        }
    }

    pub fn with_algorithm(config: SignatureConfig, algorithm: Box<dyn SignatureAlgorithm>) -> Self {
        Self { config, algorithm }
    }

    /// Records custodian identity and the SHA-256 fingerprint of the
    /// watermarked bytes in the Info dictionary.
    pub fn apply_metadata(&self, doc: &mut Document, watermarked_bytes: &[u8]) -> Result<()> {
        let fingerprint = hex::encode(Sha256::digest(watermarked_bytes));
        let date = pdf_date_now();

        let info = info_dict_mut(doc)?;
        info.set(
            "Custodian",
            Object::string_literal(self.config.custodian_name.as_str()),
        );
        info.set(
            "CustodianLocation",
            Object::string_literal(self.config.custodian_location.as_str()),
        );
        info.set(
            "SigningReason",
            Object::string_literal(self.config.signing_reason.as_str()),
        );
        info.set("SHA256Digest", Object::string_literal(fingerprint));
        info.set("ModDate", Object::string_literal(date));
        Ok(())
    }

    /// Embeds the signature field, serializes the document to `output` and
    /// patches the real ByteRange and signature bytes in.
    ///
    /// When the document was encrypted beforehand, `cipher` carries the same
    /// file key so the field's own strings are encrypted like every other
    /// string in the file.
    #[instrument(skip(self, doc, material, chain, cipher))]
    pub async fn sign(
        &self,
        mut doc: Document,
        output: &Path,
        material: &SigningMaterial,
        chain: &CertificateChain,
        cipher: Option<&ObjectCipher>,
    ) -> Result<()> {
        self.embed_signature_field(&mut doc, cipher)?;

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| SigningError::Pkcs7(format!("serialization failed: {}", e)))?;

        let (gap_start, gap_end) = locate_contents_gap(&bytes)?;
        patch_byte_range(&mut bytes, gap_start, gap_end)?;

        let mut signed_data = Vec::with_capacity(bytes.len() - (gap_end - gap_start));
        signed_data.extend_from_slice(&bytes[..gap_start]);
        signed_data.extend_from_slice(&bytes[gap_end..]);

        let signature = self
            .algorithm
            .sign_detached(material, chain, &signed_data)?;
        if signature.len() > CONTENTS_CAPACITY {
            return Err(SigningError::SignatureTooLarge {
                got: signature.len(),
                capacity: CONTENTS_CAPACITY,
            }
            .into());
        }

        let sig_hex = hex::encode(&signature);
        bytes[gap_start + 1..gap_start + 1 + sig_hex.len()].copy_from_slice(sig_hex.as_bytes());

        tokio::fs::write(output, &bytes).await?;
        info!(
            algorithm = self.algorithm.signature_algorithm(),
            digest = self.algorithm.digest_algorithm(),
            chain_length = chain.len(),
            signature_bytes = signature.len(),
            "document signed"
        );
        Ok(())
    }

    /// Adds the /Sig dictionary, its hidden widget and the AcroForm entry.
    ///
    /// With a cipher present, every literal string of the new objects is
    /// encrypted under its object's key; /Contents stays plaintext zeroes so
    /// the hex gap remains locatable after serialization, exactly as the
    /// /StrF exemption for it requires.
    fn embed_signature_field(&self, doc: &mut Document, cipher: Option<&ObjectCipher>) -> Result<()> {
        let first_page = doc
            .get_pages()
            .values()
            .next()
            .copied()
            .ok_or_else(|| SigningError::Pkcs7("document has no pages to anchor the field".into()))?;

        let sig_id = doc.add_object(dictionary! {
            "Type" => "Sig",
            "Filter" => "Adobe.PPKLite",
            "SubFilter" => "adbe.pkcs7.detached",
            "ByteRange" => vec![
                Object::Integer(0),
                Object::Integer(BYTE_RANGE_SENTINEL),
                Object::Integer(BYTE_RANGE_SENTINEL),
                Object::Integer(BYTE_RANGE_SENTINEL),
            ],
            "Contents" => Object::String(
                vec![0u8; CONTENTS_CAPACITY],
                StringFormat::Hexadecimal,
            ),
            "Name" => Object::string_literal(self.config.custodian_name.as_str()),
            "Location" => Object::string_literal(self.config.custodian_location.as_str()),
            "Reason" => Object::string_literal(self.config.signing_reason.as_str()),
            "M" => Object::string_literal(pdf_date_now()),
        });
        if let Some(cipher) = cipher {
            encrypt_dict_strings(doc, sig_id, &[b"Name", b"Location", b"Reason", b"M"], cipher)?;
        }

        let widget_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Sig",
            "T" => Object::string_literal("TrueCopySignature"),
            "F" => 132,
            "Rect" => vec![0.into(), 0.into(), 0.into(), 0.into()],
            "V" => Object::Reference(sig_id),
            "P" => Object::Reference(first_page),
        });
        if let Some(cipher) = cipher {
            encrypt_dict_strings(doc, widget_id, &[b"T"], cipher)?;
        }

        append_page_annotation(doc, first_page, widget_id)?;

        let catalog_id = match doc.trailer.get(b"Root") {
            Ok(Object::Reference(id)) => *id,
            _ => return Err(SigningError::Pkcs7("trailer has no Root reference".into()).into()),
        };
        let catalog = doc
            .get_object_mut(catalog_id)
            .and_then(|o| o.as_dict_mut())
            .map_err(|e| SigningError::Pkcs7(format!("catalog unavailable: {}", e)))?;
        catalog.set(
            "AcroForm",
            Object::Dictionary(dictionary! {
                "SigFlags" => 3,
                "Fields" => vec![Object::Reference(widget_id)],
            }),
        );

        debug!("signature field embedded");
        Ok(())
    }
}

/// Encrypts the named literal strings of one object under its per-object key.
fn encrypt_dict_strings(
    doc: &mut Document,
    object_id: lopdf::ObjectId,
    keys: &[&[u8]],
    cipher: &ObjectCipher,
) -> Result<()> {
    let dict = doc
        .get_object_mut(object_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| SigningError::Pkcs7(format!("signature object unavailable: {}", e)))?;
    for key in keys {
        if let Ok(Object::String(content, _)) = dict.get_mut(key) {
            let encrypted = cipher.encrypt_string(content, object_id)?;
            *content = encrypted;
        }
    }
    Ok(())
}

fn pdf_date_now() -> String {
    format!("D:{}+00'00'", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Mutable access to the Info dictionary, creating it when absent.
fn info_dict_mut(doc: &mut Document) -> Result<&mut Dictionary> {
    let info_id = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => *id,
        _ => {
            let id = doc.add_object(Object::Dictionary(Dictionary::new()));
            doc.trailer.set("Info", Object::Reference(id));
            id
        }
    };
    doc.get_object_mut(info_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| SigningError::Pkcs7(format!("Info dictionary unavailable: {}", e)).into())
}

fn append_page_annotation(
    doc: &mut Document,
    page_id: lopdf::ObjectId,
    annot_id: lopdf::ObjectId,
) -> Result<()> {
    let existing = {
        let page = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| SigningError::Pkcs7(format!("page unavailable: {}", e)))?;
        page.get(b"Annots").ok().cloned()
    };

    let mut annots = match existing {
        Some(Object::Array(items)) => items,
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    annots.push(Object::Reference(annot_id));

    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| SigningError::Pkcs7(format!("page unavailable: {}", e)))?;
    page.set("Annots", Object::Array(annots));
    Ok(())
}

/// Finds the serialized Contents placeholder. Returns the byte offsets of
/// the opening `<` and one past the closing `>`; the signed ranges exclude
/// this whole gap.
fn locate_contents_gap(bytes: &[u8]) -> Result<(usize, usize)> {
    let placeholder = vec![b'0'; CONTENTS_CAPACITY * 2];
    let zeros_at = find_subsequence(bytes, &placeholder)
        .ok_or_else(|| SigningError::PlaceholderMissing("Contents hex gap".into()))?;
    let gap_start = zeros_at - 1;
    let gap_end = zeros_at + placeholder.len() + 1;
    if bytes.get(gap_start) != Some(&b'<') || bytes.get(gap_end - 1) != Some(&b'>') {
        return Err(SigningError::PlaceholderMissing("Contents hex delimiters".into()).into());
    }
    Ok((gap_start, gap_end))
}

/// Overwrites the three ByteRange sentinels in place, space-padded to the
/// sentinel width so no byte offset in the file shifts.
fn patch_byte_range(bytes: &mut [u8], gap_start: usize, gap_end: usize) -> Result<()> {
    let token_at = find_subsequence(bytes, b"/ByteRange")
        .ok_or_else(|| SigningError::PlaceholderMissing("ByteRange key".into()))?;
    let total_len = bytes.len();

    let mut cursor = token_at;
    for value in [gap_start, gap_end, total_len - gap_end] {
        let sentinel = BYTE_RANGE_SENTINEL.to_string();
        let at = find_subsequence(&bytes[cursor..], sentinel.as_bytes())
            .map(|offset| cursor + offset)
            .ok_or_else(|| SigningError::PlaceholderMissing("ByteRange sentinel".into()))?;
        let patched = format!("{:<width$}", value, width = sentinel.len());
        bytes[at..at + sentinel.len()].copy_from_slice(patched.as_bytes());
        cursor = at + sentinel.len();
    }
    Ok(())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
