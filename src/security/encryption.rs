//! Standard security handler, revision 4 with the AESV2 crypt filter.
//!
//! Published copies are encrypted print-only: AES-128-CBC for strings and
//! streams, owner password protecting the permission settings, user password
//! empty so the document opens for reading. Key derivation follows the
//! standard handler algorithms (padded passwords, 50-round MD5 iteration,
//! per-object keys salted with "sAlT"), which is why MD5 and RC4 appear here
//! at all: verifying readers recompute /O and /U exactly this way.

use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};
use openssl::{
    hash::{hash, MessageDigest},
    rand::rand_bytes,
    symm::{Cipher, Crypter, Mode},
};
use tracing::{debug, info, instrument};

use crate::{
    config::{EncryptionConfig, PermissionFlags},
    error::{EncryptionError, Result},
};

/// Password pad constant from the standard security handler.
const PASSWORD_PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

const KEY_LEN: usize = 16;

pub struct EncryptionApplier {
    config: EncryptionConfig,
}

/// Per-object string encryption for mutations made after the document-wide
/// pass, under the same file key. The signature dictionary added by the
/// signer needs this: its /Name, /Reason and date strings are subject to
/// /StrF like every other string, only /Contents is exempt.
pub struct ObjectCipher {
    file_key: Vec<u8>,
}

impl ObjectCipher {
    pub fn encrypt_string(&self, data: &[u8], object_id: ObjectId) -> Result<Vec<u8>> {
        let key = object_key(&self.file_key, object_id)?;
        encrypt_aes(data, &key)
    }
}

impl EncryptionApplier {
    pub fn new(config: EncryptionConfig) -> Self {
        Self { config }
    }

    /// Encrypts every string and stream in the document and installs the
    /// /Encrypt dictionary and trailer /ID.
    ///
    /// Runs before the signer; the returned [`ObjectCipher`] lets the signer
    /// encrypt the strings of the objects it adds afterwards.
    #[instrument(skip(self, doc))]
    pub fn encrypt(&self, doc: &mut Document) -> Result<ObjectCipher> {
        if self.config.owner_password.is_empty() {
            return Err(EncryptionError::MissingOwnerPassword.into());
        }

        let file_id = ensure_file_id(doc)?;
        let padded_user = pad_password(&self.config.user_password);
        let padded_owner = pad_password(&self.config.owner_password);

        let o_value = compute_o_value(&padded_owner, &padded_user)?;
        let permissions = permissions_value(&self.config.permissions);
        let file_key = compute_file_key(&padded_user, &o_value, permissions, &file_id)?;
        let u_value = compute_u_value(&file_key, &file_id)?;

        let object_ids: Vec<ObjectId> = doc.objects.keys().cloned().collect();
        let mut encrypted = 0usize;
        for object_id in object_ids {
            if let Some(object) = doc.objects.get_mut(&object_id) {
                encrypted += encrypt_object(object, &file_key, object_id)?;
            }
        }

        let encrypt_dict = dictionary! {
            "Filter" => "Standard",
            "V" => 4,
            "R" => 4,
            "Length" => 128,
            "CF" => dictionary! {
                "StdCF" => dictionary! {
                    "CFM" => "AESV2",
                    "AuthEvent" => "DocOpen",
                    "Length" => 16,
                },
            },
            "StmF" => "StdCF",
            "StrF" => "StdCF",
            "O" => Object::String(o_value, StringFormat::Literal),
            "U" => Object::String(u_value, StringFormat::Literal),
            "P" => Object::Integer(permissions as i64),
            "EncryptMetadata" => true,
        };
        let encrypt_id = doc.add_object(Object::Dictionary(encrypt_dict));
        doc.trailer.set("Encrypt", Object::Reference(encrypt_id));

        info!(objects = encrypted, "document content encrypted");
        Ok(ObjectCipher { file_key })
    }
}

/// Print-only permission word. Starts from the all-ones base with the two
/// reserved zero bits, then clears each denied permission bit.
fn permissions_value(flags: &PermissionFlags) -> i32 {
    let mut p: i32 = -4;
    let bits = [
        (flags.print, 2),
        (flags.modify, 3),
        (flags.copy, 4),
        (flags.annotate, 5),
        (flags.fill_forms, 8),
        (flags.extract_for_accessibility, 9),
        (flags.assemble, 10),
        (flags.high_quality_print, 11),
    ];
    for (allowed, bit) in bits {
        if !allowed {
            p &= !(1 << bit);
        }
    }
    p
}

fn pad_password(password: &str) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let bytes = password.as_bytes();
    let take = bytes.len().min(32);
    padded[..take].copy_from_slice(&bytes[..take]);
    padded[take..].copy_from_slice(&PASSWORD_PAD[..32 - take]);
    padded
}

fn md5(data: &[u8]) -> Result<Vec<u8>> {
    hash(MessageDigest::md5(), data)
        .map(|d| d.to_vec())
        .map_err(|e| EncryptionError::KeyDerivation(e.to_string()).into())
}

/// /O entry: RC4 of the padded user password under the iterated owner key.
fn compute_o_value(padded_owner: &[u8; 32], padded_user: &[u8; 32]) -> Result<Vec<u8>> {
    let mut digest = md5(padded_owner)?;
    for _ in 0..50 {
        digest = md5(&digest[..KEY_LEN])?;
    }
    let rc4_key = &digest[..KEY_LEN];

    let mut value = rc4(rc4_key, padded_user);
    for i in 1..=19u8 {
        let pass_key: Vec<u8> = rc4_key.iter().map(|b| b ^ i).collect();
        value = rc4(&pass_key, &value);
    }
    Ok(value)
}

/// File encryption key, standard handler Algorithm 2 with 50 MD5 rounds.
fn compute_file_key(
    padded_user: &[u8; 32],
    o_value: &[u8],
    permissions: i32,
    file_id: &[u8],
) -> Result<Vec<u8>> {
    let mut input = Vec::with_capacity(32 + o_value.len() + 4 + file_id.len());
    input.extend_from_slice(padded_user);
    input.extend_from_slice(o_value);
    input.extend_from_slice(&permissions.to_le_bytes());
    input.extend_from_slice(file_id);

    let mut digest = md5(&input)?;
    for _ in 0..50 {
        digest = md5(&digest[..KEY_LEN])?;
    }
    digest.truncate(KEY_LEN);
    Ok(digest)
}

/// /U entry in the revision 3 and later form.
fn compute_u_value(file_key: &[u8], file_id: &[u8]) -> Result<Vec<u8>> {
    let mut input = Vec::with_capacity(32 + file_id.len());
    input.extend_from_slice(&PASSWORD_PAD);
    input.extend_from_slice(file_id);
    let digest = md5(&input)?;

    let mut value = rc4(file_key, &digest);
    for i in 1..=19u8 {
        let pass_key: Vec<u8> = file_key.iter().map(|b| b ^ i).collect();
        value = rc4(&pass_key, &value);
    }
    value.resize(32, 0);
    Ok(value)
}

/// Per-object key: MD5 of the file key, object number, generation and the
/// AES salt, truncated to the key length.
fn object_key(file_key: &[u8], object_id: ObjectId) -> Result<Vec<u8>> {
    let mut input = file_key.to_vec();
    input.extend_from_slice(&object_id.0.to_le_bytes()[..3]);
    input.extend_from_slice(&object_id.1.to_le_bytes());
    input.extend_from_slice(b"sAlT");
    let mut digest = md5(&input)?;
    digest.truncate(KEY_LEN);
    Ok(digest)
}

/// AES-128-CBC with a fresh random IV prepended to the ciphertext.
fn encrypt_aes(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = Cipher::aes_128_cbc();
    let mut iv = vec![0u8; 16];
    rand_bytes(&mut iv).map_err(|e| EncryptionError::Cipher(e.to_string()))?;

    let mut crypter = Crypter::new(cipher, Mode::Encrypt, key, Some(&iv))
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;
    let mut ciphertext = vec![0u8; data.len() + cipher.block_size()];
    let mut len = crypter
        .update(data, &mut ciphertext)
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;
    len += crypter
        .finalize(&mut ciphertext[len..])
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;
    ciphertext.truncate(len);

    let mut result = iv;
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// RC4, used only by the legacy /O and /U derivation steps above.
fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: [u8; 256] = [0; 256];
    for (i, slot) in s.iter_mut().enumerate() {
        *slot = i as u8;
    }

    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }

    let mut output = Vec::with_capacity(data.len());
    let mut i = 0u8;
    let mut j = 0u8;
    for &byte in data {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[i as usize]);
        s.swap(i as usize, j as usize);
        let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
        output.push(byte ^ k);
    }
    output
}

/// Encrypts the strings and stream content of one object. Returns how many
/// values were transformed.
fn encrypt_object(object: &mut Object, file_key: &[u8], object_id: ObjectId) -> Result<usize> {
    let mut count = 0usize;
    match object {
        Object::String(content, _) => {
            let key = object_key(file_key, object_id)?;
            *content = encrypt_aes(content, &key)?;
            count += 1;
        }
        Object::Stream(stream) => {
            let key = object_key(file_key, object_id)?;
            let encrypted = encrypt_aes(&stream.content, &key)?;
            stream.set_content(encrypted);
            count += 1;
            for (_, value) in stream.dict.iter_mut() {
                count += encrypt_object(value, file_key, object_id)?;
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                count += encrypt_object(value, file_key, object_id)?;
            }
        }
        Object::Array(items) => {
            for item in items.iter_mut() {
                count += encrypt_object(item, file_key, object_id)?;
            }
        }
        _ => {}
    }
    Ok(count)
}

/// The key derivation hashes the first element of the trailer /ID, so one is
/// generated when the source document carries none.
fn ensure_file_id(doc: &mut Document) -> Result<Vec<u8>> {
    if let Ok(Object::Array(ids)) = doc.trailer.get(b"ID") {
        if let Some(Object::String(first, _)) = ids.first() {
            return Ok(first.clone());
        }
    }

    let mut id = vec![0u8; 16];
    rand_bytes(&mut id).map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(id.clone(), StringFormat::Hexadecimal),
            Object::String(id.clone(), StringFormat::Hexadecimal),
        ]),
    );
    debug!("generated trailer file ID");
    Ok(id)
}
