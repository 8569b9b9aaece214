//! Document security: the PDF standard security handler.

pub mod encryption;

pub use encryption::{EncryptionApplier, ObjectCipher};
