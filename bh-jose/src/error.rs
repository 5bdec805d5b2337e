// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! This module defines the error values returned by the crate API.

/// Error type used across the crate API.
///
/// [`JoseError::SignatureVerificationFailed`] and [`JoseError::DecryptionFailed`]
/// are intentionally coarse: they never say which step failed, nor whether the
/// key or the protected content was wrong. No variant ever carries key material
/// or plaintext.
#[derive(strum_macros::Display, Debug, PartialEq, Eq, Clone)]
pub enum JoseError {
    /// Error when a value is not valid unpadded `base64url`.
    #[strum(to_string = "Malformed base64url encoding")]
    MalformedEncoding,

    /// Error when a JOSE header is not a valid JSON object or one of its
    /// parameters has an unexpected type.
    #[strum(to_string = "Malformed header: {0}")]
    MalformedHeader(String),

    /// Error when a compact or JSON serialization can not be parsed or
    /// produced.
    #[strum(to_string = "Malformed serialization: {0}")]
    MalformedSerialization(String),

    /// Error when key components violate structural constraints.
    #[strum(to_string = "Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Error when an algorithm identifier is unknown or not enabled.
    #[strum(to_string = "Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Error when a header lists a critical parameter which is not understood.
    #[strum(to_string = "Unsupported critical parameter: {0}")]
    UnsupportedCriticalParameter(String),

    /// Error when a key can not be used for the requested operation or
    /// algorithm.
    #[strum(to_string = "Key capability mismatch: {0}")]
    KeyCapabilityMismatch(String),

    /// Error when a JWS signature is not valid.
    #[strum(to_string = "Signature verification failed")]
    SignatureVerificationFailed,

    /// Error when a JWE can not be decrypted.
    #[strum(to_string = "Decryption failed")]
    DecryptionFailed,

    /// Error when the cryptography provider failed.
    #[strum(to_string = "Cryptographic operation failed: {0}")]
    CryptographicOperationFailed(String),
}

impl bherror::BhError for JoseError {}

/// Result type used across the crate.
pub type Result<T> = bherror::Result<T, JoseError>;
