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

//! Adapters for signing and verifying JWTs with the [`jwt`] crate, using the
//! keys and cryptography provider of this crate.

use std::cell::Cell;

use bherror::{traits::ForeignError as _, Error};

use crate::{base64_url_encode, AlgorithmRegistry, JoseError, JwsAlgorithm, Key, Result};

/// Sign a JWT through [`jwt::SignWithKey`], computing the signature with
/// `key` through the `registry`.
///
/// Errors of the cryptography provider are propagated as they are, instead of
/// the opaque [`jwt::Error`]. Unsecured JWTs are not supported, so
/// [`JwsAlgorithm::None`] fails with [`JoseError::UnsupportedAlgorithm`].
pub fn sign_jwt<UnsignedJwt, SignedJwt>(
    unsigned_jwt: UnsignedJwt,
    registry: &AlgorithmRegistry,
    algorithm: JwsAlgorithm,
    key: &Key,
) -> Result<SignedJwt>
where
    UnsignedJwt: jwt::SignWithKey<SignedJwt>,
{
    reject_unsecured(algorithm)?;
    let signer = ErrorHolder::new(JwsKey {
        registry,
        algorithm,
        key,
    });
    let result = unsigned_jwt.sign_with_key(&signer);
    signer.combine(result)
}

/// Verify a JWT through [`jwt::VerifyWithKey`], checking the signature with
/// `key` through the `registry`.
///
/// # Errors
///
/// Returns [`JoseError::SignatureVerificationFailed`] if the signature is not
/// valid, [`JoseError::MalformedHeader`] if the `"alg"` of the token is not
/// `algorithm`, and [`JoseError::UnsupportedAlgorithm`] for
/// [`JwsAlgorithm::None`].
pub fn verify_jwt_signature<UnverifiedJwt, VerifiedJwt>(
    unverified_jwt: UnverifiedJwt,
    registry: &AlgorithmRegistry,
    algorithm: JwsAlgorithm,
    key: &Key,
) -> Result<VerifiedJwt>
where
    UnverifiedJwt: jwt::VerifyWithKey<VerifiedJwt>,
{
    reject_unsecured(algorithm)?;
    let verifier = ErrorHolder::new(JwsKey {
        registry,
        algorithm,
        key,
    });
    let result = unverified_jwt.verify_with_key(&verifier);
    verifier.combine(result)
}

fn reject_unsecured(algorithm: JwsAlgorithm) -> Result<()> {
    if algorithm == JwsAlgorithm::None {
        tracing::warn!("rejected unsecured JWT");
        return Err(Error::root(JoseError::UnsupportedAlgorithm(algorithm.to_string())));
    }
    Ok(())
}

/// A key together with the algorithm to use it with.
struct JwsKey<'a> {
    registry: &'a AlgorithmRegistry,
    algorithm: JwsAlgorithm,
    key: &'a Key,
}

fn signing_input(header: &str, claims: &str) -> String {
    format!("{header}.{claims}")
}

impl jwt::SigningAlgorithm for ErrorHolder<JwsKey<'_>> {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.inner.algorithm.into()
    }

    fn sign(&self, header: &str, claims: &str) -> std::result::Result<String, jwt::Error> {
        let message = signing_input(header, claims);

        self.inner
            .registry
            .sign(self.inner.algorithm, self.inner.key, message.as_bytes())
            .map(base64_url_encode)
            .map_err(|error| self.store_error(error))
    }
}

impl jwt::VerifyingAlgorithm for ErrorHolder<JwsKey<'_>> {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.inner.algorithm.into()
    }

    fn verify_bytes(
        &self,
        header: &str,
        claims: &str,
        signature: &[u8],
    ) -> std::result::Result<bool, jwt::Error> {
        let message = signing_input(header, claims);

        self.inner
            .registry
            .verify(self.inner.algorithm, self.inner.key, message.as_bytes(), signature)
            .map_err(|error| self.store_error(error))
    }
}

/// Helper wrapper for collecting errors from the registry which cannot be
/// piped through `jwt::Error`.
struct ErrorHolder<T> {
    inner: T,
    /// Interior-mutable slot for the error returned by the registry, if any.
    error: Cell<Option<Error<JoseError>>>,
}

impl<T> ErrorHolder<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            error: Cell::new(None),
        }
    }

    fn store_error(&self, error: Error<JoseError>) -> jwt::Error {
        let previous = self.error.replace(Some(error));
        debug_assert!(previous.is_none());

        // Not really "correct", but we need to return *something*; `combine`
        // recovers the stored error
        jwt::Error::InvalidSignature
    }

    /// Recover the stored error if there is one, otherwise translate the
    /// [`jwt::Error`].
    fn combine<R>(self, result: std::result::Result<R, jwt::Error>) -> Result<R> {
        let jwt_error = match result {
            Ok(value) => return Ok(value),
            Err(jwt_error) => jwt_error,
        };

        if let Some(underlying_error) = self.error.into_inner() {
            debug_assert!(matches!(jwt_error, jwt::Error::InvalidSignature));
            return Err(underlying_error);
        }

        let error = match &jwt_error {
            jwt::Error::InvalidSignature => JoseError::SignatureVerificationFailed,
            jwt::Error::AlgorithmMismatch(..) => JoseError::MalformedHeader(jwt_error.to_string()),
            _ => JoseError::MalformedSerialization(jwt_error.to_string()),
        };
        Err(jwt_error).foreign_err(|| error)
    }
}
