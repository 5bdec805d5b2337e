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

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use bherror::traits::ForeignError as _;

use crate::{JoseError, Result};

/// `base64url` engine as used by JOSE, see [section 2 of RFC7515][1].
///
/// Padding is never written and must be absent when decoding. Non-canonical
/// trailing bits are rejected.
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7515.html#section-2
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// Returns the `base64url`-encoded string **without padding** of the given
/// `input`.
pub fn base64_url_encode<T: AsRef<[u8]>>(input: T) -> String {
    BASE64_URL.encode(input)
}

/// Decodes the given `input` as the `base64url`-encoded string **without
/// padding** into bytes.
///
/// # Errors
///
/// Returns [`JoseError::MalformedEncoding`] if `input` contains characters
/// outside of the URL-safe alphabet or any padding characters.
pub fn base64_url_decode<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>> {
    BASE64_URL
        .decode(input)
        .foreign_err(|| JoseError::MalformedEncoding)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TEST_CASES: [(&str, &str); 5] = [
        ("Hello, World!", "SGVsbG8sIFdvcmxkIQ"),
        ("", ""),
        ("Rust! 🚀", "UnVzdCEg8J-agA"),
        ("no padding here", "bm8gcGFkZGluZyBoZXJl"),
        ("{\"alg\":\"HS256\"}", "eyJhbGciOiJIUzI1NiJ9"),
    ];

    #[test]
    fn test_base64_url_encode() {
        for (input, expected) in TEST_CASES {
            assert_eq!(base64_url_encode(input), expected, "{input}");
        }
    }

    #[test]
    fn test_base64_url_encode_binary_data() {
        assert_eq!(base64_url_encode([0xDE, 0xAD, 0xBE, 0xEF]), "3q2-7w");
        assert_eq!(base64_url_encode([0xFB, 0xFF]), "-_8");
    }

    #[test]
    fn test_base64_url_decode() {
        for (expected, input) in TEST_CASES {
            let result = base64_url_decode(input).unwrap();
            assert_eq!(result, expected.as_bytes(), "{input}");
        }
    }

    #[test]
    fn test_round_trip_all_lengths() {
        let data: Vec<u8> = (0..=255).collect();

        for len in 0..data.len() {
            let encoded = base64_url_encode(&data[..len]);
            assert_eq!(base64_url_decode(&encoded).unwrap(), &data[..len]);
        }
    }

    #[test]
    fn test_padding_is_rejected() {
        let err = base64_url_decode("SGVsbG8sIFdvcmxkIQ==").unwrap_err();
        assert_matches!(err.error, JoseError::MalformedEncoding);

        let err = base64_url_decode("3q2-7w==").unwrap_err();
        assert_matches!(err.error, JoseError::MalformedEncoding);
    }

    #[test]
    fn test_invalid_alphabet_is_rejected() {
        for input in ["3q2+7w", "3q2/7w", "3q2-7w.", "3q 2-7w", "SGVsbG8*"] {
            let err = base64_url_decode(input).unwrap_err();
            assert_matches!(err.error, JoseError::MalformedEncoding, "{input}");
        }
    }

    #[test]
    fn test_invalid_length_is_rejected() {
        let err = base64_url_decode("XFBoMYUZodetZdvTiFvSkQXXX").unwrap_err();
        assert_matches!(err.error, JoseError::MalformedEncoding);
    }
}
