//! Parsing of untyped operator arguments.
//!
//! Numbers follow the usual literal prefixes: `0x` hex, `0o` octal, `0b`
//! binary, decimal otherwise.

use crate::error::ModelError;
use crate::model::{Address, KeyIndex};

/// Parse an unsigned integer literal with an optional radix prefix
pub fn parse_int(token: &str) -> Option<u64> {
    let token = token.trim();
    let (digits, radix) = match token.get(..2) {
        Some("0x") | Some("0X") => (&token[2..], 16),
        Some("0o") | Some("0O") => (&token[2..], 8),
        Some("0b") | Some("0B") => (&token[2..], 2),
        _ => (token, 10),
    };
    if digits.is_empty() || digits.starts_with('+') {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Parse a destination address (decimal or prefixed)
pub fn parse_address(token: &str) -> Result<Address, ModelError> {
    parse_int(token)
        .and_then(|v| Address::try_from(v).ok())
        .ok_or_else(|| ModelError::InvalidArgument(format!("bad destination address {:?}", token)))
}

/// Parse a key index (decimal only)
pub fn parse_key_index(token: &str) -> Result<KeyIndex, ModelError> {
    token
        .parse::<KeyIndex>()
        .map_err(|_| ModelError::InvalidArgument(format!("bad key index {:?}", token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_radix() {
        assert_eq!(parse_int("29537"), Some(29537));
        assert_eq!(parse_int("0x7361"), Some(0x7361));
        assert_eq!(parse_int("0XfBf105"), Some(0xfbf105));
        assert_eq!(parse_int("0b101"), Some(5));
        assert_eq!(parse_int("0o17"), Some(15));
        assert_eq!(parse_int("0x0"), Some(0));
        assert_eq!(parse_int("0"), Some(0));
    }

    #[test]
    fn test_parse_int_rejects_garbage() {
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("0x"), None);
        assert_eq!(parse_int("-1"), None);
        assert_eq!(parse_int("+1"), None);
        assert_eq!(parse_int("0x+1"), None);
        assert_eq!(parse_int("twelve"), None);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0xc123").unwrap(), 0xc123);
        assert_eq!(parse_address("29537").unwrap(), 29537);
        assert!(matches!(
            parse_address("0x10000"),
            Err(ModelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_key_index() {
        assert_eq!(parse_key_index("0").unwrap(), 0);
        assert!(parse_key_index("0x1").is_err());
        assert!(parse_key_index("-2").is_err());
    }
}
