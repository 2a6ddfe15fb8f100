//! Command-line interface module
//!
//! This module contains the implementations for the CLI subcommands.

pub mod cfg;
pub mod decompile;

/// Parse a method token written in decimal or as `0x`-prefixed hex
pub fn parse_method_id(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid method token '{}': {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens_parse_in_hex_and_decimal() {
        assert_eq!(parse_method_id("0x06000001"), Ok(0x0600_0001));
        assert_eq!(parse_method_id("100663297"), Ok(0x0600_0001));
        assert!(parse_method_id("0xZZ").is_err());
    }
}
