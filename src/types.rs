//! Core types shared across the discovery and trading pipeline.

use serde::{Deserialize, Serialize};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// Mint address as carried through the pipeline (base58 string form).
pub type Mint = String;

/// Wrapped SOL mint, the native side of every round trip.
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Decimal exponent of the native asset.
pub const SOL_DECIMALS: u8 = 9;

/// Decimals assumed when the discovery feed omits them.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 9;

/// A token discovered on-chain that may be traded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCandidate {
    /// The mint address of the token
    pub mint: Mint,
    /// Decimal exponent declared by the token
    pub decimals: u8,
}

impl TokenCandidate {
    pub fn new(mint: impl Into<Mint>, decimals: u8) -> Self {
        Self {
            mint: mint.into(),
            decimals,
        }
    }
}

/// Returns true when `mint` parses as a 32-byte base58 address.
pub fn is_valid_mint(mint: &str) -> bool {
    Pubkey::from_str(mint).is_ok()
}

/// Convert raw integer token units to human units.
pub fn to_human_units(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Convert human units to raw integer token units, rounding to the nearest unit.
pub fn to_raw_units(amount: f64, decimals: u8) -> u64 {
    if amount <= 0.0 || !amount.is_finite() {
        return 0;
    }
    (amount * 10f64.powi(decimals as i32)).round() as u64
}

pub fn sol_to_lamports(sol: f64) -> u64 {
    to_raw_units(sol, SOL_DECIMALS)
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(to_human_units(1_000_000_000, 6), 1000.0);
        assert_eq!(to_raw_units(970.0, 6), 970_000_000);
        assert_eq!(sol_to_lamports(0.3), 300_000_000);
        assert!((lamports_to_sol(350_000_000) - 0.35).abs() < 1e-12);
        assert_eq!(to_raw_units(-1.0, 6), 0);
    }

    #[test]
    fn test_mint_validation() {
        assert!(is_valid_mint(SOL_MINT));
        assert!(is_valid_mint(&Pubkey::new_unique().to_string()));
        assert!(!is_valid_mint("not-a-mint"));
        assert!(!is_valid_mint(""));
    }
}
