use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha3::{Digest, Keccak256};

use crate::core::errors::VaultError;

static ETH_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("Hardcoded regex should always compile")
});

static EXPIRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0[1-9]|1[0-2])/(\d{2}|\d{4})$").expect("Hardcoded regex should always compile")
});

static CVV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{3,4}$").expect("Hardcoded regex should always compile"));

/// Validates an Ethereum address.
pub fn validate_ethereum_address(address: &str) -> Result<(), VaultError> {
    if !ETH_ADDRESS_RE.is_match(address) {
        return Err(VaultError::InvalidAddress("Invalid Ethereum address format".to_string()));
    }
    // EIP-55: if mixed-case, enforce checksum. All-lower or all-upper acceptable.
    let body = &address[2..];
    let is_all_lower = body.chars().all(|c| !c.is_ascii_uppercase());
    let is_all_upper = body.chars().all(|c| !c.is_ascii_lowercase());
    if is_all_lower || is_all_upper {
        return Ok(());
    }
    if !is_eip55_checksum_valid(address) {
        return Err(VaultError::InvalidAddress(
            "Invalid EIP-55 checksum for Ethereum address".to_string(),
        ));
    }
    Ok(())
}

fn is_eip55_checksum_valid(addr: &str) -> bool {
    let body = &addr[2..];
    let lower = body.to_lowercase();
    let mut keccak = Keccak256::new();
    keccak.update(lower.as_bytes());
    let hash = keccak.finalize();
    for (i, ch) in body.chars().enumerate() {
        let nibble = (hash[i / 2] >> (4 * (1 - (i % 2)))) & 0x0f;
        match ch {
            'a'..='f' => {
                if nibble >= 8 {
                    return false;
                }
            }
            'A'..='F' => {
                if nibble < 8 {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

/// Validates a Solana address (base58, 32 decoded bytes).
pub fn validate_solana_address(address: &str) -> Result<(), VaultError> {
    if address.len() < 32 || address.len() > 44 {
        return Err(VaultError::InvalidAddress("Invalid base58 address length".to_string()));
    }
    match bs58::decode(address).into_vec() {
        Ok(decoded) if decoded.len() == 32 => Ok(()),
        Ok(_) => {
            Err(VaultError::InvalidAddress("Invalid base58 address decoded length".to_string()))
        }
        Err(_) => Err(VaultError::InvalidAddress("Invalid base58 address encoding".to_string())),
    }
}

/// Validates an address against its chain-specific pattern.
pub fn validate_address(address: &str, chain: &str) -> Result<(), VaultError> {
    match chain {
        "ethereum" | "polygon" | "bsc" => validate_ethereum_address(address),
        "solana" => validate_solana_address(address),
        other => Err(VaultError::UnsupportedChain(other.to_string())),
    }
}

/// Validates a card number via the Luhn checksum.
pub fn validate_card_number(card_number: &str) -> Result<(), VaultError> {
    let digits: Vec<u32> = card_number
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(10).ok_or(()))
        .collect::<Result<_, _>>()
        .map_err(|_| VaultError::InvalidCardData("Card number must be numeric".to_string()))?;

    if digits.len() < 12 || digits.len() > 19 {
        return Err(VaultError::InvalidCardData("Card number length out of range".to_string()));
    }

    let mut sum = 0u32;
    for (i, digit) in digits.iter().rev().enumerate() {
        let mut d = *digit;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    if sum % 10 != 0 {
        return Err(VaultError::InvalidCardData("Card number failed checksum".to_string()));
    }
    Ok(())
}

/// Validates an `MM/YY` or `MM/YYYY` expiry; the card must not be expired.
pub fn validate_expiry(expiry: &str) -> Result<(), VaultError> {
    let caps = EXPIRY_RE
        .captures(expiry)
        .ok_or_else(|| VaultError::InvalidCardData("Expiry must be MM/YY or MM/YYYY".to_string()))?;
    let month: u32 = caps[1].parse().expect("regex guarantees digits");
    let year_raw: i32 = caps[2].parse().expect("regex guarantees digits");
    let year = if year_raw < 100 { 2000 + year_raw } else { year_raw };

    let now = Utc::now();
    let (cur_year, cur_month) = (now.year(), now.month());
    if year < cur_year || (year == cur_year && month < cur_month) {
        return Err(VaultError::InvalidCardData("Card is expired".to_string()));
    }
    Ok(())
}

/// Validates a 3-4 digit CVV.
pub fn validate_cvv(cvv: &str) -> Result<(), VaultError> {
    if !CVV_RE.is_match(cvv) {
        return Err(VaultError::InvalidCardData("CVV must be 3-4 digits".to_string()));
    }
    Ok(())
}
