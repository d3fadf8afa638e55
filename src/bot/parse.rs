//! Free-text input parsing for transfer and RAM prompts

use regex::Regex;

use crate::error::{Error, Result};

lazy_static::lazy_static! {
    static ref RAM_AMOUNT: Regex = Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(bytes|byte|kb|mb|gb|eos)\s*$")
        .expect("Invalid RAM amount pattern");
}

/// RAM quantity as the user typed it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RamAmount {
    Bytes(u32),
    /// Spend this much EOS on RAM
    Eos(f64),
}

impl RamAmount {
    /// Bytes, converting an EOS amount at `price_per_kb`
    pub fn to_bytes(self, price_per_kb: f64) -> Result<u32> {
        match self {
            RamAmount::Bytes(bytes) => Ok(bytes),
            RamAmount::Eos(eos) => bytes_from_eos(eos, price_per_kb),
        }
    }
}

/// `1024bytes`, `1.2kb`, `1mb`, `2.1gb`, `3.45EOS`
pub fn parse_ram_amount(input: &str) -> Result<RamAmount> {
    let invalid = || Error::InvalidInput("Invalid amount format. Please use bytes, kb, mb, gb, or EOS.".into());
    let caps = RAM_AMOUNT.captures(input).ok_or_else(invalid)?;
    let value: f64 = caps[1].parse().map_err(|_| invalid())?;

    let multiplier = match caps[2].to_ascii_lowercase().as_str() {
        "eos" => {
            if value <= 0.0 {
                return Err(invalid());
            }
            return Ok(RamAmount::Eos(value));
        }
        "bytes" | "byte" => 1.0,
        "kb" => 1024.0,
        "mb" => 1024.0 * 1024.0,
        _ => 1024.0 * 1024.0 * 1024.0,
    };

    let bytes = (value * multiplier).floor();
    if bytes < 1.0 || bytes > u32::MAX as f64 {
        return Err(Error::InvalidInput(format!("RAM amount out of range: {}", input.trim())));
    }
    Ok(RamAmount::Bytes(bytes as u32))
}

/// Bytes that `eos` buys at `price_per_kb`
pub fn bytes_from_eos(eos: f64, price_per_kb: f64) -> Result<u32> {
    if !(price_per_kb > 0.0) || !(eos > 0.0) {
        return Err(Error::InvalidInput("Invalid RAM price or amount".into()));
    }
    let bytes = (eos / price_per_kb * 1024.0).floor();
    if bytes < 1.0 || bytes > u32::MAX as f64 {
        return Err(Error::InvalidInput(format!("{} EOS is out of range", eos)));
    }
    Ok(bytes as u32)
}

fn parse_amount(input: &str) -> Result<f64> {
    let amount: f64 = input
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Invalid amount: {}", input.trim())))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidInput(format!("Invalid amount: {}", input.trim())));
    }
    Ok(amount)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub recipient: String,
    pub amount: f64,
    pub memo: String,
}

/// `recipient,amount[,memo]`; the memo may contain commas, `_` reads as a space
pub fn parse_transfer(input: &str) -> Result<TransferRequest> {
    let mut parts = input.trim().split(',');
    let recipient = parts.next().map(str::trim).unwrap_or_default();
    let amount = parts
        .next()
        .ok_or_else(|| Error::InvalidInput("Please provide the address and amount.".into()))?;
    if recipient.is_empty() {
        return Err(Error::InvalidInput("Please provide the address and amount.".into()));
    }

    let memo = parts.collect::<Vec<_>>().join(",").replace('_', " ");
    Ok(TransferRequest {
        recipient: recipient.to_string(),
        amount: parse_amount(amount)?,
        memo,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RamPurchase {
    pub receiver: String,
    pub amount: RamAmount,
}

/// `receiver,amount` with a unit-suffixed amount
pub fn parse_ram_purchase(input: &str) -> Result<RamPurchase> {
    let (receiver, amount) = input
        .trim()
        .split_once(',')
        .ok_or_else(|| Error::InvalidInput("Please provide the required information.".into()))?;
    Ok(RamPurchase {
        receiver: receiver.trim().to_string(),
        amount: parse_ram_amount(amount)?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RamOrderRequest {
    pub receiver: String,
    pub ram_bytes: u32,
    pub price_per_kb: f64,
}

/// `receiver,amount,price_per_kb`; an EOS amount is converted at the limit price
pub fn parse_ram_order(input: &str) -> Result<RamOrderRequest> {
    let parts: Vec<&str> = input.trim().split(',').map(str::trim).collect();
    let [receiver, amount, price] = parts.as_slice() else {
        return Err(Error::InvalidInput("Please provide the RAM order details.".into()));
    };
    let price_per_kb = parse_amount(price)?;
    let ram_bytes = parse_ram_amount(amount)?.to_bytes(price_per_kb)?;

    Ok(RamOrderRequest {
        receiver: receiver.to_string(),
        ram_bytes,
        price_per_kb,
    })
}
