//! Fixed-precision token quantities

use std::fmt;

use crate::error::{Error, Result};

/// Precision of the system token
pub const EOS_PRECISION: u8 = 4;
pub const EOS_SYMBOL: &str = "EOS";

/// Symbol code with precision, packed the way the chain stores it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    precision: u8,
    code: u64,
}

impl Symbol {
    pub fn new(precision: u8, code: &str) -> Result<Self> {
        if code.is_empty() || code.len() > 7 || !code.bytes().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::InvalidInput(format!("Invalid symbol code: {}", code)));
        }
        let mut packed = 0u64;
        for (i, c) in code.bytes().enumerate() {
            packed |= (c as u64) << (8 * i);
        }
        Ok(Self { precision, code: packed })
    }

    pub fn eos() -> Self {
        Self {
            precision: EOS_PRECISION,
            code: (b'E' as u64) | ((b'O' as u64) << 8) | ((b'S' as u64) << 16),
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Wire value: precision in the low byte, code above it
    pub fn raw(&self) -> u64 {
        (self.code << 8) | self.precision as u64
    }

    pub fn code(&self) -> String {
        let mut out = String::new();
        let mut tmp = self.code;
        while tmp > 0 {
            out.push((tmp & 0xff) as u8 as char);
            tmp >>= 8;
        }
        out
    }
}

/// Quantity of a token in its smallest unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl Asset {
    /// Round a decimal EOS amount to four places
    pub fn eos(amount: f64) -> Result<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(Error::InvalidInput(format!("Invalid amount: {}", amount)));
        }
        let units = (amount * 10f64.powi(EOS_PRECISION as i32)).round();
        if units > i64::MAX as f64 {
            return Err(Error::InvalidInput(format!("Amount too large: {}", amount)));
        }
        Ok(Self {
            amount: units as i64,
            symbol: Symbol::eos(),
        })
    }

    pub fn from_units(amount: i64, symbol: Symbol) -> Self {
        Self { amount, symbol }
    }

    /// Parse `"12.3456 EOS"` or `"123456 RAM"`
    pub fn parse(s: &str) -> Result<Self> {
        let (qty, code) = s
            .trim()
            .split_once(' ')
            .ok_or_else(|| Error::InvalidInput(format!("Invalid asset: {}", s)))?;

        let negative = qty.starts_with('-');
        let digits = qty.trim_start_matches('-');
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

        if int_part.is_empty() || !int_part.bytes().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidInput(format!("Invalid asset amount: {}", s)));
        }
        if !frac_part.bytes().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidInput(format!("Invalid asset amount: {}", s)));
        }

        let precision = frac_part.len() as u8;
        let symbol = Symbol::new(precision, code.trim())?;
        let amount: i64 = format!("{}{}", int_part, frac_part)
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Asset amount out of range: {}", s)))?;

        Ok(Self {
            amount: if negative { -amount } else { amount },
            symbol,
        })
    }

    pub fn to_f64(&self) -> f64 {
        self.amount as f64 / 10f64.powi(self.symbol.precision as i32)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = self.symbol.precision as u32;
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        if precision == 0 {
            return write!(f, "{}{} {}", sign, abs, self.symbol.code());
        }
        let scale = 10u64.pow(precision);
        write!(
            f,
            "{}{}.{:0width$} {}",
            sign,
            abs / scale,
            abs % scale,
            self.symbol.code(),
            width = precision as usize
        )
    }
}

/// Format an EOS amount with exactly four decimals, e.g. `"1.5000 EOS"`
pub fn format_eos(amount: f64) -> Result<String> {
    Ok(Asset::eos(amount)?.to_string())
}
