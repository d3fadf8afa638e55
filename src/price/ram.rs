//! RAM market price from the system `rammarket` table

use serde::Deserialize;

use crate::chain::rpc::{ChainRpc, TableRowsRequest};
use crate::chain::Asset;
use crate::error::{Error, Result};

/// Fixed-point precision of the computed price
pub const RAM_PRICE_DECIMALS: u32 = 8;

const BYTES_PER_KB: i128 = 1024;

#[derive(Debug, Deserialize)]
struct Connector {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct RamMarketRow {
    base: Connector,
    quote: Connector,
}

fn pow10(exp: u32) -> i128 {
    10i128.pow(exp)
}

/// EOS per KB from a `rammarket` row: `quote * 1024 / base`, in fixed point
pub fn ram_price_per_kb(row: &serde_json::Value) -> Result<f64> {
    let market: RamMarketRow = serde_json::from_value(row.clone())?;
    let base = Asset::parse(&market.base.balance)?;
    let quote = Asset::parse(&market.quote.balance)?;

    if base.amount <= 0 {
        return Err(Error::PriceFeed("RAM market has no base balance".into()));
    }

    let numerator = quote.amount as i128
        * BYTES_PER_KB
        * pow10(RAM_PRICE_DECIMALS + base.symbol.precision() as u32);
    let denominator = base.amount as i128 * pow10(quote.symbol.precision() as u32);
    let fixed = numerator / denominator;

    Ok(fixed as f64 / pow10(RAM_PRICE_DECIMALS) as f64)
}

pub async fn fetch_ram_price(rpc: &dyn ChainRpc) -> Result<f64> {
    let rows = rpc
        .get_table_rows(&TableRowsRequest {
            code: "eosio".into(),
            scope: "eosio".into(),
            table: "rammarket".into(),
            limit: 1,
            json: true,
        })
        .await?;

    let row = rows
        .rows
        .first()
        .ok_or_else(|| Error::PriceFeed("rammarket table is empty".into()))?;
    ram_price_per_kb(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn market(base: &str, quote: &str) -> serde_json::Value {
        json!({
            "supply": "10000000000.0000 RAMCORE",
            "base": {"balance": base, "weight": "0.50000000000000000"},
            "quote": {"balance": quote, "weight": "0.50000000000000000"}
        })
    }

    #[test]
    fn test_price_per_kb() {
        let price = ram_price_per_kb(&market("1000000 RAM", "20.0000 EOS")).unwrap();
        assert_eq!(price, 0.02048);
    }

    #[test]
    fn test_price_truncates_to_fixed_point() {
        // 1 EOS over 3 bytes: 341.33333333... per KB
        let price = ram_price_per_kb(&market("3 RAM", "1.0000 EOS")).unwrap();
        assert_eq!(price, 341.33333333);
    }

    #[test]
    fn test_empty_market_rejected() {
        assert!(ram_price_per_kb(&market("0 RAM", "1.0000 EOS")).is_err());
        assert!(ram_price_per_kb(&json!({"base": {}})).is_err());
    }
}
