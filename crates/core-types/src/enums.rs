use crate::error::CoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Normalizes a venue-reported side label. Venues report "BOT"/"SLD" on
    /// execution events but "BUY"/"SELL" elsewhere, so both spellings map here.
    pub fn parse(side: &str) -> Result<Self, CoreError> {
        match side.trim().to_ascii_lowercase().as_str() {
            "buy" | "bot" => Ok(OrderSide::Buy),
            "sell" | "sld" => Ok(OrderSide::Sell),
            other => Err(CoreError::InvalidInput(
                "side".to_string(),
                other.to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    /// Accepts the common venue spellings ("MKT"/"LMT" and the long forms).
    pub fn parse(kind: &str) -> Result<Self, CoreError> {
        match kind.trim().to_ascii_uppercase().as_str() {
            "MKT" | "MARKET" => Ok(OrderType::Market),
            "LMT" | "LIMIT" => Ok(OrderType::Limit),
            other => Err(CoreError::InvalidInput(
                "order_type".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// The closed set of account valuation fields mirrored by the cache and the
/// `account_summary` table. Venue valuation events carry a free-form tag;
/// anything that does not map to one of these variants is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryField {
    NetLiquidation,
    TotalCashValue,
    AvailableFunds,
    ExcessLiquidity,
    InitMarginReq,
    MaintMarginReq,
    GrossPositionValue,
    ShortMarketValue,
}

impl SummaryField {
    pub const ALL: [SummaryField; 8] = [
        SummaryField::NetLiquidation,
        SummaryField::TotalCashValue,
        SummaryField::AvailableFunds,
        SummaryField::ExcessLiquidity,
        SummaryField::InitMarginReq,
        SummaryField::MaintMarginReq,
        SummaryField::GrossPositionValue,
        SummaryField::ShortMarketValue,
    ];

    /// Maps a venue valuation tag to its field, or `None` for tags we do not track.
    pub fn from_venue_tag(tag: &str) -> Option<Self> {
        match tag {
            "NetLiquidation" => Some(SummaryField::NetLiquidation),
            "TotalCashValue" => Some(SummaryField::TotalCashValue),
            "AvailableFunds" => Some(SummaryField::AvailableFunds),
            "ExcessLiquidity" => Some(SummaryField::ExcessLiquidity),
            "InitMarginReq" => Some(SummaryField::InitMarginReq),
            "MaintMarginReq" => Some(SummaryField::MaintMarginReq),
            "GrossPositionValue" => Some(SummaryField::GrossPositionValue),
            "ShortMarketValue" => Some(SummaryField::ShortMarketValue),
            _ => None,
        }
    }

    /// The venue tag used when subscribing to account valuation updates.
    pub fn venue_tag(&self) -> &'static str {
        match self {
            SummaryField::NetLiquidation => "NetLiquidation",
            SummaryField::TotalCashValue => "TotalCashValue",
            SummaryField::AvailableFunds => "AvailableFunds",
            SummaryField::ExcessLiquidity => "ExcessLiquidity",
            SummaryField::InitMarginReq => "InitMarginReq",
            SummaryField::MaintMarginReq => "MaintMarginReq",
            SummaryField::GrossPositionValue => "GrossPositionValue",
            SummaryField::ShortMarketValue => "ShortMarketValue",
        }
    }

    /// The `account_summary` column this field persists to.
    pub fn column(&self) -> &'static str {
        match self {
            SummaryField::NetLiquidation => "net_liquidation",
            SummaryField::TotalCashValue => "total_cash_value",
            SummaryField::AvailableFunds => "available_funds",
            SummaryField::ExcessLiquidity => "excess_liquidity",
            SummaryField::InitMarginReq => "init_margin_req",
            SummaryField::MaintMarginReq => "maint_margin_req",
            SummaryField::GrossPositionValue => "gross_position_value",
            SummaryField::ShortMarketValue => "short_market_value",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_venue_side_labels() {
        assert_eq!(OrderSide::parse("BOT").unwrap(), OrderSide::Buy);
        assert_eq!(OrderSide::parse("sld").unwrap(), OrderSide::Sell);
        assert_eq!(OrderSide::parse(" buy ").unwrap(), OrderSide::Buy);
        assert!(OrderSide::parse("hold").is_err());
    }

    #[test]
    fn summary_field_round_trips_through_venue_tag() {
        for field in SummaryField::ALL {
            assert_eq!(SummaryField::from_venue_tag(field.venue_tag()), Some(field));
        }
        assert_eq!(SummaryField::from_venue_tag("Cushion"), None);
    }
}
