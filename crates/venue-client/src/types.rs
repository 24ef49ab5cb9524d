use core_types::{OrderSide, OrderType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An instrument as the venue identifies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueContract {
    pub symbol: String,
    /// May be empty when the venue reports the primary listing implicitly.
    pub exchange: String,
    pub currency: String,
    /// The venue's numeric contract id, once qualified.
    pub contract_id: Option<i64>,
}

/// A fully validated order, ready for submission to the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub contract: VenueContract,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    /// Required for limit orders; validated before the ticket is built.
    pub limit_price: Option<Decimal>,
    pub tif: Option<String>,
    pub account: Option<String>,
}

/// The venue's initial acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: i64,
    pub status: String,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Option<Decimal>,
}
