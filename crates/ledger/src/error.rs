use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Fill quantity must be strictly positive, got {0}")]
    NonPositiveQuantity(rust_decimal::Decimal),

    #[error("Fill price must be strictly positive, got {0}")]
    NonPositivePrice(rust_decimal::Decimal),

    #[error("Fill commission must not be negative, got {0}")]
    NegativeCommission(rust_decimal::Decimal),
}
