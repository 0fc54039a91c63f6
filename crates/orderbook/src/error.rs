//! Order book error types.

use model::OrderId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur during order book mutations.
///
/// None of these leave the book partially mutated: a failing operation
/// returns before touching either the level or the identity index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderBookError {
    /// Insert of an order id that is already resting on this side.
    #[error("duplicate order: {0}")]
    DuplicateOrder(OrderId),

    /// Mutation referenced an order id that is not resting on this side.
    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),

    /// Attempt to grow a resting order in place.
    #[error("size increase on {order_id}: {current} -> {requested}")]
    SizeIncrease {
        order_id: OrderId,
        current: Decimal,
        requested: Decimal,
    },

    /// Size outside the range accepted by the operation.
    #[error("invalid size: {0}")]
    InvalidSize(Decimal),

    /// Non-positive price.
    #[error("invalid price: {0}")]
    InvalidPrice(Decimal),
}
