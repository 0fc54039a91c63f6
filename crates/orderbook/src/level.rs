//! Price level representation.

use std::collections::VecDeque;

use model::OrderId;
use rust_decimal::Decimal;

/// A resting order owned by a price level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestingOrder {
    pub order_id: OrderId,
    pub size: Decimal,
}

/// All resting orders at one price, in time priority.
///
/// `total_size` is cached and kept equal to the sum of order sizes by every
/// mutation below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    price: Decimal,
    orders: VecDeque<RestingOrder>,
    total_size: Decimal,
}

impl PriceLevel {
    /// Creates an empty level at `price`.
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
            total_size: Decimal::ZERO,
        }
    }

    /// The price of this level.
    pub fn price(&self) -> Decimal {
        self.price
    }

    /// Aggregate size of all orders at this level.
    pub fn total_size(&self) -> Decimal {
        self.total_size
    }

    /// Number of resting orders.
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders from first to last in time priority.
    pub fn orders(&self) -> impl Iterator<Item = &RestingOrder> + '_ {
        self.orders.iter()
    }

    /// Looks up an order by id.
    pub fn get(&self, order_id: &OrderId) -> Option<&RestingOrder> {
        self.orders.iter().find(|o| &o.order_id == order_id)
    }

    /// Appends an order at the back of the queue.
    pub(crate) fn push_back(&mut self, order_id: OrderId, size: Decimal) {
        self.total_size += size;
        self.orders.push_back(RestingOrder { order_id, size });
    }

    /// Sets the size of an order in place, keeping its queue position.
    ///
    /// A size of zero or below removes the order. Returns the removed order,
    /// if any, or `None` if the order was updated or not found.
    pub(crate) fn set_order_size(
        &mut self,
        order_id: &OrderId,
        new_size: Decimal,
    ) -> Option<RestingOrder> {
        let pos = self.position(order_id)?;
        if new_size <= Decimal::ZERO {
            return self.remove_at(pos);
        }
        let order = &mut self.orders[pos];
        self.total_size = self.total_size - order.size + new_size;
        order.size = new_size;
        None
    }

    /// Removes an order by id.
    pub(crate) fn remove(&mut self, order_id: &OrderId) -> Option<RestingOrder> {
        let pos = self.position(order_id)?;
        self.remove_at(pos)
    }

    fn position(&self, order_id: &OrderId) -> Option<usize> {
        self.orders.iter().position(|o| &o.order_id == order_id)
    }

    fn remove_at(&mut self, pos: usize) -> Option<RestingOrder> {
        let order = self.orders.remove(pos)?;
        self.total_size -= order.size;
        Some(order)
    }
}
