//! One side of the book, indexed by price and by order id.

use std::collections::{BTreeMap, HashMap};

use model::{OrderId, Side};
use rust_decimal::Decimal;

use crate::error::OrderBookError;
use crate::level::{PriceLevel, RestingOrder};

/// Which side of the book a collection of levels represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookSide {
    /// Buy orders. Best is the highest price.
    Bid,
    /// Sell orders. Best is the lowest price.
    Ask,
}

impl BookSide {
    /// Returns true if `a` has priority over `b` on this side.
    fn is_better(self, a: Decimal, b: Decimal) -> bool {
        match self {
            BookSide::Bid => a > b,
            BookSide::Ask => a < b,
        }
    }
}

impl From<Side> for BookSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => BookSide::Bid,
            Side::Sell => BookSide::Ask,
        }
    }
}

/// Aggregated view of a single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSummary {
    pub price: Decimal,
    pub size: Decimal,
    pub order_count: usize,
}

impl From<&PriceLevel> for LevelSummary {
    fn from(level: &PriceLevel) -> Self {
        Self {
            price: level.price(),
            size: level.total_size(),
            order_count: level.order_count(),
        }
    }
}

/// Price-ordered levels for one side plus an order-id index.
///
/// The `BTreeMap` owns every resting order. `index` maps an order id to the
/// price key of the level holding it and never points into the level itself.
/// Every mutation updates both maps before returning, level first.
///
/// Levels are stored in ascending price order for both sides; iteration
/// helpers reverse the bid side so callers always see best price first.
#[derive(Debug, Clone)]
pub struct OrderBookSide {
    side: BookSide,
    levels: BTreeMap<Decimal, PriceLevel>,
    index: HashMap<OrderId, Decimal>,
    /// Cached key of the best level, maintained incrementally.
    best: Option<Decimal>,
}

impl OrderBookSide {
    /// Creates an empty side.
    pub fn new(side: BookSide) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            index: HashMap::new(),
            best: None,
        }
    }

    /// Adds an order at the back of the queue at `price`.
    pub fn insert(
        &mut self,
        order_id: OrderId,
        size: Decimal,
        price: Decimal,
    ) -> Result<(), OrderBookError> {
        if size <= Decimal::ZERO {
            return Err(OrderBookError::InvalidSize(size));
        }
        if price <= Decimal::ZERO {
            return Err(OrderBookError::InvalidPrice(price));
        }
        if self.index.contains_key(&order_id) {
            return Err(OrderBookError::DuplicateOrder(order_id));
        }

        self.levels
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price))
            .push_back(order_id.clone(), size);
        self.index.insert(order_id, price);

        match self.best {
            Some(best) if !self.side.is_better(price, best) => {}
            _ => self.best = Some(price),
        }
        Ok(())
    }

    /// Decrements an order's size by `amount`, removing it if nothing is left.
    ///
    /// Returns the remaining size (zero if the order was removed).
    pub fn reduce(&mut self, order_id: &OrderId, amount: Decimal) -> Result<Decimal, OrderBookError> {
        if amount <= Decimal::ZERO {
            return Err(OrderBookError::InvalidSize(amount));
        }
        let current = self.size_of(order_id)?;
        let remaining = current - amount;
        self.resize(order_id, remaining);
        Ok(remaining.max(Decimal::ZERO))
    }

    /// Sets an order's remaining size. Only reductions are accepted.
    ///
    /// A `new_size` of zero removes the order.
    pub fn set_size(&mut self, order_id: &OrderId, new_size: Decimal) -> Result<(), OrderBookError> {
        if new_size < Decimal::ZERO {
            return Err(OrderBookError::InvalidSize(new_size));
        }
        let current = self.size_of(order_id)?;
        if new_size > current {
            return Err(OrderBookError::SizeIncrease {
                order_id: order_id.clone(),
                current,
                requested: new_size,
            });
        }
        self.resize(order_id, new_size);
        Ok(())
    }

    /// Removes an order regardless of its size or queue position.
    pub fn remove(&mut self, order_id: &OrderId) -> Result<RestingOrder, OrderBookError> {
        let price = self.price_of(order_id)?;
        let removed = self
            .levels
            .get_mut(&price)
            .and_then(|level| level.remove(order_id))
            .ok_or_else(|| OrderBookError::UnknownOrder(order_id.clone()))?;
        self.index.remove(order_id);
        self.drop_level_if_empty(price);
        Ok(removed)
    }

    /// Best level on this side, if any.
    pub fn best(&self) -> Option<&PriceLevel> {
        self.best.and_then(|price| self.levels.get(&price))
    }

    /// Best price on this side, if any.
    pub fn best_price(&self) -> Option<Decimal> {
        self.best
    }

    /// Looks up a resting order by id.
    pub fn get(&self, order_id: &OrderId) -> Option<&RestingOrder> {
        let price = self.index.get(order_id)?;
        self.levels.get(price)?.get(order_id)
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.index.contains_key(order_id)
    }

    /// The level at exactly `price`.
    pub fn level(&self, price: Decimal) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    /// Aggregate size resting at exactly `price`.
    pub fn size_at(&self, price: Decimal) -> Decimal {
        self.levels
            .get(&price)
            .map(PriceLevel::total_size)
            .unwrap_or(Decimal::ZERO)
    }

    /// Cumulative size from the best price through `price` inclusive.
    ///
    /// For bids that is every level at or above `price`; for asks every
    /// level at or below it.
    pub fn depth_through(&self, price: Decimal) -> Decimal {
        match self.side {
            BookSide::Bid => self.levels.range(price..).map(|(_, l)| l.total_size()).sum(),
            BookSide::Ask => self.levels.range(..=price).map(|(_, l)| l.total_size()).sum(),
        }
    }

    /// Iterates levels from best to worst price.
    pub fn levels(&self) -> impl Iterator<Item = &PriceLevel> + '_ {
        let (ascending, descending) = match self.side {
            BookSide::Ask => (Some(self.levels.values()), None),
            BookSide::Bid => (None, Some(self.levels.values().rev())),
        };
        ascending
            .into_iter()
            .flatten()
            .chain(descending.into_iter().flatten())
    }

    /// Returns the top `n` levels, best first.
    pub fn top_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.levels().take(n).map(LevelSummary::from).collect()
    }

    /// Number of distinct price levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Number of resting orders.
    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Checks that the level map and the id index agree, that no empty level
    /// is retained and that the cached best key is the true extreme.
    pub fn is_consistent(&self) -> bool {
        let mut resting = 0;
        for (price, level) in &self.levels {
            if level.is_empty() || level.price() != *price {
                return false;
            }
            let sum: Decimal = level.orders().map(|o| o.size).sum();
            if sum != level.total_size() {
                return false;
            }
            for order in level.orders() {
                if self.index.get(&order.order_id) != Some(price) {
                    return false;
                }
                resting += 1;
            }
        }
        resting == self.index.len() && self.best == self.extreme()
    }

    fn price_of(&self, order_id: &OrderId) -> Result<Decimal, OrderBookError> {
        self.index
            .get(order_id)
            .copied()
            .ok_or_else(|| OrderBookError::UnknownOrder(order_id.clone()))
    }

    fn size_of(&self, order_id: &OrderId) -> Result<Decimal, OrderBookError> {
        self.get(order_id)
            .map(|o| o.size)
            .ok_or_else(|| OrderBookError::UnknownOrder(order_id.clone()))
    }

    /// Applies a new size to a known order, removing it when exhausted.
    fn resize(&mut self, order_id: &OrderId, new_size: Decimal) {
        let Some(price) = self.index.get(order_id).copied() else {
            return;
        };
        let removed = self
            .levels
            .get_mut(&price)
            .and_then(|level| level.set_order_size(order_id, new_size));
        if removed.is_some() {
            self.index.remove(order_id);
            self.drop_level_if_empty(price);
        }
    }

    fn drop_level_if_empty(&mut self, price: Decimal) {
        if self.levels.get(&price).is_some_and(PriceLevel::is_empty) {
            self.levels.remove(&price);
            if self.best == Some(price) {
                self.best = self.extreme();
            }
        }
    }

    fn extreme(&self) -> Option<Decimal> {
        match self.side {
            BookSide::Bid => self.levels.keys().next_back().copied(),
            BookSide::Ask => self.levels.keys().next().copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;

    fn id(s: &str) -> OrderId {
        OrderId::from(s)
    }

    fn queue(side: &OrderBookSide, price: Decimal) -> Vec<String> {
        side.level(price)
            .map(|l| l.orders().map(|o| o.order_id.to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_empty_side() {
        let bids = OrderBookSide::new(BookSide::Bid);
        assert!(bids.best().is_none());
        assert!(bids.best_price().is_none());
        assert!(bids.is_empty());
        assert!(bids.is_consistent());
    }

    #[test]
    fn test_bid_best_is_max() {
        let mut bids = OrderBookSide::new(BookSide::Bid);
        bids.insert(id("a"), dec!(1), dec!(99)).unwrap();
        bids.insert(id("b"), dec!(1), dec!(101)).unwrap();
        bids.insert(id("c"), dec!(1), dec!(100)).unwrap();

        assert_eq!(bids.best_price(), Some(dec!(101)));
        let prices: Vec<_> = bids.levels().map(|l| l.price()).collect();
        assert_eq!(prices, vec![dec!(101), dec!(100), dec!(99)]);
    }

    #[test]
    fn test_ask_best_is_min() {
        let mut asks = OrderBookSide::new(BookSide::Ask);
        asks.insert(id("a"), dec!(1), dec!(102)).unwrap();
        asks.insert(id("b"), dec!(1), dec!(101)).unwrap();
        asks.insert(id("c"), dec!(1), dec!(103)).unwrap();

        assert_eq!(asks.best_price(), Some(dec!(101)));
        let top = asks.top_levels(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].price, dec!(101));
        assert_eq!(top[1].price, dec!(102));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut bids = OrderBookSide::new(BookSide::Bid);
        bids.insert(id("a"), dec!(2), dec!(100)).unwrap();

        let err = bids.insert(id("a"), dec!(5), dec!(101)).unwrap_err();
        assert_eq!(err, OrderBookError::DuplicateOrder(id("a")));

        // Existing order untouched
        assert_eq!(bids.get(&id("a")).unwrap().size, dec!(2));
        assert!(bids.level(dec!(101)).is_none());
        assert!(bids.is_consistent());
    }

    #[test]
    fn test_insert_rejects_non_positive() {
        let mut asks = OrderBookSide::new(BookSide::Ask);
        assert!(matches!(
            asks.insert(id("a"), dec!(0), dec!(100)),
            Err(OrderBookError::InvalidSize(_))
        ));
        assert!(matches!(
            asks.insert(id("a"), dec!(1), dec!(-1)),
            Err(OrderBookError::InvalidPrice(_))
        ));
        assert!(asks.is_empty());
    }

    #[test]
    fn test_reduce_partial_and_full() {
        let mut bids = OrderBookSide::new(BookSide::Bid);
        bids.insert(id("a"), dec!(5), dec!(100)).unwrap();

        assert_eq!(bids.reduce(&id("a"), dec!(2)).unwrap(), dec!(3));
        assert_eq!(bids.size_at(dec!(100)), dec!(3));

        assert_eq!(bids.reduce(&id("a"), dec!(4)).unwrap(), dec!(0));
        assert!(!bids.contains(&id("a")));
        assert!(bids.level(dec!(100)).is_none());
        assert!(bids.best().is_none());
        assert!(bids.is_consistent());
    }

    #[test]
    fn test_reduce_unknown_and_invalid() {
        let mut bids = OrderBookSide::new(BookSide::Bid);
        bids.insert(id("a"), dec!(5), dec!(100)).unwrap();

        assert_eq!(
            bids.reduce(&id("zz"), dec!(1)).unwrap_err(),
            OrderBookError::UnknownOrder(id("zz"))
        );
        assert!(matches!(
            bids.reduce(&id("a"), dec!(0)),
            Err(OrderBookError::InvalidSize(_))
        ));
        assert_eq!(bids.get(&id("a")).unwrap().size, dec!(5));
    }

    #[test]
    fn test_set_size_preserves_time_priority() {
        let mut asks = OrderBookSide::new(BookSide::Ask);
        asks.insert(id("a"), dec!(5), dec!(100)).unwrap();
        asks.insert(id("b"), dec!(5), dec!(100)).unwrap();

        asks.set_size(&id("a"), dec!(1)).unwrap();

        assert_eq!(queue(&asks, dec!(100)), vec!["a", "b"]);
        assert_eq!(asks.size_at(dec!(100)), dec!(6));
    }

    #[test]
    fn test_set_size_rejects_increase() {
        let mut asks = OrderBookSide::new(BookSide::Ask);
        asks.insert(id("a"), dec!(5), dec!(100)).unwrap();

        let err = asks.set_size(&id("a"), dec!(6)).unwrap_err();
        assert_eq!(
            err,
            OrderBookError::SizeIncrease {
                order_id: id("a"),
                current: dec!(5),
                requested: dec!(6),
            }
        );
        assert_eq!(asks.get(&id("a")).unwrap().size, dec!(5));
    }

    #[test]
    fn test_set_size_zero_removes() {
        let mut asks = OrderBookSide::new(BookSide::Ask);
        asks.insert(id("a"), dec!(5), dec!(100)).unwrap();
        asks.insert(id("b"), dec!(5), dec!(101)).unwrap();

        asks.set_size(&id("a"), dec!(0)).unwrap();

        assert!(!asks.contains(&id("a")));
        assert_eq!(asks.best_price(), Some(dec!(101)));
        assert!(asks.is_consistent());
    }

    #[test]
    fn test_remove_by_identity_not_head() {
        let mut bids = OrderBookSide::new(BookSide::Bid);
        bids.insert(id("a"), dec!(1), dec!(100)).unwrap();
        bids.insert(id("b"), dec!(2), dec!(100)).unwrap();
        bids.insert(id("c"), dec!(3), dec!(100)).unwrap();

        let removed = bids.remove(&id("b")).unwrap();
        assert_eq!(removed.size, dec!(2));
        assert_eq!(queue(&bids, dec!(100)), vec!["a", "c"]);

        assert_eq!(
            bids.remove(&id("b")).unwrap_err(),
            OrderBookError::UnknownOrder(id("b"))
        );
    }

    #[test]
    fn test_best_moves_when_best_level_empties() {
        let mut bids = OrderBookSide::new(BookSide::Bid);
        bids.insert(id("a"), dec!(1), dec!(100)).unwrap();
        bids.insert(id("b"), dec!(1), dec!(99)).unwrap();
        bids.insert(id("c"), dec!(1), dec!(98)).unwrap();

        bids.remove(&id("a")).unwrap();
        assert_eq!(bids.best_price(), Some(dec!(99)));

        // Removing a non-best level leaves best alone
        bids.remove(&id("c")).unwrap();
        assert_eq!(bids.best_price(), Some(dec!(99)));
    }

    #[test]
    fn test_depth_through() {
        let mut bids = OrderBookSide::new(BookSide::Bid);
        bids.insert(id("a"), dec!(1), dec!(100)).unwrap();
        bids.insert(id("b"), dec!(2), dec!(99)).unwrap();
        bids.insert(id("c"), dec!(3), dec!(98)).unwrap();
        assert_eq!(bids.depth_through(dec!(99)), dec!(3));

        let mut asks = OrderBookSide::new(BookSide::Ask);
        asks.insert(id("d"), dec!(1), dec!(101)).unwrap();
        asks.insert(id("e"), dec!(2), dec!(102)).unwrap();
        asks.insert(id("f"), dec!(3), dec!(103)).unwrap();
        assert_eq!(asks.depth_through(dec!(102)), dec!(3));
    }

    #[test]
    fn test_high_precision_prices_stay_distinct() {
        let mut asks = OrderBookSide::new(BookSide::Ask);
        asks.insert(id("a"), dec!(1), dec!(100.1234567890123456789)).unwrap();
        asks.insert(id("b"), dec!(1), dec!(100.1234567890123456790)).unwrap();

        assert_eq!(asks.level_count(), 2);
        assert_eq!(asks.best_price(), Some(dec!(100.1234567890123456789)));
    }

    /// Random mix of mutations; the side must stay consistent and its best
    /// price must always be the true extreme.
    #[test]
    fn test_random_mutations_keep_invariants() {
        for (seed, book_side) in [(1u64, BookSide::Bid), (2, BookSide::Ask), (3, BookSide::Bid)] {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut side = OrderBookSide::new(book_side);
            let mut live: Vec<OrderId> = Vec::new();
            let mut next_id = 0u32;

            for _ in 0..2_000 {
                match rng.gen_range(0..5) {
                    0 | 1 => {
                        let oid = OrderId::new(format!("o{next_id}"));
                        next_id += 1;
                        let price = Decimal::from(rng.gen_range(90..110));
                        let size = Decimal::from(rng.gen_range(1..10));
                        side.insert(oid.clone(), size, price).unwrap();
                        live.push(oid);
                    }
                    2 if !live.is_empty() => {
                        let i = rng.gen_range(0..live.len());
                        let amount = Decimal::from(rng.gen_range(1..6));
                        if side.reduce(&live[i], amount).unwrap().is_zero() {
                            live.swap_remove(i);
                        }
                    }
                    3 if !live.is_empty() => {
                        let i = rng.gen_range(0..live.len());
                        let current = side.get(&live[i]).unwrap().size;
                        let new_size = current - Decimal::from(rng.gen_range(0..3)).min(current);
                        side.set_size(&live[i], new_size).unwrap();
                        if new_size.is_zero() {
                            live.swap_remove(i);
                        }
                    }
                    4 if !live.is_empty() => {
                        let oid = live.swap_remove(rng.gen_range(0..live.len()));
                        side.remove(&oid).unwrap();
                    }
                    _ => {}
                }

                assert!(side.is_consistent());
                assert_eq!(side.order_count(), live.len());
                let expected_best = match book_side {
                    BookSide::Bid => side.levels.keys().max().copied(),
                    BookSide::Ask => side.levels.keys().min().copied(),
                };
                assert_eq!(side.best_price(), expected_best);
            }
        }
    }
}
