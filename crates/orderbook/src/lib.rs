//! Level-3 order book for a single instrument.
//!
//! Each side keeps its resting orders in a `BTreeMap` of price levels (time
//! priority within a level) plus a hash index from order id to price, so
//! best-price access and lookups by order id are both cheap.
//!
//! # Example
//!
//! ```rust
//! use model::{OrderId, Side};
//! use orderbook::Book;
//! use rust_decimal_macros::dec;
//!
//! let mut book = Book::new();
//! book.side_mut(Side::Buy)
//!     .insert(OrderId::from("o1"), dec!(5), dec!(100))
//!     .unwrap();
//! book.side_mut(Side::Buy).reduce(&OrderId::from("o1"), dec!(2)).unwrap();
//!
//! assert_eq!(book.best_bid().unwrap().size, dec!(3));
//! ```

mod book;
mod error;
mod level;
mod side;

pub use book::{create_shared_book, Book, BookSummary, SharedBook, Trade, TRADE_LOG_CAPACITY};
pub use error::OrderBookError;
pub use level::{PriceLevel, RestingOrder};
pub use side::{BookSide, LevelSummary, OrderBookSide};
