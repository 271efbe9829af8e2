//! The four indexer variants and the helpers they share.
//!
//! Each variant parses its params into a typed struct at construction,
//! normalizes an event into a list of [`shapes::Normalized`] items without
//! touching the database, and then applies each item in its own transaction.

pub mod description;
pub mod nft;
pub mod nft_bid;
pub mod nft_price;
pub mod shapes;
pub mod sql;
pub mod token_borrow;
pub mod token_price;
pub mod tokens;

pub use nft_bid::NftBidIndexer;
pub use nft_price::NftPriceIndexer;
pub use token_borrow::TokenBorrowIndexer;
pub use token_price::TokenPriceIndexer;
