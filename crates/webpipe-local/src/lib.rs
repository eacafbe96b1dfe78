//! Local (reqwest + scraper) implementations of the search/fetch/extract/
//! compare/browser/cart stack defined by `webpipe-core`.

pub mod browser;
pub mod cart;
pub mod compare;
pub mod extract;
pub mod fetch;
pub mod links;
pub mod search;
