//! Access to the external news API (CryptoPanic `posts` endpoint).

pub mod client;
pub mod throttle;

pub use client::{FetchError, FetchPolicy, NewsClient, NewsQuery};
pub use throttle::{RateLimiter, SendSlot};
