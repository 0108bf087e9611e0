//! rankflow: a scraping proxy for the twivideo ranking feed.
//!
//! A headless Chromium session, kept warm past the site's bot-detection
//! interstitial, backs an HTTP API that serves ranking listings, session
//! status, and a streaming relay for the media CDN.

pub mod assets;
pub mod browser;
pub mod config;
pub mod listing;
pub mod proxy;
pub mod runtime;
pub mod scripts;
pub mod server;
pub mod session;
