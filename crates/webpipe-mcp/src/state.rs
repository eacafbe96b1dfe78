//! Process-wide context passed explicitly into every handler invocation,
//! per the "small and explicit" process-wide state design.

use std::sync::Arc;
use webpipe_core::{BrowserDriver, PageFetcher, SearchProvider};
use webpipe_local::browser::PlaywrightBrowserDriver;
use webpipe_local::cart::Cart;
use webpipe_local::fetch::HttpPageFetcher;
use webpipe_local::search::SearchFallbackEngine;

use crate::session::SessionManager;

pub struct AppState {
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub browser: Arc<dyn BrowserDriver>,
    pub cart: Arc<Cart>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            search: Arc::new(SearchFallbackEngine::new()),
            fetcher: Arc::new(HttpPageFetcher::new()),
            browser: Arc::new(PlaywrightBrowserDriver::new()),
            cart: Arc::new(Cart::new()),
            sessions: Arc::new(SessionManager::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
