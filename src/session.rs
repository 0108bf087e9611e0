//! Session controller: owns the single scraping session and keeps it past
//! the remote site's bot-detection gate.
//!
//! The challenge bypass is best-effort by design. Navigation timeouts and an
//! unresolved interstitial are logged, not fatal; the controller marks the
//! session ready regardless and lets later fetches succeed or fail on their
//! own. The only hard recovery path is a detected session death, which
//! clears the state so the next use launches a fresh browser.

use std::sync::Mutex as StdMutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::browser::{BrowserSession, SessionError};
use crate::config::{CHALLENGE_POLL, CHALLENGE_SETTLE, CHALLENGE_WAIT};
use crate::listing::{CHALLENGE_MARKER, LISTING_SELECTOR, SortOrder};

/// Session readiness, distinguishing "probably fine" from "verified".
///
/// Both ready variants gate listing requests open; the distinction exists so
/// `/api/status` and tests can tell whether the content check passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Readiness {
    NotReady,
    ReadyUnconfirmed,
    ReadyConfirmed,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        !matches!(self, Readiness::NotReady)
    }
}

/// Snapshot returned by `/api/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub browser_ready: bool,
    pub readiness: Readiness,
    pub has_browser: bool,
    pub has_page: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Holds the session gate open while giving access to the underlying
/// session, serializing all session-mutating work.
pub struct SessionGuard<'controller, S> {
    _gate: MutexGuard<'controller, ()>,
    session: &'controller S,
}

impl<S> std::ops::Deref for SessionGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session
    }
}

/// Owns one [`BrowserSession`] plus its readiness state.
pub struct SessionController<S> {
    session: S,
    readiness: StdMutex<Readiness>,
    last_error: StdMutex<Option<String>>,
    gate: Mutex<()>,
}

impl<S: BrowserSession> SessionController<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            readiness: StdMutex::new(Readiness::NotReady),
            last_error: StdMutex::new(None),
            gate: Mutex::new(()),
        }
    }

    pub fn readiness(&self) -> Readiness {
        *self
            .readiness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_ready(&self) -> bool {
        self.readiness().is_ready()
    }

    fn set_readiness(&self, readiness: Readiness) {
        *self
            .readiness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = readiness;
    }

    fn record_error(&self, err: &SessionError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(err.to_string());
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Acquire exclusive access to the session for navigation or in-context
    /// requests. Concurrent listing requests queue here instead of racing
    /// each other's navigations.
    pub async fn lock_session(&self) -> SessionGuard<'_, S> {
        SessionGuard {
            _gate: self.gate.lock().await,
            session: &self.session,
        }
    }

    /// Launch the browser, ride out the bot challenge, and mark the session
    /// ready. A no-op when the session is already ready.
    pub async fn init(&self) -> Result<(), SessionError> {
        let _gate = self.gate.lock().await;
        if self.readiness().is_ready() {
            return Ok(());
        }

        match self.init_inner().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    async fn init_inner(&self) -> Result<(), SessionError> {
        info!("launching browser session");
        self.session.launch().await?;

        let url = SortOrder::default().ranking_url();
        info!(%url, "navigating to ranking page");
        if let Err(err) = self.session.navigate(url).await {
            // Tolerated: inspect whatever state the page reached.
            warn!(error = %err, "initial navigation did not settle");
        }

        self.wait_out_challenge(url).await?;

        let count = match self.session.count_elements(LISTING_SELECTOR).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "readiness verification failed");
                0
            }
        };

        if count > 0 {
            info!(count, "session ready, listing content verified");
            self.set_readiness(Readiness::ReadyConfirmed);
        } else {
            warn!("no listing elements found, marking session ready unconfirmed");
            self.set_readiness(Readiness::ReadyUnconfirmed);
        }

        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }

    /// Poll the page title until the interstitial clears or the wait
    /// expires; on expiry, re-navigate once and wait a second cycle. An
    /// unresolved challenge is tolerated.
    async fn wait_out_challenge(&self, url: &str) -> Result<(), SessionError> {
        for cycle in 0..2u8 {
            let title = self.session.title().await?;
            if !title.contains(CHALLENGE_MARKER) {
                return Ok(());
            }
            info!(cycle, %title, "interstitial challenge detected, waiting");

            let deadline = Instant::now() + CHALLENGE_WAIT;
            while Instant::now() < deadline {
                sleep(CHALLENGE_POLL).await;
                let title = self.session.title().await?;
                if !title.contains(CHALLENGE_MARKER) {
                    sleep(CHALLENGE_SETTLE).await;
                    info!(%title, "challenge cleared");
                    return Ok(());
                }
            }

            if cycle == 0 {
                warn!("challenge wait expired, re-navigating once");
                if let Err(err) = self.session.navigate(url).await {
                    warn!(error = %err, "re-navigation did not settle");
                }
            }
        }

        warn!("challenge may still be pending, continuing");
        Ok(())
    }

    /// Inspect an automation error and invalidate the session when it
    /// indicates the browser or page died. The next use re-initialises.
    pub async fn handle_session_error(&self, err: &SessionError) {
        self.record_error(err);
        if err.is_session_closed() {
            warn!(error = %err, "session died, invalidating");
            self.invalidate().await;
        }
    }

    /// Clear readiness and drop the browser handle.
    pub async fn invalidate(&self) {
        self.set_readiness(Readiness::NotReady);
        if let Err(err) = self.session.shutdown().await {
            warn!(error = %err, "session shutdown failed during invalidation");
        }
    }

    /// Snapshot for `/api/status`. Page title and listing count are only
    /// queried while the session is ready.
    pub async fn status(&self) -> SessionStatus {
        let readiness = self.readiness();
        let has_browser = self.session.has_browser().await;
        let has_page = self.session.has_page().await;

        let (page_title, video_count) = if readiness.is_ready() && has_page {
            (
                self.session.title().await.ok(),
                self.session.count_elements(LISTING_SELECTOR).await.ok(),
            )
        } else {
            (None, None)
        };

        SessionStatus {
            browser_ready: readiness.is_ready(),
            readiness,
            has_browser,
            has_page,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            page_title,
            video_count,
            error: self.last_error(),
        }
    }

    /// Best-effort close for process shutdown.
    pub async fn shutdown(&self) {
        self.set_readiness(Readiness::NotReady);
        if let Err(err) = self.session.shutdown().await {
            warn!(error = %err, "browser close failed during shutdown");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::browser::{BrowserSession, SessionError};

    /// Scriptable in-memory session used across the controller, listing,
    /// and server tests.
    #[derive(Default)]
    pub(crate) struct FakeSession {
        pub launched: Mutex<bool>,
        pub launch_calls: Mutex<u32>,
        pub launch_error: Mutex<Option<String>>,
        pub navigations: Mutex<Vec<String>>,
        pub navigate_error: Mutex<Option<String>>,
        pub titles: Mutex<VecDeque<String>>,
        pub title_fallback: Mutex<String>,
        pub evaluated: Mutex<Vec<String>>,
        pub eval_results: Mutex<VecDeque<Result<String, String>>>,
        pub element_count: Mutex<u64>,
        pub shutdown_calls: Mutex<u32>,
    }

    impl FakeSession {
        pub(crate) fn ready_page() -> Self {
            let fake = FakeSession::default();
            *fake.title_fallback.lock().unwrap() = "TWIVIDEO ランキング".to_string();
            *fake.element_count.lock().unwrap() = 30;
            fake
        }

        pub(crate) fn push_title(&self, title: &str) {
            self.titles.lock().unwrap().push_back(title.to_string());
        }

        pub(crate) fn push_eval(&self, result: Result<&str, &str>) {
            self.eval_results
                .lock()
                .unwrap()
                .push_back(result.map(str::to_string).map_err(str::to_string));
        }

        pub(crate) fn navigation_count(&self) -> usize {
            self.navigations.lock().unwrap().len()
        }

        pub(crate) fn evaluated_scripts(&self) -> Vec<String> {
            self.evaluated.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn launch(&self) -> Result<(), SessionError> {
            *self.launch_calls.lock().unwrap() += 1;
            if let Some(message) = self.launch_error.lock().unwrap().clone() {
                return Err(SessionError::Browser(message));
            }
            *self.launched.lock().unwrap() = true;
            Ok(())
        }

        async fn navigate(&self, url: &str) -> Result<(), SessionError> {
            if let Some(message) = self.navigate_error.lock().unwrap().clone() {
                return Err(SessionError::Browser(message));
            }
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn title(&self) -> Result<String, SessionError> {
            let mut titles = self.titles.lock().unwrap();
            match titles.pop_front() {
                Some(title) => Ok(title),
                None => Ok(self.title_fallback.lock().unwrap().clone()),
            }
        }

        async fn evaluate(&self, expression: &str) -> Result<String, SessionError> {
            self.evaluated.lock().unwrap().push(expression.to_string());
            match self.eval_results.lock().unwrap().pop_front() {
                Some(Ok(body)) => Ok(body),
                Some(Err(message)) => Err(SessionError::Browser(message)),
                None => Ok("<html><div class=\"art_li\"></div></html>".to_string()),
            }
        }

        async fn count_elements(&self, _selector: &str) -> Result<u64, SessionError> {
            Ok(*self.element_count.lock().unwrap())
        }

        async fn has_browser(&self) -> bool {
            *self.launched.lock().unwrap()
        }

        async fn has_page(&self) -> bool {
            *self.launched.lock().unwrap()
        }

        async fn shutdown(&self) -> Result<(), SessionError> {
            *self.shutdown_calls.lock().unwrap() += 1;
            *self.launched.lock().unwrap() = false;
            Ok(())
        }
    }
}
