//! Browser session primitives.
//!
//! This module defines the [`BrowserSession`] seam that the session
//! controller and listing adapter drive, plus the launch planning that turns
//! [`Settings`](crate::config::Settings) into a concrete Chrome launch. The
//! chromiumoxide-backed implementation lives in [`crate::runtime`]; tests use
//! fake sessions behind the same trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Settings;

/// Realistic desktop user-agent presented by both the automated browser and
/// the media proxy's upstream requests.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Chrome flags for running inside containers without a GPU.
pub const DEFAULT_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-blink-features=AutomationControlled",
];

/// Viewport presented to the remote site.
pub const VIEWPORT: (u32, u32) = (1280, 800);

/// Errors surfaced by browser session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no Chrome/Chromium executable found; set RANKFLOW_CHROME_BIN")]
    NoExecutable,
    #[error("browser session not launched")]
    NotLaunched,
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("browser error: {0}")]
    Browser(String),
}

impl SessionError {
    /// Whether the error indicates the underlying browser or page died.
    /// These are the only errors that force a full session re-initialisation.
    pub fn is_session_closed(&self) -> bool {
        let message = self.to_string();
        message.contains("Session closed")
            || message.contains("Target closed")
            || message.contains("Browser closed")
            || matches!(self, SessionError::NotLaunched)
    }
}

/// One live browser process plus the single page used for scraping.
///
/// All methods take `&self`; implementations own their state behind internal
/// synchronisation so the controller can share the session across handlers.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Launch the browser and open the scraping page. Idempotent: a live
    /// session is left untouched.
    async fn launch(&self) -> Result<(), SessionError>;

    /// Navigate the scraping page and wait for the load to settle.
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Current document title.
    async fn title(&self) -> Result<String, SessionError>;

    /// Evaluate a script in the page, awaiting promises, returning the
    /// string result.
    async fn evaluate(&self, expression: &str) -> Result<String, SessionError>;

    /// Count elements matching a CSS selector on the current page.
    async fn count_elements(&self, selector: &str) -> Result<u64, SessionError>;

    /// Whether a browser process is currently owned.
    async fn has_browser(&self) -> bool;

    /// Whether the scraping page is currently open.
    async fn has_page(&self) -> bool;

    /// Close the browser, releasing the process. Safe to call when nothing
    /// is running.
    async fn shutdown(&self) -> Result<(), SessionError>;
}

/// Concrete launch parameters derived from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub executable: PathBuf,
    pub headless: bool,
    pub viewport: (u32, u32),
    pub args: Vec<String>,
    pub user_agent: String,
}

impl LaunchPlan {
    /// Resolve a launch plan, falling back to a search of common Chrome
    /// install locations when no executable is configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, SessionError> {
        let executable = settings
            .chrome_executable
            .clone()
            .or_else(find_chrome_executable)
            .ok_or(SessionError::NoExecutable)?;

        Ok(LaunchPlan {
            executable,
            headless: settings.headless,
            viewport: VIEWPORT,
            args: DEFAULT_ARGS.iter().map(|arg| arg.to_string()).collect(),
            user_agent: USER_AGENT.to_string(),
        })
    }
}

#[cfg(target_os = "linux")]
const CHROME_CANDIDATES: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

#[cfg(target_os = "macos")]
const CHROME_CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(target_os = "windows")]
const CHROME_CANDIDATES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const CHROME_CANDIDATES: &[&str] = &[];

/// Search the platform's common install locations for a usable browser.
pub fn find_chrome_executable() -> Option<PathBuf> {
    CHROME_CANDIDATES
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_executable_wins_over_discovery() {
        let settings = Settings {
            chrome_executable: Some(PathBuf::from("/opt/chrome/chrome")),
            headless: false,
            ..Settings::default()
        };

        let plan = LaunchPlan::from_settings(&settings).expect("plan");
        assert_eq!(plan.executable, PathBuf::from("/opt/chrome/chrome"));
        assert!(!plan.headless);
        assert_eq!(plan.viewport, VIEWPORT);
        assert!(
            plan.args
                .iter()
                .any(|arg| arg == "--disable-blink-features=AutomationControlled")
        );
    }

    #[test]
    fn session_closed_detection_matches_known_substrings() {
        assert!(SessionError::Browser("Protocol error: Session closed".into()).is_session_closed());
        assert!(SessionError::Browser("Target closed before reply".into()).is_session_closed());
        assert!(SessionError::NotLaunched.is_session_closed());
        assert!(!SessionError::Browser("evaluation threw".into()).is_session_closed());
        assert!(
            !SessionError::Navigation {
                url: "https://example.com".into(),
                reason: "timed out".into(),
            }
            .is_session_closed()
        );
    }
}
