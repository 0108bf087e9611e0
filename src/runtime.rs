//! Chromiumoxide-backed [`BrowserSession`] implementation.
//!
//! Owns exactly one browser process and one page, kept behind an internal
//! mutex so the session can be shared across request handlers. Launching is
//! idempotent; a dead process is only noticed when a CDP call fails, at
//! which point the controller invalidates the session and the next use
//! launches a fresh one.

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams},
    cdp::js_protocol::runtime::EvaluateParams,
    page::Page,
};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tracing::warn;

use crate::browser::{BrowserSession, LaunchPlan, SessionError};
use crate::config::{NAVIGATION_TIMEOUT, Settings};
use crate::scripts;

pub struct ChromiumSession {
    settings: Settings,
    state: Arc<Mutex<Option<SessionState>>>,
}

struct SessionState {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl ChromiumSession {
    /// Create an unlaunched session. The executable lookup is deferred to
    /// [`BrowserSession::launch`] so that a missing browser only disables
    /// the listing API, not the whole server.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            state: Arc::new(Mutex::new(None)),
        }
    }

    async fn page(&self) -> Result<Page, SessionError> {
        let guard = self.state.lock().await;
        guard
            .as_ref()
            .map(|state| state.page.clone())
            .ok_or(SessionError::NotLaunched)
    }

    async fn evaluate_value<T: DeserializeOwned>(
        &self,
        expression: &str,
    ) -> Result<T, SessionError> {
        let page = self.page().await?;
        let params = EvaluateParams::builder()
            .expression(expression.to_string())
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(SessionError::Browser)?;
        let result = page.evaluate(params).await.map_err(map_cdp_error)?;
        result.into_value::<T>().map_err(map_cdp_error)
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn launch(&self) -> Result<(), SessionError> {
        {
            let guard = self.state.lock().await;
            if guard.is_some() {
                return Ok(());
            }
        }

        let plan = LaunchPlan::from_settings(&self.settings)?;
        let config = build_config(&plan)?;

        let (browser, handler) = Browser::launch(config).await.map_err(map_cdp_error)?;
        let handler = spawn_handler(handler);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(map_cdp_error)?;

        page.set_user_agent(plan.user_agent.clone())
            .await
            .map_err(map_cdp_error)?;
        page.evaluate_on_new_document(scripts::STEALTH)
            .await
            .map_err(map_cdp_error)?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(json!({
            "Accept-Language": "en-US,en;q=0.9",
        }))))
        .await
        .map_err(map_cdp_error)?;

        let new_state = SessionState {
            browser,
            handler,
            page,
        };

        let old_state = {
            let mut guard = self.state.lock().await;
            guard.replace(new_state)
        };
        if let Some(state) = old_state {
            cleanup_state(state).await;
        }

        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let page = self.page().await?;

        let navigation = async {
            page.goto(url).await.map_err(map_cdp_error)?;
            page.wait_for_navigation().await.map_err(map_cdp_error)?;
            Ok::<(), SessionError>(())
        };

        match timeout(NAVIGATION_TIMEOUT, navigation).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {}s", NAVIGATION_TIMEOUT.as_secs()),
            }),
        }
    }

    async fn title(&self) -> Result<String, SessionError> {
        let page = self.page().await?;
        let title = page.get_title().await.map_err(map_cdp_error)?;
        Ok(title.unwrap_or_default())
    }

    async fn evaluate(&self, expression: &str) -> Result<String, SessionError> {
        self.evaluate_value(expression).await
    }

    async fn count_elements(&self, selector: &str) -> Result<u64, SessionError> {
        let expression = format!("document.querySelectorAll('{selector}').length");
        self.evaluate_value(&expression).await
    }

    async fn has_browser(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn has_page(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn shutdown(&self) -> Result<(), SessionError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        if let Some(state) = state {
            cleanup_state(state).await;
        }
        Ok(())
    }
}

fn build_config(plan: &LaunchPlan) -> Result<BrowserConfig, SessionError> {
    let viewport = chromiumoxide::handler::viewport::Viewport {
        width: plan.viewport.0,
        height: plan.viewport.1,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: plan.viewport.0 >= plan.viewport.1,
        has_touch: false,
    };

    let builder = BrowserConfig::builder()
        .chrome_executable(&plan.executable)
        .viewport(viewport)
        .args(plan.args.clone());

    let builder = if plan.headless {
        builder
    } else {
        builder.with_head()
    };

    builder.build().map_err(SessionError::Browser)
}

fn map_cdp_error<E: std::fmt::Display>(err: E) -> SessionError {
    SessionError::Browser(err.to_string())
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                warn!(error = %err, "chromiumoxide handler error");
            }
        }
    })
}

async fn cleanup_state(mut state: SessionState) {
    if let Err(err) = state.browser.close().await {
        warn!(error = %err, "browser close failed");
    }
    state.handler.abort();
}
