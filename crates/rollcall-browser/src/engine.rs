use crate::dom::{self, ElementInfo};
use crate::error::{BrowserError, Result};
use crate::pacing::HumanPacing;
use crate::page::{BrowserSession, FormPage};
use crate::stealth::{StealthProfile, WEBDRIVER_PATCH_JS};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Browser automation engine
///
/// One Chrome connection shared by every tab. Either launches a fresh
/// browser with a stealth profile or attaches to a running one over CDP.
pub struct BrowserEngine {
    browser: Browser,
    stealth: Option<StealthProfile>,
    navigation_timeout: Duration,
    pacing: HumanPacing,
    _handler_task: JoinHandle<()>,
}

impl BrowserEngine {
    /// Launch or connect according to configuration.
    pub async fn from_config(config: &rollcall_core::BrowserConfig) -> Result<Self> {
        match config.debug_url.as_deref() {
            Some(url) => Self::connect(url, config).await,
            None => Self::launch(config).await,
        }
    }

    /// Launch a new Chrome process with a randomized stealth profile.
    pub async fn launch(config: &rollcall_core::BrowserConfig) -> Result<Self> {
        let profile = StealthProfile::randomized(&config.locale, &config.timezone);

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(config.window_width, config.window_height)
            .viewport(Viewport {
                width: profile.viewport_width,
                height: profile.viewport_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .args(profile.launch_args());
        if !config.headless {
            builder = builder.with_head();
        }

        let browser_config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {}", e);
                }
            }
        });

        tracing::info!(
            headless = config.headless,
            viewport = %format!("{}x{}", profile.viewport_width, profile.viewport_height),
            "Launched browser"
        );

        Ok(Self {
            browser,
            stealth: Some(profile),
            navigation_timeout: config.navigation_timeout(),
            pacing: HumanPacing::disabled(),
            _handler_task: handler_task,
        })
    }

    /// Attach to an already running Chrome (`--remote-debugging-port`).
    ///
    /// The running browser keeps its own identity; no stealth overrides are applied.
    pub async fn connect(debug_url: &str, config: &rollcall_core::BrowserConfig) -> Result<Self> {
        let (browser, mut handler) = Browser::connect(debug_url)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {}", e);
                }
            }
        });

        tracing::info!(debug_url, "Connected to running browser");

        Ok(Self {
            browser,
            stealth: None,
            navigation_timeout: config.navigation_timeout(),
            pacing: HumanPacing::disabled(),
            _handler_task: handler_task,
        })
    }

    /// Type into fields one character at a time with human-like delays.
    #[must_use]
    pub fn with_pacing(mut self, pacing: HumanPacing) -> Self {
        self.pacing = pacing;
        self
    }

    async fn apply_stealth(page: &Page, profile: &StealthProfile) -> Result<()> {
        let mut user_agent = SetUserAgentOverrideParams::new(profile.user_agent.clone());
        user_agent.accept_language = Some(profile.accept_language());
        page.execute(user_agent).await?;

        page.execute(SetTimezoneOverrideParams::new(profile.timezone.clone()))
            .await?;
        page.execute(SetLocaleOverrideParams {
            locale: Some(profile.locale.clone()),
        })
        .await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(WEBDRIVER_PATCH_JS))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrowserSession for BrowserEngine {
    async fn open_tab(&self, url: &str) -> Result<Box<dyn FormPage>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        let tab = ChromeTab {
            page,
            pacing: self.pacing.clone(),
        };

        let navigated = async {
            if let Some(profile) = &self.stealth {
                Self::apply_stealth(&tab.page, profile).await?;
            }
            tab.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::NavigationError(e.to_string()))?;
            Ok::<(), BrowserError>(())
        };

        let outcome = match tokio::time::timeout(self.navigation_timeout, navigated).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout(format!("navigation to {url}"))),
        };

        if let Err(e) = outcome {
            // The tab exists even when navigation failed
            if let Err(close_err) = tab.close().await {
                tracing::warn!("Failed to close tab after navigation error: {}", close_err);
            }
            return Err(e);
        }

        tracing::debug!(url, "Opened tab");
        Ok(Box::new(tab))
    }
}

/// A Chrome tab driven over CDP.
pub struct ChromeTab {
    page: Page,
    pacing: HumanPacing,
}

#[derive(Debug, Deserialize)]
struct LiveState {
    visible: bool,
    enabled: bool,
    checked: bool,
}

const LIVE_STATE_JS: &str = r#"
(() => {
    const selectors = __SELECTORS__;
    return JSON.stringify(selectors.map((sel) => {
        let el = null;
        try { el = document.querySelector(sel); } catch (e) { return null; }
        if (!el) return null;
        const style = window.getComputedStyle(el);
        const rect = el.getBoundingClientRect();
        const visible = style.display !== 'none'
            && style.visibility !== 'hidden'
            && (rect.width > 0 || rect.height > 0 || el.getClientRects().length > 0);
        const enabled = !el.disabled && !el.readOnly
            && el.getAttribute('aria-disabled') !== 'true'
            && !el.closest('fieldset[disabled]');
        const checked = el.checked === true || el.getAttribute('aria-checked') === 'true';
        return { visible, enabled, checked };
    }));
})()
"#;

impl ChromeTab {
    async fn eval_json<T: serde::de::DeserializeOwned>(&self, js: String) -> Result<T> {
        let raw: String = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| BrowserError::ScriptError(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::ScriptError(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| BrowserError::ScriptError(e.to_string()))
    }

    /// Overlay computed visibility and live checked state onto static descriptions.
    async fn with_live_state(&self, mut elements: Vec<ElementInfo>) -> Result<Vec<ElementInfo>> {
        let selectors: Vec<&str> = elements.iter().map(|e| e.selector.as_str()).collect();
        let selectors_js =
            serde_json::to_string(&selectors).map_err(|e| BrowserError::ScriptError(e.to_string()))?;
        let states: Vec<Option<LiveState>> = self
            .eval_json(LIVE_STATE_JS.replace("__SELECTORS__", &selectors_js))
            .await?;

        for (element, state) in elements.iter_mut().zip(states) {
            match state {
                Some(state) => {
                    element.visible = state.visible;
                    element.enabled = state.enabled;
                    element.checked = state.checked;
                }
                None => element.visible = false,
            }
        }
        Ok(elements)
    }

    fn selector_literal(selector: &str) -> Result<String> {
        serde_json::to_string(selector).map_err(|e| BrowserError::ScriptError(e.to_string()))
    }
}

#[async_trait::async_trait]
impl FormPage for ChromeTab {
    async fn url(&self) -> Result<String> {
        self.page
            .url()
            .await?
            .ok_or_else(|| BrowserError::NavigationError("tab has no URL".to_string()))
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn form_elements(&self) -> Result<Vec<ElementInfo>> {
        let html = self.content().await?;
        let elements = dom::extract_form_elements(&html);
        self.with_live_state(elements).await
    }

    async fn element_state(&self, selector: &str) -> Result<Option<ElementInfo>> {
        let html = self.content().await?;
        match dom::describe_element(&html, selector)? {
            Some(element) => Ok(self.with_live_state(vec![element]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn clear_and_type(&self, selector: &str, text: &str) -> Result<()> {
        let sel = Self::selector_literal(selector)?;
        let cleared: bool = self
            .eval_json(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return JSON.stringify(false);
                    el.focus();
                    el.value = '';
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    return JSON.stringify(true);
                }})()"#
            ))
            .await?;
        if !cleared {
            return Err(BrowserError::SelectorNotFound(selector.to_string()));
        }

        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(selector.to_string()))?;
        element.click().await?;
        if !self.pacing.is_enabled() {
            element.type_str(text).await?;
            return Ok(());
        }

        let mut buf = [0u8; 4];
        for ch in text.chars() {
            element.type_str(ch.encode_utf8(&mut buf)).await?;
            tokio::time::sleep(self.pacing.keystroke_delay()).await;
        }
        Ok(())
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let sel = Self::selector_literal(selector)?;
        let value: Option<String> = self
            .eval_json(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    return JSON.stringify(el ? (el.value ?? el.textContent ?? '') : null);
                }})()"#
            ))
            .await?;
        value.ok_or_else(|| BrowserError::SelectorNotFound(selector.to_string()))
    }

    async fn is_checked(&self, selector: &str) -> Result<bool> {
        let sel = Self::selector_literal(selector)?;
        let checked: Option<bool> = self
            .eval_json(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return JSON.stringify(null);
                    return JSON.stringify(el.checked === true || el.getAttribute('aria-checked') === 'true');
                }})()"#
            ))
            .await?;
        checked.ok_or_else(|| BrowserError::SelectorNotFound(selector.to_string()))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(selector.to_string()))?;
        element.scroll_into_view().await?;
        element.click().await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| BrowserError::ScreenshotError(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}
