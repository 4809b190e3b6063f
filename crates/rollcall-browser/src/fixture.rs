//! In-memory pages driven by static HTML.
//!
//! [`FixturePage`] answers every [`FormPage`] call from an HTML string plus a
//! little mutable state (typed values, checked flags). Clicking an element
//! can swap the document for another one, which is how a submit is modelled.
//! [`FixtureSession`] hands out fresh copies of registered pages per URL.

use crate::dom::{self, ElementInfo, ElementKind};
use crate::error::{BrowserError, Result};
use crate::page::{BrowserSession, FormPage};
use scraper::Html;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Transition {
    trigger: String,
    url: String,
    html: String,
}

#[derive(Debug, Clone, Default)]
struct PageState {
    url: String,
    html: String,
    values: HashMap<String, String>,
    checked: HashMap<String, bool>,
    ignored_inputs: HashSet<String>,
    transitions: Vec<Transition>,
    unreachable_after_transition: bool,
    unreachable: bool,
    panic_on_click: bool,
}

#[derive(Debug, Default)]
struct PageStats {
    discovery_calls: AtomicUsize,
    clicks: AtomicUsize,
    closed: AtomicBool,
}

/// A fake tab backed by an HTML document.
#[derive(Debug, Clone)]
pub struct FixturePage {
    state: Arc<Mutex<PageState>>,
    stats: Arc<PageStats>,
    latency: Option<Duration>,
}

impl FixturePage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                url: url.into(),
                html: html.into(),
                ..PageState::default()
            })),
            stats: Arc::new(PageStats::default()),
            latency: None,
        }
    }

    /// Typing into `selector` is silently dropped, like a masked or script-reset input.
    pub fn ignore_input(self, selector: impl Into<String>) -> Self {
        self.lock().ignored_inputs.insert(selector.into());
        self
    }

    /// Clicking an element matched by `trigger` replaces the document.
    pub fn on_click(
        self,
        trigger: impl Into<String>,
        url: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        self.lock().transitions.push(Transition {
            trigger: trigger.into(),
            url: url.into(),
            html: html.into(),
        });
        self
    }

    /// Once a click swaps the document, reading the page times out, like a
    /// tab whose connection dropped while the submit was in flight.
    pub fn unreachable_after_submit(self) -> Self {
        self.lock().unreachable_after_transition = true;
        self
    }

    /// Clicking anything panics.
    pub fn panic_on_click(self) -> Self {
        self.lock().panic_on_click = true;
        self
    }

    /// Every page operation sleeps this long first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Independent copy with the same document and behaviour but fresh state.
    pub fn fresh(&self) -> Self {
        let state = self.lock().clone();
        Self {
            state: Arc::new(Mutex::new(state)),
            stats: Arc::new(PageStats::default()),
            latency: self.latency,
        }
    }

    /// How many times [`FormPage::form_elements`] was called.
    pub fn discovery_calls(&self) -> usize {
        self.stats.discovery_calls.load(Ordering::SeqCst)
    }

    pub fn click_count(&self) -> usize {
        self.stats.clicks.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::SeqCst)
    }

    pub fn current_url(&self) -> String {
        self.lock().url.clone()
    }

    /// Value typed into `selector`, if any.
    pub fn typed_value(&self, selector: &str) -> Option<String> {
        self.lock().values.get(selector).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_reachable(&self, what: &str) -> Result<()> {
        let state = self.lock();
        if state.unreachable {
            return Err(BrowserError::Timeout(format!("{what} on {}", state.url)));
        }
        Ok(())
    }

    fn overlay(state: &PageState, mut element: ElementInfo) -> ElementInfo {
        if let Some(checked) = state.checked.get(&element.selector) {
            element.checked = *checked;
        }
        element
    }
}

fn targets_same_element(html: &str, clicked: &str, trigger: &str) -> Result<bool> {
    let doc = Html::parse_document(html);
    let clicked = dom::parse_selector(clicked)?;
    let trigger = dom::parse_selector(trigger)?;
    let Some(target) = doc.select(&clicked).next() else {
        return Ok(false);
    };
    Ok(doc.select(&trigger).any(|el| el == target))
}

#[async_trait::async_trait]
impl FormPage for FixturePage {
    async fn url(&self) -> Result<String> {
        self.pause().await;
        self.check_reachable("url")?;
        Ok(self.current_url())
    }

    async fn content(&self) -> Result<String> {
        self.pause().await;
        self.check_reachable("content")?;
        Ok(self.lock().html.clone())
    }

    async fn form_elements(&self) -> Result<Vec<ElementInfo>> {
        self.pause().await;
        self.check_reachable("form elements")?;
        self.stats.discovery_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        Ok(dom::extract_form_elements(&state.html)
            .into_iter()
            .map(|element| Self::overlay(&state, element))
            .collect())
    }

    async fn element_state(&self, selector: &str) -> Result<Option<ElementInfo>> {
        self.pause().await;
        let state = self.lock();
        Ok(dom::describe_element(&state.html, selector)?.map(|element| Self::overlay(&state, element)))
    }

    async fn clear_and_type(&self, selector: &str, text: &str) -> Result<()> {
        self.pause().await;
        let mut state = self.lock();
        let element = dom::describe_element(&state.html, selector)?
            .ok_or_else(|| BrowserError::SelectorNotFound(selector.to_string()))?;
        if !element.is_interactable() || state.ignored_inputs.contains(selector) {
            return Ok(());
        }
        state.values.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        self.pause().await;
        let state = self.lock();
        if let Some(value) = state.values.get(selector) {
            return Ok(value.clone());
        }
        let element = dom::describe_element(&state.html, selector)?
            .ok_or_else(|| BrowserError::SelectorNotFound(selector.to_string()))?;
        Ok(element.value.unwrap_or_default())
    }

    async fn is_checked(&self, selector: &str) -> Result<bool> {
        self.pause().await;
        let state = self.lock();
        if let Some(checked) = state.checked.get(selector) {
            return Ok(*checked);
        }
        let element = dom::describe_element(&state.html, selector)?
            .ok_or_else(|| BrowserError::SelectorNotFound(selector.to_string()))?;
        Ok(element.checked)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.pause().await;
        self.stats.clicks.fetch_add(1, Ordering::SeqCst);
        if self.lock().panic_on_click {
            panic!("driver crashed while clicking {selector}");
        }
        let mut state = self.lock();
        let element = dom::describe_element(&state.html, selector)?
            .ok_or_else(|| BrowserError::SelectorNotFound(selector.to_string()))?;
        if !element.is_interactable() {
            return Ok(());
        }

        match element.kind {
            ElementKind::Checkbox => {
                let current = state.checked.get(selector).copied().unwrap_or(element.checked);
                state.checked.insert(selector.to_string(), !current);
            }
            ElementKind::Radio => {
                let siblings: Vec<String> = dom::extract_form_elements(&state.html)
                    .into_iter()
                    .filter(|e| e.kind == ElementKind::Radio && e.name == element.name)
                    .map(|e| e.selector)
                    .collect();
                for sibling in siblings {
                    state.checked.insert(sibling, false);
                }
                state.checked.insert(selector.to_string(), true);
            }
            _ => {}
        }

        let mut next = None;
        for transition in &state.transitions {
            if targets_same_element(&state.html, selector, &transition.trigger)? {
                next = Some(transition.clone());
                break;
            }
        }
        if let Some(transition) = next {
            state.url = transition.url;
            state.html = transition.html;
            state.values.clear();
            state.checked.clear();
            state.unreachable = state.unreachable_after_transition;
        }
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.pause().await;
        // PNG signature is enough for evidence plumbing
        Ok(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a])
    }

    async fn close(&self) -> Result<()> {
        self.stats.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A fake browser serving registered [`FixturePage`] templates by URL.
#[derive(Debug, Default)]
pub struct FixtureSession {
    templates: Mutex<HashMap<String, FixturePage>>,
    opened: Mutex<Vec<FixturePage>>,
    navigation_failures: AtomicUsize,
    open_calls: AtomicUsize,
}

impl FixtureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page under its URL; each `open_tab` gets a fresh copy.
    pub fn add_page(&self, page: FixturePage) {
        let url = page.current_url();
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url, page);
    }

    /// Opening `url` lands on `page`, as after a server-side redirect.
    pub fn add_redirect(&self, url: impl Into<String>, page: FixturePage) {
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), page);
    }

    /// The next `count` navigations fail with a transient error.
    pub fn fail_next_navigations(&self, count: usize) {
        self.navigation_failures.store(count, Ordering::SeqCst);
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Tabs handed out so far, in order.
    pub fn opened_pages(&self) -> Vec<FixturePage> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tabs handed out and not yet closed.
    pub fn open_tab_count(&self) -> usize {
        self.opened_pages().iter().filter(|p| !p.is_closed()).count()
    }
}

#[async_trait::async_trait]
impl BrowserSession for FixtureSession {
    async fn open_tab(&self, url: &str) -> Result<Box<dyn FormPage>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .navigation_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BrowserError::NavigationError(format!(
                "net::ERR_CONNECTION_RESET at {url}"
            )));
        }

        let page = self
            .templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .map(FixturePage::fresh)
            .ok_or_else(|| BrowserError::NavigationError(format!("net::ERR_NAME_NOT_RESOLVED at {url}")))?;

        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page.clone());
        Ok(Box::new(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = r#"
        <form>
          <input id="name" type="text">
          <input id="locked" type="text" disabled>
          <input id="agree" type="checkbox">
          <input type="radio" name="att" value="yes">
          <input type="radio" name="att" value="no" checked>
          <button type="submit">Submit</button>
        </form>
    "#;

    fn page() -> FixturePage {
        FixturePage::new("https://forms.test/a", FORM).on_click(
            "button[type=submit]",
            "https://forms.test/a/done",
            "<p>Thanks</p>",
        )
    }

    #[tokio::test]
    async fn test_typing_round_trips() {
        let page = page();
        page.clear_and_type("#name", "Halil").await.expect("type");
        assert_eq!(page.read_value("#name").await.expect("read"), "Halil");
    }

    #[tokio::test]
    async fn test_disabled_and_ignored_inputs_drop_text() {
        let page = page().ignore_input("#name");
        page.clear_and_type("#name", "Halil").await.expect("type");
        page.clear_and_type("#locked", "x").await.expect("type");
        assert_eq!(page.read_value("#name").await.expect("read"), "");
        assert_eq!(page.read_value("#locked").await.expect("read"), "");
    }

    #[tokio::test]
    async fn test_checkbox_and_radio_clicks() {
        let page = page();
        page.set_checked("#agree", true).await.expect("check");
        assert!(page.is_checked("#agree").await.expect("state"));
        page.set_checked("#agree", true).await.expect("idempotent");
        assert!(page.is_checked("#agree").await.expect("state"));

        let yes = "input[name=\"att\"][value=\"yes\"]";
        let no = "input[name=\"att\"][value=\"no\"]";
        page.click(yes).await.expect("click radio");
        assert!(page.is_checked(yes).await.expect("state"));
        assert!(!page.is_checked(no).await.expect("state"));
    }

    #[tokio::test]
    async fn test_submit_transition_replaces_document() {
        let page = page();
        let elements = page.form_elements().await.expect("elements");
        let submit = elements
            .iter()
            .find(|e| e.kind == ElementKind::Button)
            .expect("submit button");
        page.click(&submit.selector).await.expect("click");
        assert_eq!(page.url().await.expect("url"), "https://forms.test/a/done");
        assert!(page.content().await.expect("content").contains("Thanks"));
        assert_eq!(page.discovery_calls(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_after_submit() {
        let page = page().unreachable_after_submit();
        page.click("#agree").await.expect("click");
        assert!(page.url().await.is_ok());

        page.click("button[type=submit]").await.expect("click");

        let err = page.url().await.unwrap_err();
        assert!(err.is_transient());
        assert!(page.content().await.is_err());
    }

    #[tokio::test]
    async fn test_session_fresh_copies_and_failures() {
        let session = FixtureSession::new();
        session.add_page(page());
        session.fail_next_navigations(1);

        assert!(session.open_tab("https://forms.test/a").await.is_err());
        let first = session.open_tab("https://forms.test/a").await.expect("open");
        first.clear_and_type("#name", "A").await.expect("type");
        let second = session.open_tab("https://forms.test/a").await.expect("open");
        assert_eq!(second.read_value("#name").await.expect("read"), "");

        assert_eq!(session.open_calls(), 3);
        assert_eq!(session.open_tab_count(), 2);
        first.close().await.expect("close");
        assert_eq!(session.open_tab_count(), 1);
        assert!(session.open_tab("https://unknown.test").await.is_err());
    }
}
