use crate::dom::ElementInfo;
use crate::error::Result;

/// A shared browser connection that hands out one tab per form.
#[async_trait::async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a new tab and navigate it to `url`.
    async fn open_tab(&self, url: &str) -> Result<Box<dyn FormPage>>;
}

/// Operations on a single open tab.
///
/// Selectors are CSS selectors as produced by [`crate::dom`]; every method
/// addresses the first element matching the selector.
#[async_trait::async_trait]
pub trait FormPage: Send + Sync {
    /// Current URL of the tab
    async fn url(&self) -> Result<String>;

    /// Serialized DOM of the tab
    async fn content(&self) -> Result<String>;

    /// Every interactable element on the page, in document order
    async fn form_elements(&self) -> Result<Vec<ElementInfo>>;

    /// Description of one element, `None` if the selector matches nothing
    async fn element_state(&self, selector: &str) -> Result<Option<ElementInfo>>;

    /// Replace the value of a text input by typing
    async fn clear_and_type(&self, selector: &str, text: &str) -> Result<()>;

    /// Current value of a text input
    async fn read_value(&self, selector: &str) -> Result<String>;

    /// Current checked state of a checkbox or radio
    async fn is_checked(&self, selector: &str) -> Result<bool>;

    /// Click an element
    async fn click(&self, selector: &str) -> Result<()>;

    /// PNG screenshot of the viewport
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Close the tab; the session stays alive
    async fn close(&self) -> Result<()>;

    /// Drive a checkbox or radio to `checked`, clicking only when needed.
    async fn set_checked(&self, selector: &str, checked: bool) -> Result<()> {
        if self.is_checked(selector).await? != checked {
            self.click(selector).await?;
        }
        Ok(())
    }
}

/// Path component of a URL, empty when the URL does not parse.
pub fn url_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_path() {
        assert_eq!(
            url_path("https://docs.google.com/forms/d/e/x/formResponse?pli=1"),
            "/forms/d/e/x/formResponse"
        );
        assert_eq!(url_path("garbage"), "");
    }
}
