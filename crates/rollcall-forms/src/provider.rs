//! Pluggable form provider classification.
//!
//! Each provider knows which URLs it handles, which selector signals that
//! its form finished rendering, where it redirects unauthenticated users
//! and any provider-specific submit or success markers. The registry asks
//! plugins in registration order and falls back to [`GenericPlugin`].

use rollcall_core::FormProvider;
use url::Url;

/// Provider-specific knowledge used around the generic pipeline.
pub trait FormProviderPlugin: Send + Sync {
    /// Provider this plugin describes.
    fn provider(&self) -> FormProvider;

    /// Whether the plugin handles `url`.
    fn can_handle(&self, url: &Url) -> bool;

    /// Selector present once the form has rendered.
    fn ready_selector(&self) -> &'static str;

    /// False when forms from this provider cannot be filled without signing in.
    fn auto_fillable(&self) -> bool {
        true
    }

    /// Hosts the provider redirects to for sign-in.
    fn login_hosts(&self) -> &'static [&'static str] {
        &[]
    }

    /// Selectors tried for the submit control before label matching.
    fn submit_selectors(&self) -> &'static [&'static str] {
        &[]
    }

    /// Selectors that only appear on the provider's confirmation page.
    fn success_selectors(&self) -> &'static [&'static str] {
        &[]
    }

    /// Confirmation phrases, folded lowercase.
    fn success_phrases(&self) -> &'static [&'static str] {
        &[]
    }
}

/// `forms.office.com` / `forms.microsoft.com`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrosoftFormsPlugin;

impl FormProviderPlugin for MicrosoftFormsPlugin {
    fn provider(&self) -> FormProvider {
        FormProvider::MicrosoftForms
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(
            url.host_str(),
            Some("forms.office.com" | "forms.microsoft.com" | "forms.cloud.microsoft")
        )
    }

    fn ready_selector(&self) -> &'static str {
        "[data-automation-id=\"questionItem\"]"
    }

    fn login_hosts(&self) -> &'static [&'static str] {
        &["login.microsoftonline.com", "login.live.com"]
    }

    fn submit_selectors(&self) -> &'static [&'static str] {
        &["button[data-automation-id=\"submitButton\"]"]
    }

    fn success_selectors(&self) -> &'static [&'static str] {
        &["[data-automation-id=\"thankYouMessage\"]"]
    }

    fn success_phrases(&self) -> &'static [&'static str] {
        &["yanitiniz kaydedildi", "your response was submitted"]
    }
}

/// `docs.google.com/forms`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoogleFormsPlugin;

impl FormProviderPlugin for GoogleFormsPlugin {
    fn provider(&self) -> FormProvider {
        FormProvider::GoogleForms
    }

    fn can_handle(&self, url: &Url) -> bool {
        (url.host_str() == Some("docs.google.com") && url.path().starts_with("/forms"))
            || url.host_str() == Some("forms.gle")
    }

    fn ready_selector(&self) -> &'static str {
        "form"
    }

    fn login_hosts(&self) -> &'static [&'static str] {
        &["accounts.google.com"]
    }

    fn success_phrases(&self) -> &'static [&'static str] {
        &["yanitiniz kaydedildi", "your response has been recorded"]
    }
}

/// Moodle attendance module; needs an authenticated session.
#[derive(Debug, Default, Clone, Copy)]
pub struct MoodlePlugin;

impl FormProviderPlugin for MoodlePlugin {
    fn provider(&self) -> FormProvider {
        FormProvider::Moodle
    }

    fn can_handle(&self, url: &Url) -> bool {
        let lower = url.as_str().to_ascii_lowercase();
        lower.contains("moodle") && lower.contains("attendance")
    }

    fn ready_selector(&self) -> &'static str {
        "form"
    }

    fn auto_fillable(&self) -> bool {
        false
    }
}

/// Anything with an input on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericPlugin;

impl FormProviderPlugin for GenericPlugin {
    fn provider(&self) -> FormProvider {
        FormProvider::Unknown
    }

    fn can_handle(&self, _url: &Url) -> bool {
        true
    }

    fn ready_selector(&self) -> &'static str {
        "input"
    }
}

/// Ordered set of provider plugins.
pub struct ProviderRegistry {
    plugins: Vec<Box<dyn FormProviderPlugin>>,
    fallback: GenericPlugin,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(MicrosoftFormsPlugin));
        registry.register(Box::new(GoogleFormsPlugin));
        registry.register(Box::new(MoodlePlugin));
        registry
    }
}

impl ProviderRegistry {
    /// Registry with only the generic fallback.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
            fallback: GenericPlugin,
        }
    }

    /// Append a plugin; earlier plugins win.
    pub fn register(&mut self, plugin: Box<dyn FormProviderPlugin>) {
        tracing::debug!(provider = %plugin.provider(), "Registered form provider");
        self.plugins.push(plugin);
    }

    /// Plugin responsible for `url`, the generic one if none claims it.
    #[must_use]
    pub fn classify(&self, url: &str) -> &dyn FormProviderPlugin {
        let Ok(parsed) = Url::parse(url) else {
            return &self.fallback;
        };
        match self.plugins.iter().find(|p| p.can_handle(&parsed)) {
            Some(plugin) => plugin.as_ref(),
            None => &self.fallback,
        }
    }

    /// Whether a specific (non-generic) provider claims `url`.
    #[must_use]
    pub fn recognizes(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|parsed| self.plugins.iter().any(|p| p.can_handle(&parsed)))
    }

    /// Whether `url` is on any provider's sign-in host.
    #[must_use]
    pub fn is_login_url(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
            return false;
        };
        self.plugins
            .iter()
            .flat_map(|p| p.login_hosts().iter())
            .any(|login| *login == host)
    }
}
