//! Post-submission outcome classification.
//!
//! Markers are checked in a fixed order and the first hit wins: captcha,
//! success, validation error. A page with none of them is `Unrecognized`,
//! which callers must treat as a failure.

use crate::error::FormError;
use crate::provider::FormProviderPlugin;
use crate::text;
use rollcall_browser::{dom, url_path, FormPage};
use rollcall_core::SubmissionStatus;
use scraper::{Html, Selector};

const CAPTCHA_SELECTORS: &[&str] = &[
    "iframe[src*=\"recaptcha\"]",
    "iframe[src*=\"hcaptcha\"]",
    "iframe[src*=\"challenges.cloudflare.com\"]",
    ".g-recaptcha",
    ".h-captcha",
    ".cf-turnstile",
    "#captcha",
];

const CAPTCHA_PHRASES: &[&str] = &[
    "captcha",
    "recaptcha",
    "verify you are human",
    "i m not a robot",
    "ben robot degilim",
    "robot olmadiginizi",
];

const SUCCESS_SELECTORS: &[&str] = &[
    ".freebirdFormviewerViewResponseConfirmationMessage",
    "[data-automation-id=\"thankYouMessage\"]",
];

const SUCCESS_PHRASES: &[&str] = &[
    "yanitiniz kaydedildi",
    "yanitiniz gonderildi",
    "basariyla gonderildi",
    "gonderildi",
    "tesekkurler",
    "tesekkur ederiz",
    "your response has been recorded",
    "response recorded",
    "thank you",
    "thanks for submitting",
];

const SUCCESS_PATH_SEGMENTS: &[&str] = &[
    "formresponse",
    "thankyou",
    "thank-you",
    "success",
    "confirmation",
    "submitted",
];

const ERROR_SELECTORS: &[&str] = &[
    "[role=\"alert\"]",
    "[data-automation-id=\"validationError\"]",
    ".error-message",
    ".invalid-feedback",
    ".errormsg",
];

const ERROR_PHRASES: &[&str] = &[
    "this question is required",
    "this is a required question",
    "bu soru gereklidir",
    "bu soru zorunludur",
    "bu alan zorunludur",
    "zorunlu bir soru",
];

/// URL and DOM of a tab at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    /// Page URL
    pub url: String,
    /// Serialized DOM
    pub html: String,
}

impl PageSnapshot {
    /// Read the current state of `page`.
    pub async fn capture(page: &dyn FormPage) -> rollcall_browser::Result<Self> {
        Ok(Self {
            url: page.url().await?,
            html: page.content().await?,
        })
    }
}

/// What a post-submit page says happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A captcha or bot challenge is shown
    Captcha,
    /// The form confirmed the submission
    Success,
    /// The form rejected the submission with this message
    ValidationError(String),
    /// Nothing recognizable
    Unrecognized,
}

impl Outcome {
    /// Whether any marker matched.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized)
    }

    /// Submission status recorded for this outcome.
    #[must_use]
    pub fn status(&self) -> SubmissionStatus {
        match self {
            Self::Captcha => SubmissionStatus::Captcha,
            Self::Success => SubmissionStatus::Success,
            Self::ValidationError(_) | Self::Unrecognized => SubmissionStatus::Failed,
        }
    }

    /// Error describing a non-successful outcome at `url`.
    #[must_use]
    pub fn into_error(self, url: &str) -> Option<FormError> {
        match self {
            Self::Success => None,
            Self::Captcha => Some(FormError::CaptchaDetected {
                url: url.to_string(),
            }),
            Self::ValidationError(message) => Some(FormError::ValidationRejected(message)),
            Self::Unrecognized => Some(FormError::OutcomeUnrecognized {
                url: url.to_string(),
            }),
        }
    }
}

/// Marker-based classifier, optionally extended by a provider plugin.
#[derive(Debug, Clone, Default)]
pub struct OutcomeClassifier {
    success_selectors: Vec<&'static str>,
    success_phrases: Vec<&'static str>,
}

impl OutcomeClassifier {
    /// Classifier with the provider's extra success markers.
    #[must_use]
    pub fn for_provider(plugin: &dyn FormProviderPlugin) -> Self {
        Self {
            success_selectors: plugin.success_selectors().to_vec(),
            success_phrases: plugin.success_phrases().to_vec(),
        }
    }

    /// Whether the page shows a captcha or bot challenge.
    #[must_use]
    pub fn has_captcha(&self, snapshot: &PageSnapshot) -> bool {
        let doc = Html::parse_document(&snapshot.html);
        let tokens = text::tokens(&dom::visible_text(&snapshot.html));
        any_selector(&doc, CAPTCHA_SELECTORS.iter().copied())
            || CAPTCHA_PHRASES.iter().any(|p| text::has_phrase(&tokens, p))
    }

    /// Classify `after`. Text markers already present in `before` are ignored,
    /// so a form whose description says "thank you" is not a confirmation.
    #[must_use]
    pub fn classify(&self, after: &PageSnapshot, before: Option<&PageSnapshot>) -> Outcome {
        if self.has_captcha(after) {
            return Outcome::Captcha;
        }

        let doc = Html::parse_document(&after.html);
        let tokens = text::tokens(&dom::visible_text(&after.html));
        let baseline = before
            .map(|b| text::tokens(&dom::visible_text(&b.html)))
            .unwrap_or_default();
        let is_new = |phrase: &&str| {
            text::has_phrase(&tokens, phrase) && !text::has_phrase(&baseline, phrase)
        };

        if any_selector(
            &doc,
            SUCCESS_SELECTORS.iter().chain(&self.success_selectors).copied(),
        ) || SUCCESS_PHRASES
            .iter()
            .chain(&self.success_phrases)
            .any(is_new)
            || success_path(after, before)
        {
            return Outcome::Success;
        }

        if let Some(message) = error_text(&doc) {
            return Outcome::ValidationError(message);
        }
        if let Some(phrase) = ERROR_PHRASES.iter().find(|p| is_new(*p)) {
            return Outcome::ValidationError((*phrase).to_string());
        }

        Outcome::Unrecognized
    }
}

fn any_selector<'a>(doc: &Html, selectors: impl IntoIterator<Item = &'a str>) -> bool {
    selectors.into_iter().any(|css| {
        Selector::parse(css)
            .map(|sel| doc.select(&sel).next().is_some())
            .unwrap_or(false)
    })
}

fn success_path(after: &PageSnapshot, before: Option<&PageSnapshot>) -> bool {
    if before.is_some_and(|b| b.url == after.url) {
        return false;
    }
    let path = url_path(&after.url).to_ascii_lowercase();
    path.split('/')
        .any(|segment| SUCCESS_PATH_SEGMENTS.contains(&segment))
}

fn error_text(doc: &Html) -> Option<String> {
    ERROR_SELECTORS.iter().find_map(|css| {
        let sel = Selector::parse(css).ok()?;
        doc.select(&sel)
            .map(|el| dom::visible_text(&el.html()))
            .find(|text| !text.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MicrosoftFormsPlugin;

    fn snap(url: &str, body: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            html: format!("<html><body>{body}</body></html>"),
        }
    }

    #[test]
    fn test_captcha_wins_over_success() {
        let page = snap(
            "https://forms.office.com/r/x",
            r#"<p>Thank you! Your response has been recorded.</p>
               <iframe src="https://www.google.com/recaptcha/api2/anchor"></iframe>"#,
        );
        assert_eq!(OutcomeClassifier::default().classify(&page, None), Outcome::Captcha);
    }

    #[test]
    fn test_captcha_text_marker() {
        let page = snap("https://x.test/f", "<p>Lütfen robot olmadığınızı doğrulayın</p>");
        assert!(OutcomeClassifier::default().has_captcha(&page));
        let page = snap("https://x.test/f", "<p>Captain's log</p>");
        assert!(!OutcomeClassifier::default().has_captcha(&page));
    }

    #[test]
    fn test_turkish_confirmation_is_success() {
        let before = snap("https://forms.office.com/r/x", "<form><input></form>");
        let after = snap("https://forms.office.com/r/x", "<div>Teşekkürler! Yanıtınız kaydedildi.</div>");
        assert_eq!(
            OutcomeClassifier::default().classify(&after, Some(&before)),
            Outcome::Success
        );
    }

    #[test]
    fn test_google_form_response_url_is_success() {
        let before = snap("https://docs.google.com/forms/d/e/abc/viewform", "<form></form>");
        let after = snap("https://docs.google.com/forms/d/e/abc/formResponse", "<div></div>");
        assert_eq!(
            OutcomeClassifier::default().classify(&after, Some(&before)),
            Outcome::Success
        );
    }

    #[test]
    fn test_preexisting_thank_you_is_not_success() {
        let before = snap(
            "https://x.test/f",
            "<p>Thank you for attending</p><form><input name=a></form>",
        );
        let after = before.clone();
        assert_eq!(
            OutcomeClassifier::default().classify(&after, Some(&before)),
            Outcome::Unrecognized
        );
    }

    #[test]
    fn test_validation_error_text_is_extracted() {
        let after = snap(
            "https://x.test/f",
            r#"<form><input name=a><div role="alert"> Bu soru gereklidir. </div></form>"#,
        );
        assert_eq!(
            OutcomeClassifier::default().classify(&after, None),
            Outcome::ValidationError("Bu soru gereklidir.".to_string())
        );
    }

    #[test]
    fn test_empty_alert_is_ignored() {
        let after = snap("https://x.test/f", r#"<div role="alert"></div><p>hmm</p>"#);
        assert_eq!(
            OutcomeClassifier::default().classify(&after, None),
            Outcome::Unrecognized
        );
    }

    #[test]
    fn test_provider_success_selector() {
        let after = snap(
            "https://forms.office.com/r/x",
            r#"<div data-automation-id="thankYouMessage"></div>"#,
        );
        let classifier = OutcomeClassifier::for_provider(&MicrosoftFormsPlugin);
        assert_eq!(classifier.classify(&after, None), Outcome::Success);
    }

    #[test]
    fn test_outcome_status_mapping() {
        assert_eq!(Outcome::Success.status(), SubmissionStatus::Success);
        assert_eq!(Outcome::Captcha.status(), SubmissionStatus::Captcha);
        assert_eq!(Outcome::Unrecognized.status(), SubmissionStatus::Failed);
        assert!(Outcome::Success.into_error("u").is_none());
        assert!(matches!(
            Outcome::Unrecognized.into_error("u"),
            Some(FormError::OutcomeUnrecognized { .. })
        ));
    }
}
