//! Structural page fingerprints.
//!
//! A fingerprint is a SHA-256 over a canonical description of the page's
//! shape: the element skeleton (depth, tag and a few structural attributes)
//! plus the kind, type, name and folded label of every form control. Text
//! nodes, attribute values typed by users, ids and classes never enter the
//! digest, so two renderings of the same form template hash identically.

use crate::text;
use rollcall_browser::dom;
use rollcall_browser::ElementKind;
use rollcall_core::FormFingerprint;
use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};

const IGNORED_SUBTREES: &[&str] = &["head", "script", "style", "noscript", "template", "svg"];
const STRUCTURAL_ATTRS: &[&str] = &["type", "name", "role", "data-automation-id"];

/// Shape of one form control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlShape {
    /// Control kind
    pub kind: ElementKind,
    /// `type` of `<input>` elements
    pub input_type: Option<String>,
    /// `name` attribute
    pub name: Option<String>,
    /// Folded label text
    pub label: String,
}

/// Content-free description of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStructure {
    skeleton: Vec<String>,
    controls: Vec<ControlShape>,
}

impl PageStructure {
    /// Describe the structure of a serialized page.
    #[must_use]
    pub fn from_html(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let skeleton = doc
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| !is_ignored(*el))
            .map(skeleton_entry)
            .collect();

        let controls = dom::extract_form_elements(html)
            .into_iter()
            .map(|el| ControlShape {
                kind: el.kind,
                input_type: el.input_type,
                name: el.name,
                label: text::fold(&el.label),
            })
            .collect();

        Self { skeleton, controls }
    }

    /// Form controls in document order.
    #[must_use]
    pub fn controls(&self) -> &[ControlShape] {
        &self.controls
    }

    /// Canonical text the digest is computed over.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for entry in &self.skeleton {
            out.push_str("s|");
            out.push_str(entry);
            out.push('\n');
        }
        for control in &self.controls {
            out.push_str(&format!(
                "c|{:?}|{}|{}|{}\n",
                control.kind,
                control.input_type.as_deref().unwrap_or(""),
                control.name.as_deref().unwrap_or(""),
                control.label
            ));
        }
        out
    }

    /// Structural fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> FormFingerprint {
        let digest = Sha256::digest(self.canonical().as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        FormFingerprint::from_digest(&bytes)
    }
}

/// Fingerprint of a serialized page.
#[must_use]
pub fn fingerprint(html: &str) -> FormFingerprint {
    PageStructure::from_html(html).fingerprint()
}

fn is_ignored(el: ElementRef) -> bool {
    let hidden_input =
        el.value().name() == "input" && el.value().attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden"));
    hidden_input
        || std::iter::once(el)
            .chain(el.ancestors().filter_map(ElementRef::wrap))
            .any(|e| IGNORED_SUBTREES.contains(&e.value().name()))
}

fn skeleton_entry(el: ElementRef) -> String {
    let depth = el.ancestors().count();
    let mut entry = format!("{depth}/{}", el.value().name());
    for attr in STRUCTURAL_ATTRS {
        if let Some(value) = el.value().attr(attr) {
            let value = if *attr == "type" {
                value.to_ascii_lowercase()
            } else {
                value.to_string()
            };
            entry.push_str(&format!("[{attr}={value}]"));
        }
    }
    entry
}
