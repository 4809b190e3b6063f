//! Static DOM inspection with `scraper`.
//!
//! Turns a serialized page into [`ElementInfo`] records: one per
//! interactable element, each carrying a stable CSS selector, the text a
//! human would read as its label, and the enclosing visual container.

use crate::error::{BrowserError, Result};
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};

const CANDIDATES: &str = "input, textarea, select, button, \
    [role=\"checkbox\"], [role=\"radio\"], [role=\"button\"], [role=\"textbox\"]";

const CONTEXT_MAX_CHARS: usize = 300;

/// What kind of control an element is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    TextInput,
    Checkbox,
    Radio,
    Button,
    Select,
    Other,
}

/// Description of one interactable element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Selector that matches this element and no earlier one
    pub selector: String,
    pub tag: String,
    pub kind: ElementKind,
    pub input_type: Option<String>,
    pub name: Option<String>,
    /// The element's own label (`label[for]`, wrapping label, aria, placeholder)
    pub label: String,
    /// Heading text of the enclosing question block, if any
    pub context: String,
    /// Visible text, or the value of submit-style inputs
    pub text: String,
    pub value: Option<String>,
    /// Selector of the enclosing form/section
    pub container: Option<String>,
    pub visible: bool,
    pub enabled: bool,
    pub checked: bool,
}

impl ElementInfo {
    /// Visible and enabled.
    pub fn is_interactable(&self) -> bool {
        self.visible && self.enabled
    }
}

/// Extract every interactable element from `html`, in document order.
pub fn extract_form_elements(html: &str) -> Vec<ElementInfo> {
    let doc = Html::parse_document(html);
    let Ok(candidates) = Selector::parse(CANDIDATES) else {
        return Vec::new();
    };

    doc.select(&candidates)
        .filter(|el| input_type(*el).as_deref() != Some("hidden"))
        .map(|el| describe(&doc, el))
        .collect()
}

/// Describe the first element matching `selector`.
pub fn describe_element(html: &str, selector: &str) -> Result<Option<ElementInfo>> {
    let doc = Html::parse_document(html);
    let parsed = parse_selector(selector)?;
    Ok(doc.select(&parsed).next().map(|el| describe(&doc, el)))
}

/// Number of elements matching `selector`.
pub fn count_matches(html: &str, selector: &str) -> Result<usize> {
    let doc = Html::parse_document(html);
    let parsed = parse_selector(selector)?;
    Ok(doc.select(&parsed).count())
}

/// Whether any element matches `selector`.
pub fn contains_selector(html: &str, selector: &str) -> Result<bool> {
    Ok(count_matches(html, selector)? > 0)
}

/// Whitespace-collapsed text a reader would see, without scripts and hidden subtrees.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().filter_map(ElementRef::wrap).any(|anc| {
            matches!(
                anc.value().name(),
                "script" | "style" | "noscript" | "template" | "head"
            ) || has_hidden_marker(anc)
        });
        if !hidden {
            parts.push(&**text);
        }
    }

    collapse(parts.into_iter())
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| BrowserError::InvalidSelector(format!("{selector}: {e}")))
}

fn describe(doc: &Html, el: ElementRef) -> ElementInfo {
    let value = el.value();
    let tag = value.name().to_string();
    let kind = element_kind(el);
    let mut label = own_label(doc, el);
    if label.is_empty() && matches!(kind, ElementKind::Checkbox | ElementKind::Radio) && tag != "input" {
        label = text_of(el);
    }

    ElementInfo {
        selector: stable_selector(doc, el),
        tag,
        kind,
        input_type: input_type(el),
        name: value.attr("name").map(str::to_string),
        label,
        context: question_context(el),
        text: element_text(el, kind),
        value: value.attr("value").map(str::to_string),
        container: container_selector(doc, el),
        visible: statically_visible(el),
        enabled: statically_enabled(el),
        checked: value.attr("checked").is_some() || value.attr("aria-checked") == Some("true"),
    }
}

fn input_type(el: ElementRef) -> Option<String> {
    if el.value().name() != "input" {
        return None;
    }
    Some(
        el.value()
            .attr("type")
            .map_or_else(|| "text".to_string(), str::to_ascii_lowercase),
    )
}

fn element_kind(el: ElementRef) -> ElementKind {
    let value = el.value();
    match value.attr("role") {
        Some("checkbox") => return ElementKind::Checkbox,
        Some("radio") => return ElementKind::Radio,
        Some("textbox") => return ElementKind::TextInput,
        Some("button") if value.name() != "input" => return ElementKind::Button,
        _ => {}
    }

    match value.name() {
        "textarea" => ElementKind::TextInput,
        "select" => ElementKind::Select,
        "button" => ElementKind::Button,
        "input" => match input_type(el).as_deref() {
            Some("checkbox") => ElementKind::Checkbox,
            Some("radio") => ElementKind::Radio,
            Some("submit" | "button" | "image") => ElementKind::Button,
            Some("text" | "email" | "number" | "tel" | "search" | "") => ElementKind::TextInput,
            _ => ElementKind::Other,
        },
        _ => ElementKind::Other,
    }
}

fn element_text(el: ElementRef, kind: ElementKind) -> String {
    let value = el.value();
    if value.name() == "input" {
        if kind == ElementKind::Button {
            return value.attr("value").map_or_else(|| "submit".to_string(), |v| collapse(std::iter::once(v)));
        }
        return String::new();
    }
    let text = text_of(el);
    if text.is_empty() {
        value.attr("aria-label").map(|v| collapse(std::iter::once(v))).unwrap_or_default()
    } else {
        text
    }
}

fn own_label(doc: &Html, el: ElementRef) -> String {
    let value = el.value();

    if let Some(id) = value.id() {
        if let Some(label) = first_match(doc, &attr_selector("label", "for", id)) {
            let text = text_of(label);
            if !text.is_empty() {
                return text;
            }
        }
    }

    if let Some(label) = el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|anc| anc.value().name() == "label")
    {
        let text = text_of(label);
        if !text.is_empty() {
            return text;
        }
    }

    if let Some(aria) = value.attr("aria-label") {
        let text = collapse(std::iter::once(aria));
        if !text.is_empty() {
            return text;
        }
    }

    if let Some(ids) = value.attr("aria-labelledby") {
        let joined = ids
            .split_whitespace()
            .filter_map(|id| first_match(doc, &attr_selector("*", "id", id)))
            .map(text_of)
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
    }

    for attr in ["placeholder", "title"] {
        if let Some(v) = value.attr(attr) {
            let text = collapse(std::iter::once(v));
            if !text.is_empty() {
                return text;
            }
        }
    }

    String::new()
}

fn question_context(el: ElementRef) -> String {
    for anc in el.ancestors().filter_map(ElementRef::wrap) {
        let value = anc.value();
        match value.name() {
            "form" | "body" | "html" => break,
            "fieldset" => {
                let legend = Selector::parse("legend")
                    .ok()
                    .and_then(|sel| anc.select(&sel).next().map(text_of))
                    .unwrap_or_default();
                return truncate(if legend.is_empty() { text_of(anc) } else { legend });
            }
            _ => {}
        }

        let is_question = value.attr("data-automation-id") == Some("questionItem")
            || matches!(value.attr("role"), Some("listitem" | "group" | "radiogroup"))
            || value
                .classes()
                .any(|c| c.contains("question") || c == "form-group");
        if is_question {
            if let Some(aria) = value.attr("aria-label") {
                return truncate(collapse(std::iter::once(aria)));
            }
            let title = Selector::parse("[data-automation-id=\"questionTitle\"]")
                .ok()
                .and_then(|sel| anc.select(&sel).next().map(text_of))
                .unwrap_or_default();
            return truncate(if title.is_empty() { text_of(anc) } else { title });
        }
    }
    String::new()
}

fn container_selector(doc: &Html, el: ElementRef) -> Option<String> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|anc| {
            matches!(anc.value().name(), "form" | "section") || anc.value().attr("role") == Some("form")
        })
        .map(|anc| stable_selector(doc, anc))
}

fn statically_visible(el: ElementRef) -> bool {
    if input_type(el).as_deref() == Some("hidden") {
        return false;
    }
    !std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(has_hidden_marker)
}

fn statically_enabled(el: ElementRef) -> bool {
    let value = el.value();
    if value.attr("disabled").is_some()
        || value.attr("readonly").is_some()
        || value.attr("aria-disabled") == Some("true")
    {
        return false;
    }
    !el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|anc| anc.value().name() == "fieldset" && anc.value().attr("disabled").is_some())
}

fn has_hidden_marker(el: ElementRef) -> bool {
    let value = el.value();
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    value.attr("style").is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    })
}

/// Shortest selector from a fixed preference list that matches `el` first
/// and nothing else; falls back to an `nth-of-type` path from the root.
fn stable_selector(doc: &Html, el: ElementRef) -> String {
    let value = el.value();
    let tag = value.name();
    let mut candidates = Vec::new();

    if let Some(id) = value.id() {
        if is_css_ident(id) {
            candidates.push(format!("#{id}"));
        } else {
            candidates.push(attr_selector(tag, "id", id));
        }
    }
    if let Some(name) = value.attr("name") {
        match (input_type(el).as_deref(), value.attr("value")) {
            (Some("radio" | "checkbox"), Some(v)) => candidates.push(format!(
                "{}[value=\"{}\"]",
                attr_selector(tag, "name", name),
                escape_attr(v)
            )),
            _ => candidates.push(attr_selector(tag, "name", name)),
        }
    }
    if let Some(auto_id) = value.attr("data-automation-id") {
        candidates.push(attr_selector(tag, "data-automation-id", auto_id));
    }
    if let Some(aria) = value.attr("aria-label") {
        candidates.push(attr_selector(tag, "aria-label", aria));
    }

    candidates
        .into_iter()
        .find(|css| matches_only(doc, css, el))
        .unwrap_or_else(|| structural_path(doc, el))
}

fn structural_path(doc: &Html, el: ElementRef) -> String {
    let mut parts = Vec::new();
    let mut current = Some(el);

    while let Some(node) = current {
        let name = node.value().name();
        if node != el {
            if let Some(id) = node.value().id().filter(|id| is_css_ident(id)) {
                let anchor = format!("#{id}");
                if matches_only(doc, &anchor, node) {
                    parts.push(anchor);
                    break;
                }
            }
        }
        if name == "html" {
            parts.push(name.to_string());
            break;
        }
        let index = 1 + node
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|sib| sib.value().name() == name)
            .count();
        parts.push(format!("{name}:nth-of-type({index})"));
        current = node.parent().and_then(ElementRef::wrap);
    }

    parts.reverse();
    parts.join(" > ")
}

fn matches_only(doc: &Html, css: &str, el: ElementRef) -> bool {
    let Ok(selector) = Selector::parse(css) else {
        return false;
    };
    let mut matches = doc.select(&selector);
    matches.next() == Some(el) && matches.next().is_none()
}

fn first_match<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next()
}

fn attr_selector(tag: &str, attr: &str, value: &str) -> String {
    format!("{tag}[{attr}=\"{}\"]", escape_attr(value))
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn text_of(el: ElementRef) -> String {
    collapse(el.text())
}

fn collapse<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: String) -> String {
    if text.chars().count() <= CONTEXT_MAX_CHARS {
        text
    } else {
        text.chars().take(CONTEXT_MAX_CHARS).collect()
    }
}
