//! Field role resolution.
//!
//! A usable cached mapping is tried first, addressing each stored selector
//! directly. When it is missing, unusable or no longer matches the page, every
//! interactable element is ranked against per-role synonym tiers. Matches in
//! an element's own label rank above matches in its question text, which rank
//! above matches in its `name` attribute.

use crate::error::{FormError, NotFoundReason, Result};
use crate::pattern_store;
use crate::text;
use rollcall_browser::{ElementInfo, ElementKind, FormPage};
use rollcall_core::{DetectionMethod, FieldMapping, FieldRole};
use rollcall_db::field_patterns::FieldPattern;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

const FULL_NAME_TIERS: &[&[&str]] = &[
    &[
        "full name",
        "name surname",
        "student name",
        "ad soyad",
        "ad soyadi",
        "adi soyadi",
        "adiniz soyadiniz",
        "ad ve soyad",
        "adi ve soyadi",
        "isim soyisim",
        "isim soyad",
        "adsoyad",
        "ogrenci adi",
        "tam ad",
    ],
    &["name", "isim", "isminiz", "ad", "adi", "adiniz", "soyad", "soyadi"],
];

const STUDENT_ID_TIERS: &[&[&str]] = &[
    &[
        "student id",
        "student number",
        "student no",
        "ogrenci no",
        "ogrenci numarasi",
        "ogrenci numaraniz",
        "ogrenci numara",
        "okul no",
        "okul numarasi",
        "okul numaraniz",
    ],
    &["id", "number", "no", "numara", "numarasi", "numaraniz"],
];

const ATTENDANCE_TIERS: &[&[&str]] = &[
    &[
        "i was present",
        "i am present",
        "i attended",
        "derse katildim",
        "derste bulundum",
        "katildim",
        "katiliyorum",
        "buradayim",
    ],
    &[
        "present",
        "attend",
        "attended",
        "attendance",
        "here",
        "yoklama",
        "katilim",
        "onay",
        "onayi",
        "onayliyorum",
        "confirm",
    ],
];

const SUBMIT_TIERS: &[&[&str]] = &[&["submit", "gonder", "yaniti gonder", "send", "kaydet"]];

const AFFIRMATIVE: &[&str] = &["evet", "yes", "var", "present", "katildim", "buradayim"];

/// Elements chosen for each role and how they were found.
#[derive(Debug, Clone)]
pub struct ResolvedFields {
    elements: BTreeMap<FieldRole, ElementInfo>,
    /// `LearnedPattern` when the cache answered, `RuleBased` otherwise
    pub detection_method: DetectionMethod,
    /// Pattern confidence, or the share of roles found by discovery
    pub confidence: f64,
    /// A usable cached mapping existed but no longer matched the page
    pub stale_cache: bool,
}

impl ResolvedFields {
    /// Element resolved for `role`; `None` for a skipped optional role.
    #[must_use]
    pub fn get(&self, role: FieldRole) -> Option<&ElementInfo> {
        self.elements.get(&role)
    }

    /// Role-to-selector mapping to store on success.
    #[must_use]
    pub fn mapping(&self) -> FieldMapping {
        self.elements
            .iter()
            .map(|(role, el)| (*role, el.selector.clone()))
            .collect()
    }

    /// Resolved roles in fill order.
    pub fn roles(&self) -> impl Iterator<Item = FieldRole> + '_ {
        self.elements.keys().copied()
    }
}

/// Locates the element for every role on a page.
#[derive(Debug, Clone)]
pub struct FieldResolver {
    usability_threshold: f64,
    submit_hints: Vec<&'static str>,
}

impl FieldResolver {
    /// Resolver that trusts cached mappings at or above `usability_threshold`.
    #[must_use]
    pub fn new(usability_threshold: f64) -> Self {
        Self {
            usability_threshold,
            submit_hints: Vec::new(),
        }
    }

    /// Provider selectors tried for the submit control before label matching.
    #[must_use]
    pub fn with_submit_hints(mut self, hints: &[&'static str]) -> Self {
        self.submit_hints = hints.to_vec();
        self
    }

    /// Resolve every role on `page`, trying `cached` first.
    pub async fn resolve(
        &self,
        page: &dyn FormPage,
        cached: Option<&FieldPattern>,
    ) -> Result<ResolvedFields> {
        let mut stale_cache = false;

        if let Some(pattern) = cached.filter(|p| pattern_store::is_usable(p, self.usability_threshold)) {
            match from_cache(page, &pattern.mapping).await? {
                Some(elements) => {
                    info!(
                        fingerprint = pattern.fingerprint.short(),
                        confidence = pattern.confidence,
                        "Resolved fields from learned pattern"
                    );
                    return Ok(ResolvedFields {
                        elements,
                        detection_method: DetectionMethod::LearnedPattern,
                        confidence: pattern.confidence,
                        stale_cache: false,
                    });
                }
                None => {
                    warn!(
                        fingerprint = pattern.fingerprint.short(),
                        "Learned pattern no longer matches page, rediscovering"
                    );
                    stale_cache = true;
                }
            }
        }

        let elements = self.discover(page).await?;
        #[allow(clippy::cast_precision_loss)]
        let confidence = elements.len() as f64 / FieldRole::ALL.len() as f64;
        info!(
            roles = elements.len(),
            confidence, "Resolved fields by label matching"
        );
        Ok(ResolvedFields {
            elements,
            detection_method: DetectionMethod::RuleBased,
            confidence,
            stale_cache,
        })
    }

    async fn discover(&self, page: &dyn FormPage) -> Result<BTreeMap<FieldRole, ElementInfo>> {
        let elements: Vec<ElementInfo> = page
            .form_elements()
            .await?
            .into_iter()
            .filter(ElementInfo::is_interactable)
            .collect();

        let hinted_submit = self.hinted_submit(page).await?;

        let mut resolved: BTreeMap<FieldRole, usize> = BTreeMap::new();
        let mut taken: HashSet<String> = HashSet::new();
        let mut deferred: Vec<(FieldRole, Vec<usize>)> = Vec::new();

        if let Some(hint) = &hinted_submit {
            taken.insert(hint.selector.clone());
        }

        for role in FieldRole::ALL {
            if role == FieldRole::SubmitControl && hinted_submit.is_some() {
                continue;
            }
            let best = best_candidates(role, &elements, &taken);
            match best.len() {
                0 if role.is_optional() => {
                    debug!(role = %role, "Optional role not present");
                }
                0 => {
                    return Err(FormError::FieldNotFound {
                        role,
                        reason: NotFoundReason::Missing,
                    })
                }
                1 => {
                    taken.insert(elements[best[0]].selector.clone());
                    resolved.insert(role, best[0]);
                }
                _ => deferred.push((role, best)),
            }
        }

        // Ties go to the candidate sharing a container with a resolved role.
        let anchor = resolved
            .values()
            .find_map(|&i| elements[i].container.clone())
            .or_else(|| hinted_submit.as_ref().and_then(|h| h.container.clone()));
        for (role, candidates) in deferred {
            let same_container: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&i| !taken.contains(&elements[i].selector))
                .filter(|&i| anchor.is_some() && elements[i].container == anchor)
                .collect();
            if same_container.len() == 1 {
                taken.insert(elements[same_container[0]].selector.clone());
                resolved.insert(role, same_container[0]);
            } else if role.is_optional() {
                warn!(role = %role, candidates = candidates.len(), "Ambiguous optional role skipped");
            } else {
                return Err(FormError::FieldNotFound {
                    role,
                    reason: NotFoundReason::Ambiguous {
                        candidates: candidates.len(),
                    },
                });
            }
        }

        let mut out: BTreeMap<FieldRole, ElementInfo> = resolved
            .into_iter()
            .map(|(role, i)| (role, elements[i].clone()))
            .collect();
        if let Some(hint) = hinted_submit {
            out.insert(FieldRole::SubmitControl, hint);
        }
        for (role, el) in &out {
            debug!(role = %role, selector = %el.selector, "Resolved role");
        }
        Ok(out)
    }

    async fn hinted_submit(&self, page: &dyn FormPage) -> Result<Option<ElementInfo>> {
        for hint in &self.submit_hints {
            if let Some(el) = page.element_state(hint).await? {
                if el.is_interactable() {
                    return Ok(Some(el));
                }
            }
        }
        Ok(None)
    }
}

/// Address every cached selector; `None` if any fails to match a usable
/// element of the right kind or a required role is absent from the mapping.
async fn from_cache(
    page: &dyn FormPage,
    mapping: &FieldMapping,
) -> Result<Option<BTreeMap<FieldRole, ElementInfo>>> {
    if FieldRole::ALL
        .iter()
        .any(|role| !role.is_optional() && !mapping.contains_key(role))
    {
        return Ok(None);
    }

    let mut elements = BTreeMap::new();
    for (role, selector) in mapping {
        let Some(el) = page.element_state(selector).await? else {
            debug!(role = %role, selector = %selector, "Cached selector matches nothing");
            return Ok(None);
        };
        if !el.is_interactable() || !kind_fits(*role, el.kind) {
            debug!(role = %role, selector = %selector, "Cached selector matches unusable element");
            return Ok(None);
        }
        elements.insert(*role, el);
    }
    Ok(Some(elements))
}

fn kind_fits(role: FieldRole, kind: ElementKind) -> bool {
    match role {
        FieldRole::FullName | FieldRole::StudentId => kind == ElementKind::TextInput,
        FieldRole::AttendanceAcknowledgement => {
            matches!(kind, ElementKind::Checkbox | ElementKind::Radio)
        }
        FieldRole::SubmitControl => kind == ElementKind::Button,
    }
}

/// Indices of the untaken elements sharing the best rank for `role`.
fn best_candidates(role: FieldRole, elements: &[ElementInfo], taken: &HashSet<String>) -> Vec<usize> {
    let ranked: Vec<(usize, usize)> = elements
        .iter()
        .enumerate()
        .filter(|(_, el)| !taken.contains(&el.selector) && kind_fits(role, el.kind))
        .filter_map(|(i, el)| rank(role, el).map(|r| (i, r)))
        .collect();

    let Some(best) = ranked.iter().map(|(_, r)| *r).min() else {
        return Vec::new();
    };
    ranked
        .into_iter()
        .filter(|(_, r)| *r == best)
        .map(|(i, _)| i)
        .collect()
}

/// Lower is better; `None` means the element is not a candidate.
fn rank(role: FieldRole, el: &ElementInfo) -> Option<usize> {
    let tiers = match role {
        FieldRole::FullName => FULL_NAME_TIERS,
        FieldRole::StudentId => STUDENT_ID_TIERS,
        FieldRole::AttendanceAcknowledgement => ATTENDANCE_TIERS,
        FieldRole::SubmitControl => SUBMIT_TIERS,
    };
    let label = text::tokens(&el.label);
    let context = text::tokens(&el.context);
    let name = el.name.as_deref().map(text::tokens).unwrap_or_default();
    let n = tiers.len();

    match role {
        FieldRole::SubmitControl => {
            let shown = text::tokens(&format!("{} {}", el.label, el.text));
            tier_of(tiers, &shown)
                .or_else(|| (el.input_type.as_deref() == Some("submit")).then_some(n))
        }
        FieldRole::AttendanceAcknowledgement if el.kind == ElementKind::Radio => {
            // A radio only counts when it is the affirmative answer.
            tier_of(tiers, &label).or_else(|| {
                let affirmative = AFFIRMATIVE.iter().any(|a| text::has_phrase(&label, a));
                if affirmative {
                    tier_of(tiers, &context).map(|t| t + n)
                } else {
                    None
                }
            })
        }
        _ => tier_of(tiers, &label)
            .or_else(|| tier_of(tiers, &context).map(|t| t + n))
            .or_else(|| tier_of(tiers, &name).map(|t| t + 2 * n)),
    }
}

fn tier_of(tiers: &[&[&str]], tokens: &[String]) -> Option<usize> {
    tiers
        .iter()
        .position(|phrases| phrases.iter().any(|p| text::has_phrase(tokens, p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_browser::fixture::FixturePage;
    use rollcall_core::{FormFingerprint, FormProvider};

    const URL: &str = "https://forms.example.test/f/1";

    fn page(body: &str) -> FixturePage {
        FixturePage::new(URL, format!("<html><body>{body}</body></html>"))
    }

    fn basic_form() -> FixturePage {
        page(
            r#"<form id="att">
                 <label for="fn">Full Name</label><input id="fn" type="text">
                 <label for="sid">Student ID</label><input id="sid" type="text">
                 <label><input type="checkbox" id="here"> I was present</label>
                 <button type="submit">Submit</button>
               </form>"#,
        )
    }

    fn pattern(mapping: FieldMapping, confidence: f64) -> FieldPattern {
        let now = chrono::Utc::now();
        FieldPattern {
            id: "p1".to_string(),
            fingerprint: FormFingerprint::new("c".repeat(64)).unwrap(),
            provider: FormProvider::Unknown,
            mapping,
            success_count: 1,
            failure_count: 0,
            confidence,
            authoritative: true,
            created_at: now,
            last_used_at: now,
        }
    }

    fn resolver() -> FieldResolver {
        FieldResolver::new(0.6)
    }

    #[tokio::test]
    async fn test_discovers_all_four_roles() {
        let page = basic_form();
        let fields = resolver().resolve(&page, None).await.unwrap();

        assert_eq!(fields.detection_method, DetectionMethod::RuleBased);
        assert!((fields.confidence - 1.0).abs() < 1e-9);
        assert_eq!(fields.get(FieldRole::FullName).unwrap().selector, "#fn");
        assert_eq!(fields.get(FieldRole::StudentId).unwrap().selector, "#sid");
        assert_eq!(
            fields.get(FieldRole::AttendanceAcknowledgement).unwrap().selector,
            "#here"
        );
        assert_eq!(fields.get(FieldRole::SubmitControl).unwrap().kind, ElementKind::Button);
    }

    #[tokio::test]
    async fn test_turkish_labels() {
        let page = page(
            r#"<form>
                 <label for="a">ADINIZ SOYADINIZ</label><input id="a">
                 <label for="b">Öğrenci Numaranız</label><input id="b">
                 <label><input type="checkbox" name="k"> Derse katıldım</label>
                 <button>Gönder</button>
               </form>"#,
        );
        let fields = resolver().resolve(&page, None).await.unwrap();
        assert_eq!(fields.get(FieldRole::FullName).unwrap().selector, "#a");
        assert_eq!(fields.get(FieldRole::StudentId).unwrap().selector, "#b");
        assert!(fields.get(FieldRole::AttendanceAcknowledgement).is_some());
        assert!(fields.get(FieldRole::SubmitControl).is_some());
    }

    #[tokio::test]
    async fn test_id_does_not_match_inside_words() {
        let page = page(
            r#"<form>
                 <label for="a">Name</label><input id="a">
                 <label for="v">Valid email</label><input id="v">
                 <button>Submit</button>
               </form>"#,
        );
        let err = resolver().resolve(&page, None).await.unwrap_err();
        assert!(matches!(
            err,
            FormError::FieldNotFound {
                role: FieldRole::StudentId,
                reason: NotFoundReason::Missing
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_attendance_is_skipped() {
        let page = page(
            r#"<form>
                 <input id="a" placeholder="Full name">
                 <input id="b" placeholder="Student number">
                 <input type="submit" value="Send">
               </form>"#,
        );
        let fields = resolver().resolve(&page, None).await.unwrap();
        assert!(fields.get(FieldRole::AttendanceAcknowledgement).is_none());
        assert!((fields.confidence - 0.75).abs() < 1e-9);
        assert!(!fields.mapping().contains_key(&FieldRole::AttendanceAcknowledgement));
    }

    #[tokio::test]
    async fn test_ambiguous_name_resolved_by_container() {
        let page = page(
            r#"<section id="newsletter"><label for="n2">Name</label><input id="n2"></section>
               <form id="att">
                 <label for="n1">Name</label><input id="n1">
                 <label for="s">Student ID</label><input id="s">
                 <button>Submit</button>
               </form>"#,
        );
        let fields = resolver().resolve(&page, None).await.unwrap();
        assert_eq!(fields.get(FieldRole::FullName).unwrap().selector, "#n1");
    }

    #[tokio::test]
    async fn test_ambiguous_required_role_fails() {
        let page = page(
            r#"<form>
                 <label for="a">Name</label><input id="a">
                 <label for="b">Name</label><input id="b">
                 <label for="s">Student ID</label><input id="s">
                 <button>Submit</button>
               </form>"#,
        );
        let err = resolver().resolve(&page, None).await.unwrap_err();
        assert!(matches!(
            err,
            FormError::FieldNotFound {
                role: FieldRole::FullName,
                reason: NotFoundReason::Ambiguous { candidates: 2 }
            }
        ));
    }

    #[tokio::test]
    async fn test_affirmative_radio_for_attendance() {
        let page = page(
            r#"<form>
                 <label for="a">Full name</label><input id="a">
                 <label for="b">Student ID</label><input id="b">
                 <fieldset><legend>Derse katılım</legend>
                   <label><input type="radio" name="att" value="1"> Evet</label>
                   <label><input type="radio" name="att" value="0"> Hayır</label>
                 </fieldset>
                 <button>Submit</button>
               </form>"#,
        );
        let fields = resolver().resolve(&page, None).await.unwrap();
        let att = fields.get(FieldRole::AttendanceAcknowledgement).unwrap();
        assert_eq!(att.kind, ElementKind::Radio);
        assert_eq!(att.value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_cached_mapping_skips_discovery() {
        let page = basic_form();
        let mut mapping = FieldMapping::new();
        mapping.insert(FieldRole::FullName, "#fn".to_string());
        mapping.insert(FieldRole::StudentId, "#sid".to_string());
        mapping.insert(FieldRole::AttendanceAcknowledgement, "#here".to_string());
        mapping.insert(FieldRole::SubmitControl, "#att > button:nth-of-type(1)".to_string());

        let fields = resolver()
            .resolve(&page, Some(&pattern(mapping, 0.667)))
            .await
            .unwrap();
        assert_eq!(fields.detection_method, DetectionMethod::LearnedPattern);
        assert!(!fields.stale_cache);
        assert_eq!(page.discovery_calls(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_cache_is_ignored() {
        let page = basic_form();
        let mut mapping = FieldMapping::new();
        mapping.insert(FieldRole::FullName, "#fn".to_string());
        mapping.insert(FieldRole::StudentId, "#sid".to_string());
        mapping.insert(FieldRole::SubmitControl, "button".to_string());

        let fields = resolver()
            .resolve(&page, Some(&pattern(mapping, 0.5)))
            .await
            .unwrap();
        assert_eq!(fields.detection_method, DetectionMethod::RuleBased);
        assert!(!fields.stale_cache);
        assert_eq!(page.discovery_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_falls_back_to_discovery() {
        let page = basic_form();
        let mut mapping = FieldMapping::new();
        mapping.insert(FieldRole::FullName, "#gone".to_string());
        mapping.insert(FieldRole::StudentId, "#sid".to_string());
        mapping.insert(FieldRole::SubmitControl, "button".to_string());

        let fields = resolver()
            .resolve(&page, Some(&pattern(mapping, 0.9)))
            .await
            .unwrap();
        assert_eq!(fields.detection_method, DetectionMethod::RuleBased);
        assert!(fields.stale_cache);
        assert_eq!(fields.get(FieldRole::FullName).unwrap().selector, "#fn");
    }

    #[tokio::test]
    async fn test_cached_selector_of_wrong_kind_is_stale() {
        let page = basic_form();
        let mut mapping = FieldMapping::new();
        mapping.insert(FieldRole::FullName, "#here".to_string());
        mapping.insert(FieldRole::StudentId, "#sid".to_string());
        mapping.insert(FieldRole::SubmitControl, "button".to_string());

        let fields = resolver()
            .resolve(&page, Some(&pattern(mapping, 0.9)))
            .await
            .unwrap();
        assert!(fields.stale_cache);
    }

    #[tokio::test]
    async fn test_submit_hint_wins() {
        let page = page(
            r#"<form>
                 <label for="a">Full name</label><input id="a">
                 <label for="b">Student ID</label><input id="b">
                 <button data-automation-id="submitButton">Devam</button>
                 <button>Submit feedback</button>
               </form>"#,
        );
        let fields = FieldResolver::new(0.6)
            .with_submit_hints(&["button[data-automation-id=\"submitButton\"]"])
            .resolve(&page, None)
            .await
            .unwrap();
        assert_eq!(fields.get(FieldRole::SubmitControl).unwrap().text, "Devam");
    }

    #[tokio::test]
    async fn test_disabled_inputs_are_not_candidates() {
        let page = page(
            r#"<form>
                 <label for="a">Full name</label><input id="a" disabled>
                 <label for="b">Student ID</label><input id="b">
                 <button>Submit</button>
               </form>"#,
        );
        let err = resolver().resolve(&page, None).await.unwrap_err();
        assert!(matches!(err, FormError::FieldNotFound { role: FieldRole::FullName, .. }));
    }
}
