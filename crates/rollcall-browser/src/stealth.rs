use rand::Rng;

/// Desktop Chrome user agents to pick from.
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

/// Common desktop viewport sizes
const VIEWPORTS: [(u32, u32); 4] = [(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

/// Hides the automation flag before any page script runs.
pub(crate) const WEBDRIVER_PATCH_JS: &str = r#"
Object.defineProperty(Navigator.prototype, 'webdriver', {
    get: () => false,
    configurable: true,
    enumerable: true,
});
"#;

/// Identity a launched browser presents to pages.
#[derive(Debug, Clone)]
pub struct StealthProfile {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone: String,
}

impl StealthProfile {
    /// Randomized user agent and viewport with a fixed locale and timezone.
    pub fn randomized(locale: &str, timezone: &str) -> Self {
        let mut rng = rand::thread_rng();
        let ua_idx = rng.gen_range(0..USER_AGENTS.len());
        let (width, height) = VIEWPORTS[rng.gen_range(0..VIEWPORTS.len())];

        Self {
            user_agent: USER_AGENTS[ua_idx].to_string(),
            viewport_width: width,
            viewport_height: height,
            locale: locale.to_string(),
            timezone: timezone.to_string(),
        }
    }

    /// `Accept-Language` header value, e.g. `tr-TR,tr;q=0.9`.
    pub fn accept_language(&self) -> String {
        match self.locale.split_once('-') {
            Some((lang, _)) => format!("{},{};q=0.9", self.locale, lang),
            None => self.locale.clone(),
        }
    }

    /// Extra Chrome command line flags.
    pub(crate) fn launch_args(&self) -> Vec<String> {
        vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-first-run".to_string(),
            "--disable-infobars".to_string(),
            format!("--lang={}", self.locale),
            format!("--user-agent={}", self.user_agent),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomized_profile() {
        let profile = StealthProfile::randomized("tr-TR", "Europe/Istanbul");
        assert!(!profile.user_agent.is_empty());
        assert!(profile.viewport_width > 0);
        assert!(profile.viewport_height > 0);
        assert_eq!(profile.timezone, "Europe/Istanbul");
    }

    #[test]
    fn test_profile_variation() {
        // Probabilistic, but 20 draws over four agents all agreeing is vanishingly unlikely
        let profiles: Vec<_> = (0..20)
            .map(|_| StealthProfile::randomized("tr-TR", "Europe/Istanbul"))
            .collect();

        let first_ua = &profiles[0].user_agent;
        let all_same = profiles.iter().all(|p| &p.user_agent == first_ua);
        assert!(!all_same, "Expected variation in user agents");
    }

    #[test]
    fn test_accept_language() {
        let profile = StealthProfile::randomized("tr-TR", "Europe/Istanbul");
        assert_eq!(profile.accept_language(), "tr-TR,tr;q=0.9");

        let profile = StealthProfile::randomized("en", "UTC");
        assert_eq!(profile.accept_language(), "en");
    }

    #[test]
    fn test_launch_args_carry_locale_and_agent() {
        let profile = StealthProfile::randomized("tr-TR", "Europe/Istanbul");
        let args = profile.launch_args();
        assert!(args.contains(&"--lang=tr-TR".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla/5.0")));
    }
}
