//! Interstitial detection.
//!
//! Classifies raw page text into the three states the solvers care about:
//! no gate at all, an automated challenge the delegated capabilities can
//! clear on their own, or an interactive challenge that needs a human.
//! Classification is pure and recomputed on demand.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Kind of anti-automation gate present in a page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    /// Ordinary page; any session used to fetch it is still valid.
    None,
    /// Script-driven interstitial that resolves without user input.
    Automated,
    /// CAPTCHA-style gate requiring interactive proof.
    Interactive,
}

static AUTOMATED_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    build_markers(&[
        r"<title>\s*Just a moment\.\.\.\s*</title>",
        r#"<form[^>]*id="challenge-form""#,
        r"/cdn-cgi/challenge-platform/",
        r"Checking your browser before accessing",
        r"jschl[-_](?:vc|answer)",
        r"window\._cf_chl_opt\s*=",
    ])
});

static INTERACTIVE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    build_markers(&[
        r"cf_captcha_kind",
        r#"class="g-recaptcha""#,
        r#"class="h-captcha""#,
        r#"class="cf-turnstile""#,
        r"<title>\s*Attention Required!",
    ])
});

/// Classify a page body. Interactive markers win over automated ones, since
/// CAPTCHA interstitials embed the same challenge plumbing.
pub fn classify(body: &str) -> ChallengeKind {
    if body.is_empty() {
        return ChallengeKind::None;
    }

    if INTERACTIVE_MARKERS.iter().any(|marker| marker.is_match(body)) {
        ChallengeKind::Interactive
    } else if AUTOMATED_MARKERS.iter().any(|marker| marker.is_match(body)) {
        ChallengeKind::Automated
    } else {
        ChallengeKind::None
    }
}

fn build_markers(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .multi_line(true)
                .dot_matches_new_line(true)
                .build()
                .unwrap_or_else(|err| panic!("invalid detection regex `{pattern}`: {err}"))
        })
        .collect()
}
