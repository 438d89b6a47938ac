//! Detection of interstitial pages in response bodies.

use std::fmt;

use serde::{Deserialize, Serialize};

const CAPTCHA_MARKERS: &[&str] = &[
    "captcha",
    "recaptcha",
    "验证码",
    "人机验证",
    "安全验证",
    "请通过验证",
    "访问验证",
];

const FORBIDDEN_MARKERS: &[&str] = &["forbidden", "access denied"];

/// Label attached to a body that looks like an anti-bot interstitial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskHint {
    /// A captcha or human verification page.
    Captcha,
    /// A forbidden / access denied page.
    Forbidden,
}

impl RiskHint {
    /// Short label ("captcha" | "forbidden").
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Captcha => "captcha",
            Self::Forbidden => "forbidden",
        }
    }
}

impl fmt::Display for RiskHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scans a body for risk markers. Captcha markers win over forbidden ones.
#[must_use]
pub fn detect_risk_hint(body: &str) -> Option<RiskHint> {
    if body.is_empty() {
        return None;
    }
    let lower = body.to_lowercase();
    if CAPTCHA_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(RiskHint::Captcha);
    }
    if FORBIDDEN_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(RiskHint::Forbidden);
    }
    None
}
