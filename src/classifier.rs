//! Complexity Classifier client: calls the external classification service
//! that backs Routing Engine Strategy D.
//!
//! `CLASSIFIER_URL` unset disables complexity routing entirely rather than
//! erroring — callers treat `None` as "strategy D does not apply", matching
//! the ClassifierError handling described for C7.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    SuperEasy,
    Easy,
    Medium,
    Hard,
    SuperHard,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::SuperEasy => "super_easy",
            ComplexityLevel::Easy => "easy",
            ComplexityLevel::Medium => "medium",
            ComplexityLevel::Hard => "hard",
            ComplexityLevel::SuperHard => "super_hard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "super_easy" => Some(ComplexityLevel::SuperEasy),
            "easy" => Some(ComplexityLevel::Easy),
            "medium" => Some(ComplexityLevel::Medium),
            "hard" => Some(ComplexityLevel::Hard),
            "super_hard" => Some(ComplexityLevel::SuperHard),
            _ => None,
        }
    }
}

fn classifier_url() -> Option<String> {
    std::env::var("CLASSIFIER_URL").ok().filter(|v| !v.is_empty())
}

pub fn enabled() -> bool {
    classifier_url().is_some()
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    message: String,
    context: &'a [String],
    vendor: Option<&'a str>,
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    level: String,
}

static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("classifier http client")
});

/// Classifies a message against prior truncated context. Returns `None` when
/// the classifier is unconfigured or unreachable — callers fall through to
/// the default route rather than failing the request.
pub async fn classify(
    message: &str,
    prior_context: &[String],
    classifier_vendor: Option<&str>,
    classifier_model: Option<&str>,
) -> Option<ComplexityLevel> {
    let base_url = classifier_url()?;
    let body = ClassifyRequest {
        message: message.to_string(),
        context: prior_context,
        vendor: classifier_vendor,
        model: classifier_model,
    };
    let resp = CLIENT
        .post(format!("{}/classify", base_url.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        crate::logger::error("classifier", &format!("classifier returned {}", resp.status()));
        return None;
    }
    let parsed: ClassifyResponse = resp.json().await.ok()?;
    ComplexityLevel::from_str(&parsed.level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_is_monotonic() {
        assert!(ComplexityLevel::SuperEasy < ComplexityLevel::Easy);
        assert!(ComplexityLevel::Easy < ComplexityLevel::Medium);
        assert!(ComplexityLevel::Medium < ComplexityLevel::Hard);
        assert!(ComplexityLevel::Hard < ComplexityLevel::SuperHard);
    }

    #[test]
    fn round_trips_through_str() {
        for level in [
            ComplexityLevel::SuperEasy,
            ComplexityLevel::Easy,
            ComplexityLevel::Medium,
            ComplexityLevel::Hard,
            ComplexityLevel::SuperHard,
        ] {
            assert_eq!(ComplexityLevel::from_str(level.as_str()), Some(level));
        }
    }

    #[test]
    fn disabled_without_url() {
        std::env::remove_var("CLASSIFIER_URL");
        assert!(!enabled());
    }
}
