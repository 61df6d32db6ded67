use crate::extract::ExtractedFields;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Priority ranking among fingerprint strategies. Primary carries the
/// strongest signal (email + apartment), content the weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Primary,
    Secondary,
    Content,
}

/// A fixed-length hex digest over normalized fields, used to recognize the
/// same submission arriving twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub tier: Tier,
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct FingerprintSet {
    pub primary: Option<Fingerprint>,
    pub secondary: Option<Fingerprint>,
    pub content: Option<Fingerprint>,
}

impl FingerprintSet {
    /// Tiers in dedup-check order: strongest signal first.
    pub fn ordered(&self) -> Vec<&Fingerprint> {
        [&self.primary, &self.secondary, &self.content]
            .into_iter()
            .flatten()
            .collect()
    }

    /// The tier stored on a new record: first present, preferring primary.
    pub fn stored(&self) -> Option<&Fingerprint> {
        self.primary
            .as_ref()
            .or(self.secondary.as_ref())
            .or(self.content.as_ref())
    }
}

/// How much of the normalized message feeds the content tier.
const CONTENT_PREFIX_CHARS: usize = 100;

/// Names the web form inserts when the visitor leaves the field blank;
/// they carry no identifying signal and would glue unrelated senders
/// together in the secondary tier.
const PLACEHOLDER_NAMES: &[&str] = &["okand", "unknown", "anonym", "anonymous", "test", "na"];

/// Compute all tiers that have their required inputs. A missing input
/// yields an absent tier, never a digest of the empty string.
pub fn fingerprints(fields: &ExtractedFields) -> FingerprintSet {
    let email = normalize(&fields.email);
    if email.is_empty() {
        // Every tier requires the email; nothing to fingerprint.
        return FingerprintSet::default();
    }

    let apartment = normalize(&fields.apartment);
    let phone = normalize_phone(&fields.phone);
    let name = normalize_name(&fields.name);
    let message = normalize(&fields.message);

    let primary = Some(Fingerprint {
        tier: Tier::Primary,
        hash: digest(&format!("{email}{apartment}")),
    });

    let secondary = Some(Fingerprint {
        tier: Tier::Secondary,
        hash: digest(&format!("{email}{phone}{name}")),
    });

    let content = if message.is_empty() {
        None
    } else {
        let prefix: String = message.chars().take(CONTENT_PREFIX_CHARS).collect();
        Some(Fingerprint {
            tier: Tier::Content,
            hash: digest(&format!("{email}{prefix}")),
        })
    };

    FingerprintSet {
        primary,
        secondary,
        content,
    }
}

/// Lowercase and keep alphanumerics only. "  User@Example.com " and
/// "user@example.com" normalize identically.
fn normalize(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

fn normalize_phone(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn normalize_name(value: &str) -> String {
    let normalized = normalize(value);
    if PLACEHOLDER_NAMES.contains(&normalized.as_str()) {
        String::new()
    } else {
        normalized
    }
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
