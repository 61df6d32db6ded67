use lazy_static::lazy_static;
use regex::Regex;

/// Fields pulled out of one inbound message. Empty string means "unknown":
/// extraction never fails, it just leaves blanks for downstream to tolerate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub apartment: String,
    pub message: String,
}

/// Maximum lines collected into the message when the free-text fallback
/// finds no explicit message section.
const MAX_FALLBACK_MESSAGE_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Email,
    Phone,
    Apartment,
    Message,
}

lazy_static! {
    // Known form labels, Swedish first since that is what the web form
    // emits. Longer variants precede their prefixes (telefonnummer before
    // telefon before tel) so alternation picks the full word.
    static ref LABEL: Regex = Regex::new(
        r"(?im)(^|[^\p{L}\p{N}])(namn|name|e-?post(?:adress)?|e-?mail|email|telefonnummer|telefon|tel|phone|lägenhet(?:snummer)?|lgh|apartment|apt|meddelande|message)\s*:"
    )
    .unwrap();
    // A line of three or more dashes ends the message body; anything after
    // it is form-footer noise.
    static ref TERMINATOR: Regex = Regex::new(r"(?m)^\s*-{3,}\s*$").unwrap();
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap();
    // Optional country code, then 6-12 digits with optional separators.
    static ref PHONE_PATTERN: Regex =
        Regex::new(r"(?:\+\d{1,3}[ \-]?)?\d(?:[ \-]?\d){5,11}").unwrap();
    static ref APARTMENT_PATTERN: Regex = Regex::new(
        r"(?i)(?:lägenhet(?:snummer)?|lgh\.?|apartment|apt\.?)\s*(?:nr\.?\s*)?([0-9]{1,4}\s?[A-Za-zÅÄÖåäö]?|[A-Za-zÅÄÖåäö][0-9]{1,4})"
    )
    .unwrap();
    static ref SIGNATURE_LINE: Regex = Regex::new(
        r"(?i)^\s*(skickat från|skickat med|sent from|sent via|med vänliga? hälsningar|mvh|hälsningar|best regards|kind regards|regards)\b"
    )
    .unwrap();
    static ref EMBEDDED_TAG: Regex = Regex::new(r"(?is)<[^>]+>").unwrap();
}

/// Extract structured fields from decoded message text. Labeled-field
/// parsing runs first; the free-text heuristics fill whatever the labels
/// left blank. Per field, first non-empty strategy wins.
pub fn extract(text: &str, subject: &str) -> ExtractedFields {
    let labeled = labeled_fields(text);
    let fallback = freetext_fields(text, subject);
    merge(labeled, fallback)
}

fn merge(primary: ExtractedFields, fallback: ExtractedFields) -> ExtractedFields {
    let pick = |a: String, b: String| if a.is_empty() { b } else { a };
    ExtractedFields {
        name: pick(primary.name, fallback.name),
        email: pick(primary.email, fallback.email),
        phone: pick(primary.phone, fallback.phone),
        apartment: pick(primary.apartment, fallback.apartment),
        message: pick(primary.message, fallback.message),
    }
}

fn classify_label(label: &str) -> Field {
    let lower = label.to_lowercase();
    if lower.starts_with("namn") || lower == "name" {
        Field::Name
    } else if lower.contains("post") || lower.contains("mail") {
        Field::Email
    } else if lower.starts_with("tel") || lower == "phone" {
        Field::Phone
    } else if lower.starts_with("läg") || lower == "lgh" || lower.starts_with("ap") {
        Field::Apartment
    } else {
        Field::Message
    }
}

/// Labeled-field mode: locate each known label, take the text after it up
/// to the next label or the terminator marker, strip embedded HTML, trim.
/// Single-line fields stop at the line break; the message may span lines.
fn labeled_fields(text: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::default();

    let hits: Vec<(usize, usize, Field)> = LABEL
        .captures_iter(text)
        .map(|caps| {
            let label = caps.get(2).unwrap();
            let whole = caps.get(0).unwrap();
            (label.start(), whole.end(), classify_label(label.as_str()))
        })
        .collect();
    if hits.is_empty() {
        return fields;
    }

    let terminator = TERMINATOR.find(text).map(|m| m.start()).unwrap_or(text.len());

    for (i, &(_, value_start, field)) in hits.iter().enumerate() {
        let next_label = hits
            .get(i + 1)
            .map(|&(start, _, _)| start)
            .unwrap_or(text.len());
        let mut end = next_label.min(terminator).max(value_start);

        if field != Field::Message {
            // Non-message fields are one line each.
            if let Some(nl) = text[value_start..end].find('\n') {
                end = value_start + nl;
            }
        }

        let value = strip_embedded_tags(&text[value_start..end]);
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match field {
            Field::Name => &mut fields.name,
            Field::Email => &mut fields.email,
            Field::Phone => &mut fields.phone,
            Field::Apartment => &mut fields.apartment,
            Field::Message => &mut fields.message,
        };
        if slot.is_empty() {
            *slot = value.to_string();
        }
    }

    fields
}

/// Free-text fallback: line-by-line heuristics over unlabeled messages
/// (people replying directly instead of using the form).
fn freetext_fields(text: &str, subject: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::default();
    let terminator = TERMINATOR.find(text).map(|m| m.start()).unwrap_or(text.len());
    let body = &text[..terminator];

    let mut message_lines: Vec<&str> = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if SIGNATURE_LINE.is_match(trimmed) {
            continue;
        }

        // Label lines belong to the labeled strategy; never fold them into
        // the free-text message.
        let mut metadata = LABEL.is_match(trimmed);
        if fields.email.is_empty() {
            if let Some(m) = EMAIL_PATTERN.find(trimmed) {
                fields.email = m.as_str().to_lowercase();
                metadata = true;
            }
        }
        if fields.phone.is_empty() {
            if let Some(candidate) = find_phone(trimmed) {
                fields.phone = candidate;
                metadata = true;
            }
        }
        if fields.apartment.is_empty() {
            if let Some(caps) = APARTMENT_PATTERN.captures(trimmed) {
                fields.apartment = caps[1].replace(' ', "").to_uppercase();
                metadata = true;
            }
        }

        if !metadata && message_lines.len() < MAX_FALLBACK_MESSAGE_LINES {
            message_lines.push(trimmed);
        }
    }
    fields.message = message_lines.join("\n");

    // The subject line often carries the unit when the body does not.
    if fields.apartment.is_empty() {
        if let Some(caps) = APARTMENT_PATTERN.captures(subject) {
            fields.apartment = caps[1].replace(' ', "").to_uppercase();
        }
    }

    fields
}

/// A phone candidate must be a plausible digit run, not a date or an
/// apartment number: 6-12 digits once separators are dropped.
fn find_phone(line: &str) -> Option<String> {
    for m in PHONE_PATTERN.find_iter(line) {
        let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        if (6..=12).contains(&digits.len()) {
            let normalized = if m.as_str().starts_with('+') {
                format!("+{digits}")
            } else {
                digits
            };
            return Some(normalized);
        }
    }
    None
}

fn strip_embedded_tags(text: &str) -> String {
    EMBEDDED_TAG.replace_all(text, " ").to_string()
}
