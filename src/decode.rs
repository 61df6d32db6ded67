use crate::mailbox::InboundMessage;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BR_TAG: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"(?is)<[^>]+>").unwrap();
    static ref NUMERIC_ENTITY: Regex = Regex::new(r"&#(\d+);").unwrap();
    static ref SPACE_RUN: Regex = Regex::new(r"[ \t]+").unwrap();
}

/// Reduce a raw message to one plain-text string, whatever the MIME shape.
/// This stage never fails the pipeline: anything unparseable decodes to an
/// empty string and the extractor handles empty input.
pub fn decode(message: &InboundMessage) -> String {
    let parsed = match mailparse::parse_mail(&message.raw) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Failed to parse message uid {}: {e}", message.uid);
            return String::new();
        }
    };
    let mut out = String::new();
    collect_text(&parsed, &mut out);
    out.trim().to_string()
}

/// Depth-first walk of the MIME tree. text/plain parts are appended as-is,
/// text/html parts are stripped to text, nested multiparts recurse, and
/// anything else falls back to a best-effort body conversion.
fn collect_text(part: &mailparse::ParsedMail, out: &mut String) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_text(sub, out);
        }
        return;
    }

    let mime = part.ctype.mimetype.to_ascii_lowercase();
    let body = match part.get_body() {
        Ok(b) => b,
        Err(e) => {
            log::debug!("Undecodable part ({mime}): {e}");
            return;
        }
    };

    let text = if mime.starts_with("text/html") {
        html_to_text(&body)
    } else {
        // text/plain verbatim; unknown types best-effort as text.
        body
    };

    if !text.trim().is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
}

/// Strip HTML down to readable text: <br> variants become newlines, all
/// other tags are dropped, a small fixed set of entities is decoded, and
/// runs of spaces collapse.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = BR_TAG.replace_all(html, "\n");
    let without_tags = HTML_TAG.replace_all(&with_breaks, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    let decoded = NUMERIC_ENTITY.replace_all(&decoded, |caps: &regex::Captures| {
        caps[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    // Collapse horizontal whitespace per line but keep the line structure
    // the <br> conversion just created.
    decoded
        .lines()
        .map(|line| SPACE_RUN.replace_all(line.trim(), " ").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
