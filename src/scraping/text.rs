//! Plain-text cleanup and contact extraction.
//!
//! Contact details on the portals show up in raw markup, in rendered text
//! and in obfuscated forms ("name (at) firma.de", "E-Mail: …"), so each
//! extractor runs several regex passes and then filters the union for
//! plausibility.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

pub const MAX_EMAILS: usize = 5;
pub const MAX_PHONES: usize = 5;

const PLACEHOLDER_DOMAINS: [&str; 2] = ["example.com", "test.com"];
const ASSET_SUFFIXES: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

/// German area codes (without the trunk `0`) accepted by the landline pass.
const AREA_CODES: &str = "30|40|69|89|201|202|203|208|209|211|212|214|221|228|231|234|241|251|261|271|281|291|301|331|335|340|341|345|351|355|361|365|371|375|381|385|391|395|421|431|441|451|461|471|481|491|511|521|531|541|551|561|571|581|591|611|621|631|641|651|661|671|681|691|711|721|731|741|751|761|771|781|791|811|821|831|841|851|861|871|881|906|911|921|931|941|951|961|971|981|991";

/// Elements whose text never reaches the reader.
pub const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

static INLINE_SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"window\.[\w$.]+\s*=\s*[^;]*;|(?:\b(?:var|let|const)\s+)?[A-Za-z_$][\w$.]*\s*=\s*[^;\s]+\s*;")
        .expect("valid inline script regex")
});
static DISALLOWED_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\w\s.,;:!?@()\-/+&'"%€§äöüÄÖÜß]"#).expect("valid charset regex")
});
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid email regex")
});
static SPACED_EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+\s*(?:@|\(at\)|\[at\])\s*[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
        .expect("valid spaced email regex")
});
static LABELED_EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)e-?mail\s*:?\s*[a-z0-9._%+-]+\s*@\s*[a-z0-9.-]+\.[a-z]{2,}")
        .expect("valid labeled email regex")
});
static EMAIL_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^e-?mail\s*:?\s*").expect("valid email label regex"));
static STRICT_EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("valid strict email regex")
});

static LANDLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b0(?:{AREA_CODES})(?:\s?/\s?|[\s-])?\d{{3,9}}(?:-\d{{1,5}})?\b"
    ))
    .expect("valid landline regex")
});
static MOBILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+49\s?|\b0)1[5-7]\d(?:\s?/\s?|[\s-])?\d{3,4}[\s-]?\d{3,5}\b")
        .expect("valid mobile regex")
});
static INTERNATIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+49\s?(?:\(0\)\s?)?\d{2,5}(?:\s?/\s?|[\s-])?\d{3,10}\b")
        .expect("valid international regex")
});
static GENERIC_PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b0\d{2,5}(?:\s?/\s?|[\s-])?\d{3,8}(?:-\d{1,5})?\b").expect("valid phone regex")
});

/// Turn raw page markup into a single line of readable text.
///
/// The markup goes through the HTML parser, so entities come out decoded.
pub fn clean_html(raw: &str) -> String {
    let document = Html::parse_document(raw);
    let text = rendered_text(document.root_element());
    let without_scripts = INLINE_SCRIPT_RE.replace_all(&text, " ");
    let restricted = DISALLOWED_CHARS_RE.replace_all(&without_scripts, " ");
    collapse_whitespace(&restricted)
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

/// Cut `text` to `max_chars` characters, marking the cut with `...`.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

/// Text nodes under `root` outside [`HIDDEN_ELEMENTS`], space separated.
pub fn rendered_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

/// Strict address check applied to every extracted or stored email.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.to_lowercase();
    if !(5..=100).contains(&email.len()) || !email.contains('@') || !email.contains('.') {
        return false;
    }
    let Some((_, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if PLACEHOLDER_DOMAINS
        .iter()
        .any(|p| domain == *p || domain.ends_with(&format!(".{p}")))
    {
        return false;
    }
    if ASSET_SUFFIXES.iter().any(|s| domain.ends_with(s)) {
        return false;
    }
    STRICT_EMAIL_RE.is_match(&email)
}

fn normalize_email(candidate: &str) -> String {
    let unlabeled = EMAIL_LABEL_RE.replace(candidate.trim(), "");
    let joined: String = unlabeled
        .replace("(at)", "@")
        .replace("[at]", "@")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let mut email = joined.to_lowercase();
    while let Some(rest) = email.strip_prefix("%20") {
        email = rest.to_string();
    }
    email.trim_end_matches(['.', '-']).to_string()
}

/// Extract up to [`MAX_EMAILS`] distinct, plausible addresses in first-seen order.
pub fn extract_emails(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut emails = Vec::new();

    let candidates = EMAIL_RE
        .find_iter(text)
        .chain(SPACED_EMAIL_RE.find_iter(text))
        .chain(LABELED_EMAIL_RE.find_iter(text))
        .map(|m| normalize_email(m.as_str()));

    for email in candidates {
        if !is_valid_email(&email) || !seen.insert(email.clone()) {
            continue;
        }
        emails.push(email);
        if emails.len() == MAX_EMAILS {
            break;
        }
    }
    emails
}

/// Digit-count and shape check for a phone candidate.
pub fn is_plausible_phone(candidate: &str) -> bool {
    let trimmed = candidate.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if !(6..=15).contains(&digits.len()) {
        return false;
    }
    let digits_only = trimmed.chars().all(|c| c.is_ascii_digit());
    if digits_only && digits.len() > 12 {
        return false;
    }
    let year_shaped = trimmed.len() == 4 && (trimmed.starts_with("19") || trimmed.starts_with("20"));
    !year_shaped
}

/// Extract up to [`MAX_PHONES`] distinct German phone numbers.
///
/// Numbers are deduplicated on their digits, keeping the first spelling seen.
pub fn extract_phone_numbers(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut phones = Vec::new();

    let candidates = LANDLINE_RE
        .find_iter(text)
        .chain(MOBILE_RE.find_iter(text))
        .chain(INTERNATIONAL_RE.find_iter(text))
        .chain(GENERIC_PHONE_RE.find_iter(text))
        .map(|m| m.as_str().trim());

    for phone in candidates {
        if !is_plausible_phone(phone) {
            continue;
        }
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if !seen.insert(digits) {
            continue;
        }
        phones.push(phone.to_string());
        if phones.len() == MAX_PHONES {
            break;
        }
    }
    phones
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_html_drops_scripts_styles_and_tags() {
        let raw = r#"<html><head><style>.a{color:red}</style>
            <script>var tracking = {"id": 1};</script></head>
            <body><h1>Ausbildung&nbsp;zum Koch</h1><p>Start: <b>01.08.2026</b></p></body></html>"#;
        assert_eq!(clean_html(raw), "Ausbildung zum Koch Start: 01.08.2026");
    }

    #[test]
    fn clean_html_strips_inline_assignments() {
        let raw = "Willkommen window.cmp_id=123456789; bei uns cmpVersion=2; heute";
        assert_eq!(clean_html(raw), "Willkommen bei uns heute");
    }

    #[test]
    fn clean_html_keeps_german_text() {
        assert_eq!(
            clean_html("<p>Größe &amp; Qualität ★ für Bäcker</p>"),
            "Größe & Qualität für Bäcker"
        );
    }

    #[test]
    fn clean_html_decodes_named_and_numeric_entities() {
        assert_eq!(
            clean_html("<p>Gr&ouml;&szlig;e &auml;ndern, M&#252;nchen</p>"),
            "Größe ändern, München"
        );
        assert_eq!(clean_html("<p>Kontakt&#x3A; B&uuml;ro &lt;Nord&gt;</p>"), "Kontakt: Büro Nord");
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc...");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn extracts_labeled_contact_email() {
        assert_eq!(
            extract_emails("Kontakt: beratung@ludwig-fresenius.de"),
            vec!["beratung@ludwig-fresenius.de"]
        );
    }

    #[test]
    fn extracts_spaced_and_obfuscated_emails() {
        let text = "E-Mail: Bewerbung @ Firma-Mueller.de oder personal (at) stadtwerke.de";
        assert_eq!(
            extract_emails(text),
            vec!["bewerbung@firma-mueller.de", "personal@stadtwerke.de"]
        );
    }

    #[test]
    fn email_extraction_dedups_and_filters_placeholders() {
        let text = "info@firma.de INFO@FIRMA.DE contact@example.com logo@2x.png a@b.c \
                    <a href=\"mailto:%20jobs@firma.de\">";
        assert_eq!(extract_emails(text), vec!["info@firma.de", "jobs@firma.de"]);
    }

    #[test]
    fn email_extraction_caps_results() {
        let text = (1..=8)
            .map(|i| format!("person{i}@firma.de"))
            .collect::<Vec<_>>()
            .join(" ");
        let emails = extract_emails(&text);
        assert_eq!(emails.len(), MAX_EMAILS);
        assert_eq!(emails[0], "person1@firma.de");
        assert_eq!(emails[4], "person5@firma.de");
    }

    #[test]
    fn every_extracted_email_is_strictly_valid() {
        let text = "x@y.de sales@test.com foo.bar+jobs@sub.firma.de noreply@@bad..de";
        for email in extract_emails(text) {
            assert!(STRICT_EMAIL_RE.is_match(&email), "{email}");
            assert!(!email.ends_with("@test.com"));
        }
    }

    #[test]
    fn phone_extraction_rejects_non_phone_numerals() {
        let text = "Ungültig: 2147483647, Kontakt 030 12345678";
        assert_eq!(extract_phone_numbers(text), vec!["030 12345678"]);
    }

    #[test]
    fn phone_extraction_handles_mixed_formats() {
        let text = "Contact us at: 030 12345678\n Mobile: +49 151 23456789\n \
                    Office: +49 (0)30 987654321\n Invalid numbers: 2147483647, 1758998199660, 28846464178\n \
                    More JS garbage: window.cmp_id=123456789;\n Year: 2024\n Real phone: 0221 555-1234";
        assert_eq!(
            extract_phone_numbers(text),
            vec!["030 12345678", "0221 555-1234", "+49 151 23456789", "+49 (0)30 987654321"]
        );
    }

    #[test]
    fn phone_boundaries_are_pinned() {
        // Shortest accepted form: area code plus three digits.
        assert_eq!(extract_phone_numbers("Tel. 030 123"), vec!["030 123"]);
        assert!(extract_phone_numbers("Tel. 030 12").is_empty());
        // Local numbers without area code or country prefix are not recognised.
        assert!(extract_phone_numbers("Tel. 12345678").is_empty());
        // Long unseparated digit runs are ids, not phone numbers.
        assert!(extract_phone_numbers("id 0175899819966").is_empty());
        // Postal codes and dates stay out.
        assert!(extract_phone_numbers("01067 Dresden, Beginn 01.09.2026").is_empty());
    }

    #[test]
    fn plausibility_filter_matches_digit_bounds() {
        assert!(is_plausible_phone("0301234"));
        assert!(!is_plausible_phone("2024"));
        assert!(!is_plausible_phone("03012"));
        assert!(!is_plausible_phone("+49 (0)30 1234 5678 9012"));
        assert!(!is_plausible_phone("0123456789012"));
    }

    #[test]
    fn phone_extraction_caps_and_dedups() {
        let text = "030 1111111, 030 1111111, 040 2222222, 069 3333333, 089 4444444, \
                    0211 5555555, 0221 6666666";
        let phones = extract_phone_numbers(text);
        assert_eq!(phones.len(), MAX_PHONES);
        assert_eq!(phones[0], "030 1111111");
        assert_eq!(phones[1], "040 2222222");
    }
}
