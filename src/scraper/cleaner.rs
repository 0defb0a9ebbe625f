use crate::error::ParseError;
use chrono::{NaiveDateTime, TimeDelta};
use regex::Regex;
use ::scraper::Html;
use serde_json::Value;
use std::sync::LazyLock;

// ── Text ──────────────────────────────────────────────────────────────────────

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static TOPIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#[^#]+#").unwrap());
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@[^ ]+ ").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Characters the mobile API leaks into text that never render.
const INVISIBLE: &[char] = &['\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', '\u{feff}'];

/// Strip zero-width characters, decode leftovers (U+FFFD) and control bytes.
/// Never fails: anything unrepresentable is dropped.
pub fn sanitize_text(s: &str) -> String {
    s.chars()
        .filter(|c| !INVISIBLE.contains(c))
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Render an HTML-bearing field to its text content.
/// `"<a href='/n/x'>@x</a> hi<br />"` → `"@x hi"`
pub fn render_html_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    sanitize_text(&text)
}

/// Remove markup, `#topic#` spans and `@mention ` tokens, in that order.
/// Tags go first so a mention or topic hidden inside markup is not left half-removed.
pub fn clean_text(text: &str) -> String {
    let mut current = text.to_string();
    // Removing one pattern can glue together another; stop at the fixpoint.
    for _ in 0..8 {
        let next = clean_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn clean_once(text: &str) -> String {
    let s = TAG_RE.replace_all(text, "");
    let s = TOPIC_RE.replace_all(&s, "");
    let s = MENTION_RE.replace_all(&s, "");
    let s = SPACES_RE.replace_all(&s, " ");
    s.trim().to_string()
}

// ── Counters ──────────────────────────────────────────────────────────────────

/// Parse an engagement counter as the mobile API formats it.
/// "542" → 542 | "1.2万" → 12,000 | "3万+" → 30,000 | "1.5亿" → 150,000,000
///
/// The "+" form is a lower bound upstream; it is read as the bound itself.
pub fn parse_counter(s: &str) -> Result<u64, ParseError> {
    let trimmed = s.trim().replace(',', "");
    let bad = || ParseError::Counter(s.to_string());

    let body = trimmed.strip_suffix('+').unwrap_or(&trimmed);
    let (digits, exp) = if let Some(d) = body.strip_suffix('万') {
        (d, 4)
    } else if let Some(d) = body.strip_suffix('亿') {
        (d, 8)
    } else if body.len() != trimmed.len() {
        // "+" without a unit suffix
        return Err(bad());
    } else {
        return trimmed.parse::<u64>().map_err(|_| bad());
    };

    scale_decimal(digits.trim(), exp).ok_or_else(bad)
}

/// Counters arrive as JSON numbers on most entries and as strings on popular ones.
pub fn parse_counter_value(value: &Value) -> Result<u64, ParseError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| ParseError::Counter(n.to_string())),
        Value::String(s) => parse_counter(s),
        other => Err(ParseError::Counter(other.to_string())),
    }
}

/// `digits × 10^exp`, exact, truncating fraction digits beyond `exp`.
fn scale_decimal(digits: &str, exp: u32) -> Option<u64> {
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let int: u64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let mut frac = String::from(frac_part);
    frac.truncate(exp as usize);
    while frac.len() < exp as usize {
        frac.push('0');
    }
    let frac: u64 = frac.parse().ok()?;

    int.checked_mul(10u64.pow(exp))?.checked_add(frac)
}

// ── Dates ─────────────────────────────────────────────────────────────────────

const DATE_FMT: &str = "%Y-%m-%d";

/// Turn the relative timestamps of the mobile feed into calendar dates.
///
/// "刚刚" → today | "5分钟前" → now − 5 min | "3小时前" → now − 3 h |
/// "昨天 12:30" → yesterday | "06-01" → "{year}-06-01" | anything else unchanged
pub fn normalize_date(created_at: &str, now: NaiveDateTime) -> Result<String, ParseError> {
    let s = created_at.trim();
    let bad = || ParseError::Date(created_at.to_string());

    let delta = if s.contains("刚刚") {
        TimeDelta::zero()
    } else if let Some(n) = count_before(s, "分钟") {
        TimeDelta::try_minutes(n.ok_or_else(bad)?).ok_or_else(bad)?
    } else if let Some(n) = count_before(s, "小时") {
        TimeDelta::try_hours(n.ok_or_else(bad)?).ok_or_else(bad)?
    } else if s.contains("昨天") {
        TimeDelta::days(1)
    } else if s.matches('-').count() == 1 {
        return Ok(format!("{}-{}", now.format("%Y"), s));
    } else {
        return Ok(s.to_string());
    };

    let then = now.checked_sub_signed(delta).ok_or_else(bad)?;
    Ok(then.format(DATE_FMT).to_string())
}

/// `Some(None)` when the marker is present but the count in front of it is not a number.
fn count_before(s: &str, marker: &str) -> Option<Option<i64>> {
    let idx = s.find(marker)?;
    Some(s[..idx].trim().parse::<u32>().ok().map(i64::from))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use tokio_test::assert_err;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("1.2万").unwrap(), 12_000);
        assert_eq!(parse_counter("3万+").unwrap(), 30_000);
        assert_eq!(parse_counter("542").unwrap(), 542);
        assert_eq!(parse_counter("0.29万").unwrap(), 2_900);
        assert_eq!(parse_counter("100万+").unwrap(), 1_000_000);
        assert_eq!(parse_counter("1.5亿").unwrap(), 150_000_000);
        assert_eq!(parse_counter(" 1,024 ").unwrap(), 1_024);
        assert_eq!(parse_counter("1.23456万").unwrap(), 12_345);
    }

    #[test]
    fn test_parse_counter_rejects_garbage() {
        for s in ["", "abc", "万", "12+", "1.2.3万", "-5", "转发"] {
            assert!(
                matches!(parse_counter(s), Err(ParseError::Counter(_))),
                "{s:?} should fail"
            );
        }
    }

    #[test]
    fn test_parse_counter_value() {
        assert_eq!(parse_counter_value(&json!(17)).unwrap(), 17);
        assert_eq!(parse_counter_value(&json!("2万")).unwrap(), 20_000);
        assert_err!(parse_counter_value(&json!(null)));
        assert_err!(parse_counter_value(&json!(-3)));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("<b>hi</b> #topic# @user hello"), "hi hello");
        assert_eq!(
            clean_text("<a href=\"/n/x\">@x</a> 转发 #话题#微博"),
            "转发 微博"
        );
    }

    #[test]
    fn test_clean_text_idempotent() {
        for s in [
            "<b>hi</b> #topic# @user hello",
            "#a<i>#</i>b# @@x  y",
            "plain text",
            "<<a>b> @a @b c",
        ] {
            let once = clean_text(s);
            assert_eq!(clean_text(&once), once, "{s:?}");
        }
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("a\u{200b}b\u{feff}c\u{fffd}\u{7}"), "abc");
        assert_eq!(sanitize_text("line\nnext"), "line\nnext");
    }

    #[test]
    fn test_render_html_text() {
        let html = r#"<a href="/n/someone">@someone</a> 早安<br /><span class="url-icon"><img alt="[心]" src="x.png"></span>"#;
        assert_eq!(render_html_text(html), "@someone 早安");
    }

    #[test]
    fn test_normalize_relative_dates() {
        assert_eq!(normalize_date("刚刚", now()).unwrap(), "2026-03-01");
        assert_eq!(normalize_date("20分钟前", now()).unwrap(), "2026-03-01");
        assert_eq!(normalize_date("45分钟前", now()).unwrap(), "2026-02-28");
        assert_eq!(normalize_date("3小时前", now()).unwrap(), "2026-02-28");
        assert_eq!(normalize_date("昨天 23:10", now()).unwrap(), "2026-02-28");
        assert_eq!(normalize_date("06-01", now()).unwrap(), "2026-06-01");
    }

    #[test]
    fn test_normalize_relative_never_after_reference() {
        let reference = now().date();
        for s in ["刚刚", "1分钟前", "59分钟前", "1小时前", "23小时前", "昨天 00:01"] {
            let out = normalize_date(s, now()).unwrap();
            let d = NaiveDate::parse_from_str(&out, DATE_FMT).unwrap();
            assert!(d <= reference, "{s} → {out}");
        }
    }

    #[test]
    fn test_normalize_absolute_unchanged() {
        assert_eq!(normalize_date("2019-11-05", now()).unwrap(), "2019-11-05");
        assert_eq!(
            normalize_date("Sat Feb 28 10:00:00 +0800 2026", now()).unwrap(),
            "Sat Feb 28 10:00:00 +0800 2026"
        );
    }

    #[test]
    fn test_normalize_bad_count() {
        assert!(matches!(
            normalize_date("几分钟前", now()),
            Err(ParseError::Date(_))
        ));
    }
}
