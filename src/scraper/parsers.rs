use crate::error::ParseError;
use crate::models::{Post, ProfileField, ProfileMap, RelatedPost};
use crate::scraper::cleaner::{
    clean_text, normalize_date, parse_counter_value, render_html_text, sanitize_text,
};
use chrono::NaiveDateTime;
use serde_json::Value;

/// `card_type` of a card that carries an `mblog`.
pub const POST_CARD: i64 = 9;

// ── Field access ──────────────────────────────────────────────────────────────

fn field<'a>(v: &'a Value, key: &'static str) -> Result<&'a Value, ParseError> {
    v.get(key)
        .filter(|x| !x.is_null())
        .ok_or(ParseError::MissingField(key))
}

fn str_field(v: &Value, key: &'static str) -> Result<String, ParseError> {
    match field(v, key)? {
        Value::String(s) => Ok(sanitize_text(s)),
        other => Err(ParseError::BadField {
            field: key,
            value: other.to_string(),
        }),
    }
}

/// Ids come as numbers on the timeline and as strings on detail pages.
fn id_field(v: &Value, key: &'static str) -> Result<i64, ParseError> {
    let raw = field(v, key)?;
    let parsed = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ParseError::BadField {
        field: key,
        value: raw.to_string(),
    })
}

fn counter_field(v: &Value, key: &'static str) -> Result<u64, ParseError> {
    parse_counter_value(field(v, key)?)
}

fn flag_field(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn author_id(user: &Value) -> Result<u64, ParseError> {
    let id = id_field(user, "id")?;
    u64::try_from(id).map_err(|_| ParseError::BadField {
        field: "id",
        value: id.to_string(),
    })
}

// ── Timeline ──────────────────────────────────────────────────────────────────

/// Cards of a timeline page, in feed order.
pub fn timeline_cards(js: &Value) -> Result<&[Value], ParseError> {
    let cards = field(field(js, "data")?, "cards")?;
    cards.as_array().map(Vec::as_slice).ok_or_else(|| ParseError::BadField {
        field: "cards",
        value: cards.to_string(),
    })
}

pub fn is_post_card(card: &Value) -> bool {
    let t = card.get("card_type");
    t.and_then(Value::as_i64) == Some(POST_CARD)
        || t.and_then(Value::as_str).and_then(|s| s.parse().ok()) == Some(POST_CARD)
}

/// The `mblog` of a post card.
pub fn card_mblog(card: &Value) -> Result<&Value, ParseError> {
    field(card, "mblog")
}

pub fn is_long_text(mblog: &Value) -> bool {
    flag_field(mblog, "isLongText")
}

/// The original a repost points at, if any.
pub fn retweeted_status(mblog: &Value) -> Option<&Value> {
    mblog
        .get("retweeted_status")
        .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
}

pub fn mblog_id(mblog: &Value) -> Result<i64, ParseError> {
    id_field(mblog, "id")
}

pub fn mblog_created_at(mblog: &Value, now: NaiveDateTime) -> Result<String, ParseError> {
    let raw = str_field(mblog, "created_at")?;
    normalize_date(&raw, now)
}

/// Extract one post from an entry body. Never follows `retweeted_status`.
pub fn parse_mblog(mblog: &Value, now: NaiveDateTime) -> Result<Post, ParseError> {
    let user = field(mblog, "user")?;

    let text = match field(mblog, "text")? {
        Value::String(s) => render_html_text(s),
        other => {
            return Err(ParseError::BadField {
                field: "text",
                value: other.to_string(),
            })
        }
    };

    Ok(Post {
        id: mblog_id(mblog)?,
        author_id: author_id(user)?,
        author_name: str_field(user, "screen_name")?,
        text,
        created_at: mblog_created_at(mblog, now)?,
        source: str_field(mblog, "source").unwrap_or_default(),
        reposts_count: counter_field(mblog, "reposts_count")?,
        comments_count: counter_field(mblog, "comments_count")?,
        attitudes_count: counter_field(mblog, "attitudes_count")?,
        retweet: None,
    })
}

// ── Detail page ───────────────────────────────────────────────────────────────

const STATUS_ANCHOR: &str = "\"status\":";
const TAIL_ANCHOR: &str = "\"hotScheme\"";

/// The detail page is HTML with the full post inlined as a JS object literal:
/// `var $render_data = [{ "status": {...}, "hotScheme": ... }]`.
/// Cut from `"status":` to the last `,` before `"hotScheme"` and parse that.
pub fn extract_detail_status(html: &str) -> Result<Value, ParseError> {
    let start = html
        .find(STATUS_ANCHOR)
        .ok_or(ParseError::MissingAnchor(STATUS_ANCHOR))?;
    let rest = &html[start..];

    let end = rest
        .rfind(TAIL_ANCHOR)
        .ok_or(ParseError::MissingAnchor(TAIL_ANCHOR))?;
    let rest = &rest[..end];

    let comma = rest.rfind(',').ok_or(ParseError::MissingAnchor(","))?;
    let fragment = format!("{{{}}}", &rest[..comma]);

    let mut js: Value = serde_json::from_str(&fragment)?;
    js.get_mut("status")
        .map(Value::take)
        .filter(|v| v.is_object())
        .ok_or(ParseError::MissingField("status"))
}

// ── Profile ───────────────────────────────────────────────────────────────────

/// Flatten `data.userInfo` into scalar profile fields, text sanitized.
pub fn parse_profile(js: &Value) -> Result<ProfileMap, ParseError> {
    let info = field(field(js, "data")?, "userInfo")?;
    let obj = info.as_object().ok_or_else(|| ParseError::BadField {
        field: "userInfo",
        value: info.to_string(),
    })?;

    Ok(obj
        .iter()
        .filter_map(|(k, v)| ProfileField::from_json(v).map(|f| (k.clone(), f.sanitized())))
        .collect())
}

// ── Keyword search ────────────────────────────────────────────────────────────

/// Hits of one keyword-search page. Text is stripped of markup, topics and mentions.
pub fn parse_search_page(js: &Value) -> Result<Vec<RelatedPost>, ParseError> {
    let cards = timeline_cards(js)?;
    let Some(first) = cards.first() else {
        return Ok(vec![]);
    };
    let Some(group) = first.get("card_group").and_then(Value::as_array) else {
        return Ok(vec![]);
    };

    group
        .iter()
        .filter_map(|card| card.get("mblog"))
        .map(parse_related)
        .collect()
}

fn parse_related(mblog: &Value) -> Result<RelatedPost, ParseError> {
    let user = field(mblog, "user")?;
    let text = match field(mblog, "text")? {
        Value::String(s) => sanitize_text(&clean_text(s)),
        other => other.to_string(),
    };

    Ok(RelatedPost {
        mid: mblog_id(mblog)?.to_string(),
        text,
        user_id: id_field(user, "id")?.to_string(),
        user_name: str_field(user, "screen_name")?,
        reposts_count: counter_field(mblog, "reposts_count")?,
        comments_count: counter_field(mblog, "comments_count")?,
        attitudes_count: counter_field(mblog, "attitudes_count")?,
        created_at: str_field(mblog, "created_at")?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
