use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SubjectError;

// ── Post ──────────────────────────────────────────────────────────────────────

/// One normalized feed item. When `retweet` is set this record is the
/// reposting wrapper and `retweet` is the original it points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: i64,
    #[serde(alias = "user_id")]
    pub author_id: u64,
    #[serde(alias = "screen_name")]
    pub author_name: String,
    pub text: String,
    pub created_at: String,     // "%Y-%m-%d" unless upstream sent something else absolute
    pub source: String,         // client label, e.g. "iPhone客户端"
    pub reposts_count: u64,
    pub comments_count: u64,
    pub attitudes_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retweet: Option<Box<Post>>,
}

impl Post {
    pub fn is_repost(&self) -> bool {
        self.retweet.is_some()
    }

    pub fn engagement(&self) -> u64 {
        self.reposts_count
            .saturating_add(self.comments_count)
            .saturating_add(self.attitudes_count)
    }
}

// ── Related post (keyword search hit) ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedPost {
    pub mid: String,
    pub text: String,
    #[serde(alias = "userid")]
    pub user_id: String,
    #[serde(alias = "username")]
    pub user_name: String,
    pub reposts_count: u64,
    pub comments_count: u64,
    pub attitudes_count: u64,
    pub created_at: String,
}

// ── Profile fields ────────────────────────────────────────────────────────────

/// The closed set of value kinds a profile document carries.
/// Nested objects and arrays (badge lists, menus) are not kept.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileField {
    Numeric(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl ProfileField {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Some(Self::Boolean(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Numeric)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Only text carries encoding debris; other kinds pass through untouched.
    pub fn sanitized(self) -> Self {
        match self {
            Self::Text(s) => Self::Text(crate::scraper::cleaner::sanitize_text(&s)),
            other => other,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Numeric(n) => u64::try_from(*n).ok(),
            Self::Text(s) => crate::scraper::cleaner::parse_counter(s).ok(),
            Self::Float(_) | Self::Boolean(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub type ProfileMap = BTreeMap<String, ProfileField>;

// ── Subject ───────────────────────────────────────────────────────────────────

/// Everything a subject can be constructed with. Roster files and snapshots
/// both deserialize into this before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubjectOptions {
    pub user_name: String,
    pub user_id: u64,
    #[serde(default, deserialize_with = "de_flag")]
    pub filter: bool,
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub statuses_count: Option<u64>,
    #[serde(default)]
    pub follow_count: Option<u64>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub verified_reason: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    pub user_name: String,
    pub user_id: u64,
    #[serde(default)]
    pub filter: bool,

    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub statuses_count: Option<u64>,
    #[serde(default)]
    pub follow_count: Option<u64>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,     // "f" | "m"
    #[serde(default)]
    pub verified_reason: Option<String>,
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, alias = "weibo")]
    pub posts: Vec<Post>,
    #[serde(default, alias = "got_count")]
    pub fetched_count: usize,
    #[serde(default)]
    pub related_posts: Vec<RelatedPost>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_cognition_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_attention_score: Option<f64>,
}

impl Subject {
    pub fn new(opts: SubjectOptions) -> Result<Self, SubjectError> {
        let user_name = opts.user_name.trim().to_string();
        if user_name.is_empty() {
            return Err(SubjectError::EmptyName);
        }
        if opts.user_id == 0 {
            return Err(SubjectError::ZeroId(user_name));
        }

        Ok(Self {
            user_name,
            user_id: opts.user_id,
            filter: opts.filter,
            followers_count: opts.followers_count,
            statuses_count: opts.statuses_count,
            follow_count: opts.follow_count,
            screen_name: opts.screen_name,
            gender: opts.gender,
            verified_reason: opts.verified_reason,
            description: opts.description,
            posts: Vec::new(),
            fetched_count: 0,
            related_posts: Vec::new(),
            norm_cognition_score: None,
            norm_attention_score: None,
        })
    }

    /// Copy the typed profile fields out of a decoded profile document.
    /// Fields absent from the document keep their previous value.
    pub fn apply_profile(&mut self, profile: &ProfileMap) {
        let count = |key: &str| profile.get(key).and_then(ProfileField::as_u64);
        let text = |key: &str| {
            profile
                .get(key)
                .and_then(ProfileField::as_text)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        self.followers_count = count("followers_count").or(self.followers_count);
        self.statuses_count = count("statuses_count").or(self.statuses_count);
        self.follow_count = count("follow_count").or(self.follow_count);
        self.screen_name = text("screen_name").or(self.screen_name.take());
        self.gender = text("gender").or(self.gender.take());
        self.verified_reason = text("verified_reason").or(self.verified_reason.take());
        self.description = text("description").or(self.description.take());
    }

    /// Drop everything a previous crawl accumulated.
    pub fn reset_posts(&mut self) {
        self.posts.clear();
        self.fetched_count = 0;
    }

    pub fn push_post(&mut self, post: Post) {
        self.posts.push(post);
        self.fetched_count += 1;
    }

    pub fn total_engagement(&self) -> u64 {
        self.posts
            .iter()
            .map(Post::engagement)
            .fold(0, u64::saturating_add)
    }
}

// ── Score record ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub user_name: String,
    pub cognition_score: Option<f64>,
    pub attention_score: Option<f64>,
    pub norm_cognition_score: Option<f64>,
    pub norm_attention_score: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub flags: Vec<String>,
}

// ── Serde helpers ─────────────────────────────────────────────────────────────

/// Rosters write the repost filter as 0/1; snapshots as true/false.
fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Unit(()),
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Unit(()) => Ok(false),
        Flag::Bool(b) => Ok(b),
        Flag::Int(n) => Ok(n != 0),
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" => Ok(false),
            "1" | "true" | "yes" => Ok(true),
            other => Err(serde::de::Error::custom(format!("not a flag: {other:?}"))),
        },
    }
}
