//! Denylist-driven tweet cleaning.
//!
//! Fields listed in [`DENYLIST`] break columnar ingestion downstream (nested
//! arrays of arrays, per-country lists, theme colours with inconsistent
//! types). They are removed from the tweet and, recursively, from every
//! quoted or retweeted tweet it embeds.

use serde_json::Value;

use crate::tweet::{Object, Tweet};

/// `(dotted field path, reason)` pairs stripped from every tweet.
pub const DENYLIST: &[(&str, &str)] = &[
    ("coordinates", "GeoJSON point with nested coordinate arrays"),
    ("entities", "variable-shape entity arrays"),
    ("extended_entities", "variable-shape media arrays"),
    ("withheld_in_countries", "per-country list"),
    ("user.profile_background_color", "theme colour"),
    ("user.profile_link_color", "theme colour"),
    ("user.profile_sidebar_border_color", "theme colour"),
    ("user.profile_sidebar_fill_color", "theme colour"),
    ("user.profile_text_color", "theme colour"),
    ("place.attributes", "free-form key/value map"),
    ("place.bounding_box", "polygon with nested coordinate arrays"),
    ("place.geometry", "polygon with nested coordinate arrays"),
];

/// Applies a denylist to tweets.
#[derive(Debug, Clone, Copy)]
pub struct Cleaner {
    rules: &'static [(&'static str, &'static str)],
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new(DENYLIST)
    }
}

impl Cleaner {
    pub fn new(rules: &'static [(&'static str, &'static str)]) -> Self {
        Self { rules }
    }

    /// Strip every denylisted field from `tweet` and its nested tweets.
    pub fn clean(&self, tweet: &mut Tweet) {
        for (path, _) in self.rules {
            strip(tweet, path);
        }
        for nested in tweet.nested_mut() {
            self.clean(nested);
        }
    }

    /// Denylisted paths still present anywhere in `tweet`, prefixed with the
    /// nesting route (e.g. `retweeted_status.user.profile_text_color`).
    pub fn violations(&self, tweet: &Tweet) -> Vec<String> {
        let mut found = Vec::new();
        self.collect_violations(tweet, "", &mut found);
        found
    }

    fn collect_violations(&self, tweet: &Tweet, route: &str, found: &mut Vec<String>) {
        for (path, _) in self.rules {
            if contains(tweet, path) {
                found.push(format!("{route}{path}"));
            }
        }
        if let Some(q) = &tweet.quoted_status {
            self.collect_violations(q, &format!("{route}quoted_status."), found);
        }
        if let Some(rt) = &tweet.retweeted_status {
            self.collect_violations(rt, &format!("{route}retweeted_status."), found);
        }
    }
}

/// Clean with the default denylist.
pub fn clean(tweet: &mut Tweet) {
    Cleaner::default().clean(tweet);
}

fn strip(tweet: &mut Tweet, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    match segments.as_slice() {
        ["user"] => tweet.user = None,
        ["place"] => tweet.place = None,
        ["text"] => tweet.text = None,
        ["user", rest @ ..] => {
            if let Some(user) = tweet.user.as_mut() {
                remove_path(user, rest);
            }
        }
        ["place", rest @ ..] => {
            if let Some(place) = tweet.place.as_mut() {
                remove_path(place, rest);
            }
        }
        all => remove_path(&mut tweet.other, all),
    }
}

fn remove_path(obj: &mut Object, segments: &[&str]) {
    match segments {
        [] => {}
        [last] => {
            obj.remove(*last);
        }
        [head, rest @ ..] => {
            if let Some(Value::Object(inner)) = obj.get_mut(*head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn contains(tweet: &Tweet, path: &str) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    let (obj, rest) = match segments.as_slice() {
        ["user"] => return tweet.user.is_some(),
        ["place"] => return tweet.place.is_some(),
        ["text"] => return tweet.text.is_some(),
        ["user", rest @ ..] => match &tweet.user {
            Some(u) => (u, rest),
            None => return false,
        },
        ["place", rest @ ..] => match &tweet.place {
            Some(p) => (p, rest),
            None => return false,
        },
        all => (&tweet.other, all),
    };
    contains_path(obj, rest)
}

fn contains_path(obj: &Object, segments: &[&str]) -> bool {
    match segments {
        [] => false,
        [last] => obj.contains_key(*last),
        [head, rest @ ..] => match obj.get(*head) {
            Some(Value::Object(inner)) => contains_path(inner, rest),
            _ => false,
        },
    }
}
