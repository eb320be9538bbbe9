//! # Topic filters: MQTT-style patterns over `/`-separated topics.
//!
//! ## Grammar
//! ```text
//! filter := level ("/" level)*
//! level  := "+"            one whole non-empty level
//!         | "#"            everything that follows (at least one char); last level only
//!         | literal        no '+', no '#'; may be empty
//! ```
//!
//! | filter   | matches              | does not match     |
//! |----------|----------------------|--------------------|
//! | `a/+/c`  | `a/b/c`              | `a/b/b/c`, `a//c`  |
//! | `a/#`    | `a/x`, `a/x/y`       | `a`, `a/`          |
//! | `#`      | any non-empty topic  | ``                 |
//!
//! A filter is compiled once into an anchored regular expression; matching is
//! case-sensitive and purely structural.

use std::fmt;

use regex::Regex;

use crate::error::MessagingError;

/// A compiled subscription pattern.
#[derive(Clone)]
pub struct TopicFilter {
    filter: String,
    regex: Regex,
}

impl TopicFilter {
    /// Compiles `filter`; fails with [`MessagingError::InvalidTopicFilter`] if malformed.
    pub fn new(filter: impl Into<String>) -> Result<Self, MessagingError> {
        let filter = filter.into();
        let invalid = |reason| MessagingError::InvalidTopicFilter {
            filter: filter.clone(),
            reason,
        };

        if filter.is_empty() {
            return Err(invalid("empty filter"));
        }

        let levels: Vec<&str> = filter.split('/').collect();
        let last = levels.len() - 1;
        let mut pattern = String::with_capacity(filter.len() * 2 + 2);
        pattern.push('^');
        for (i, level) in levels.iter().enumerate() {
            if i > 0 {
                pattern.push('/');
            }
            match *level {
                "+" => pattern.push_str("[^/]+"),
                "#" if i == last => pattern.push_str(".+"),
                "#" => return Err(invalid("'#' is only allowed as the last level")),
                l if l.contains(['+', '#']) => {
                    return Err(invalid("wildcards must occupy a whole level"));
                }
                l => pattern.push_str(&regex::escape(l)),
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|_| invalid("pattern does not compile"))?;
        Ok(Self { filter, regex })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.filter
    }

    /// True if the filter contains `+` or `#`.
    pub fn is_wildcard(&self) -> bool {
        self.filter.split('/').any(|l| l == "+" || l == "#")
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

/// Checks that `topic` is a concrete topic: non-empty and wildcard-free.
pub fn validate_topic(topic: &str) -> Result<(), MessagingError> {
    let reason = if topic.is_empty() {
        "empty topic"
    } else if topic.contains(['+', '#']) {
        "wildcards are not allowed in a published topic"
    } else {
        return Ok(());
    };
    Err(MessagingError::InvalidTopic {
        topic: topic.to_string(),
        reason,
    })
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filter)
    }
}

impl fmt::Debug for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TopicFilter").field(&self.filter).finish()
    }
}

impl PartialEq for TopicFilter {
    fn eq(&self, other: &Self) -> bool {
        self.filter == other.filter
    }
}

impl Eq for TopicFilter {}
