//! Topic templates.
//!
//! A configured topic may carry one placeholder that is filled per session:
//! `%c` (client id), `%u` (user name) or `%i` (a run-wide counter). Tokens are
//! checked in that order and only the first kind found is replaced.
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

/// client identifier placeholder
pub const CLIENT_ID_TOKEN: &str = "%c";
/// user name placeholder
pub const USERNAME_TOKEN: &str = "%u";
/// incrementing index placeholder
pub const INDEX_TOKEN: &str = "%i";

/// substituted for `%u` when no user name is configured
pub const UNDEFINED_USERNAME: &str = "undefined";

/// Values a template can draw from for one session
#[derive(Debug, Clone, Copy)]
pub struct SessionIdentity<'a> {
    /// client id from the session's connect packet
    pub client_id: &'a str,
    /// configured user name
    pub username: Option<&'a str>,
}

/// A topic string with at most one placeholder, plus the `%i` counter.
#[derive(Debug)]
pub struct TopicTemplate {
    template: String,
    next_index: AtomicU64,
}

impl TopicTemplate {
    /// Create a template whose `%i` counter starts at 0
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            next_index: AtomicU64::new(0),
        }
    }

    /// the raw template
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Produce the concrete topic for a session.
    ///
    /// Borrows the template when it has no placeholder. Every `%i` expansion
    /// consumes one counter value, so concurrent sessions get distinct topics.
    pub fn expand(&self, identity: SessionIdentity<'_>) -> Cow<'_, str> {
        let template = self.template.as_str();
        if let Some(at) = template.find(CLIENT_ID_TOKEN) {
            Cow::Owned(splice(template, at, identity.client_id))
        } else if let Some(at) = template.find(USERNAME_TOKEN) {
            let username = identity.username.unwrap_or(UNDEFINED_USERNAME);
            Cow::Owned(splice(template, at, username))
        } else if let Some(at) = template.find(INDEX_TOKEN) {
            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            Cow::Owned(splice(template, at, &index.to_string()))
        } else {
            Cow::Borrowed(template)
        }
    }
}

// every token is two bytes long
fn splice(template: &str, at: usize, value: &str) -> String {
    let (head, tail) = template.split_at(at);
    let mut topic = String::with_capacity(template.len() + value.len());
    topic.push_str(head);
    topic.push_str(value);
    topic.push_str(&tail[2..]);
    topic
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::{SessionIdentity, TopicTemplate};

    const IDENTITY: SessionIdentity<'static> = SessionIdentity {
        client_id: "nanobench-3",
        username: Some("alice"),
    };

    #[test]
    fn plain_template_is_borrowed() {
        let template = TopicTemplate::new("sensors/temp");
        assert!(matches!(template.expand(IDENTITY), Cow::Borrowed("sensors/temp")));
    }

    #[test]
    fn client_id_keeps_remainder() {
        let template = TopicTemplate::new("devices/%c/state");
        assert_eq!(template.expand(IDENTITY), "devices/nanobench-3/state");
    }

    #[test]
    fn client_id_wins_over_other_tokens() {
        let template = TopicTemplate::new("%u/%c/%i");
        assert_eq!(template.expand(IDENTITY), "%u/nanobench-3/%i");
    }

    #[test]
    fn username_or_undefined() {
        let template = TopicTemplate::new("users/%u");
        assert_eq!(template.expand(IDENTITY), "users/alice");

        let anonymous = SessionIdentity {
            username: None,
            ..IDENTITY
        };
        assert_eq!(template.expand(anonymous), "users/undefined");
    }

    #[test]
    fn index_replaces_only_first_occurrence() {
        let template = TopicTemplate::new("a/%i/b/%i");
        assert_eq!(template.expand(IDENTITY), "a/0/b/%i");
        assert_eq!(template.expand(IDENTITY), "a/1/b/%i");
    }

    #[test]
    fn index_strictly_increases() {
        let template = TopicTemplate::new("sensors/%i");
        assert_eq!(template.expand(IDENTITY), "sensors/0");
        let mut last = 0;
        for _ in 0..100 {
            let topic = template.expand(IDENTITY);
            let index: u64 = topic["sensors/".len()..].parse().unwrap();
            assert!(index > last);
            last = index;
        }
    }

    #[test]
    fn index_is_unique_across_threads() {
        let template = Arc::new(TopicTemplate::new("t/%i"));
        let handles = (0..4)
            .map(|_| {
                let template = Arc::clone(&template);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| template.expand(IDENTITY).into_owned())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        for handle in handles {
            for topic in handle.join().unwrap() {
                assert!(seen.insert(topic), "duplicate topic");
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
