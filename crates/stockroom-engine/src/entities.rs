//! Extraction of `@mentions`, `$tickers` and `#hashtags` from message text.
//!
//! Parsing is pure: the same text and the same username index always give
//! the same entities, which is what lets an edit simply re-parse.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use stockroom_types::UserId;
use stockroom_types::models::{Entities, Mention};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([@$#])(\w+)").expect("entity token pattern is valid"));

/// Looks up the user behind a `@username`.
pub trait MentionResolver {
    fn resolve(&self, username: &str) -> Option<UserId>;
}

/// Keys are lower-cased usernames.
impl MentionResolver for HashMap<String, UserId> {
    fn resolve(&self, username: &str) -> Option<UserId> {
        self.get(&username.to_lowercase()).cloned()
    }
}

/// Resolves nothing; every mention stays plain text.
pub struct NoUsers;

impl MentionResolver for NoUsers {
    fn resolve(&self, _username: &str) -> Option<UserId> {
        None
    }
}

pub fn parse(text: &str, users: &impl MentionResolver) -> Entities {
    let mut entities = Entities::default();

    for caps in TOKEN.captures_iter(text) {
        let (Some(sigil), Some(word)) = (caps.get(1), caps.get(2)) else {
            continue;
        };

        // `me@host` and `a#b` are not entities: the sigil has to start a token.
        if follows_word_char(text, sigil.start()) {
            continue;
        }

        let word = word.as_str();
        match sigil.as_str() {
            "@" => {
                let seen = entities
                    .mentions
                    .iter()
                    .any(|m| m.raw.eq_ignore_ascii_case(word));
                if !seen {
                    entities.mentions.push(Mention {
                        raw: word.to_string(),
                        user_id: users.resolve(word),
                    });
                }
            }
            "$" => {
                // `$100` is a price, not a symbol.
                if !word.starts_with(|c: char| c.is_alphabetic()) {
                    continue;
                }
                let symbol = word.to_uppercase();
                if !entities.tickers.contains(&symbol) {
                    entities.tickers.push(symbol);
                }
            }
            _ => {
                let seen = entities
                    .hashtags
                    .iter()
                    .any(|tag| tag.to_lowercase() == word.to_lowercase());
                if !seen {
                    entities.hashtags.push(word.to_string());
                }
            }
        }
    }

    entities
}

fn follows_word_char(text: &str, at: usize) -> bool {
    text[..at]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}
