//! Search language for notes and cards.
//!
//! A query is a whitespace-separated list of terms, all of which must match.
//! Double quotes group words into one term and a leading `-` negates it.
//!
//! | term | matches |
//! |---|---|
//! | `deck:Chinese` | cards in `Chinese` or any `Chinese::...` child deck |
//! | `tag:hsk*` | notes with a tag matching the glob |
//! | `note:Basic` | notes of that type |
//! | `is:new` `is:learn` `is:review` `is:due` `is:suspended` | card state |
//! | `nid:1,2` `cid:3` | explicit ids |
//! | `Meaning:*cat*` | notes whose field matches the glob |
//! | `猫` | any field containing the text |
//!
//! `*` is the only wildcard. All comparisons are case-insensitive.

use chrono::{DateTime, Utc};
use deckhand_core::collection::{Card, CardId, CardState, Note, NoteId};
use deckhand_core::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Deck(String),
    Tag(String),
    NoteType(String),
    State(StateFilter),
    NoteIds(Vec<NoteId>),
    CardIds(Vec<CardId>),
    Field { name: String, pattern: String },
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StateFilter {
    New,
    Learning,
    Review,
    Due,
    Suspended,
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    negated: bool,
    matcher: Matcher,
}

/// A parsed search query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    terms: Vec<Term>,
}

impl Query {
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let terms = tokenize(input)?
            .into_iter()
            .map(|token| parse_term(&token))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { terms })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Whether `card` (belonging to `note`) satisfies every term.
    pub fn matches(&self, note: &Note, card: &Card, now: DateTime<Utc>) -> bool {
        self.terms
            .iter()
            .all(|term| term.matcher.matches(note, card, now) != term.negated)
    }
}

impl Matcher {
    fn matches(&self, note: &Note, card: &Card, now: DateTime<Utc>) -> bool {
        match self {
            Matcher::Deck(deck) => {
                let card_deck = card.deck.to_lowercase();
                glob_match(deck, &card_deck) || card_deck.starts_with(&format!("{deck}::"))
            }
            Matcher::Tag(tag) => note.tags.iter().any(|t| glob_match(tag, &t.to_lowercase())),
            Matcher::NoteType(name) => glob_match(name, &note.note_type.to_lowercase()),
            Matcher::State(filter) => match filter {
                StateFilter::New => card.state == CardState::New,
                StateFilter::Learning => card.state == CardState::Learning,
                StateFilter::Review => card.state == CardState::Review,
                StateFilter::Suspended => card.suspended,
                StateFilter::Due => {
                    !card.suspended
                        && card.state != CardState::New
                        && card.due.is_some_and(|due| due <= now)
                }
            },
            Matcher::NoteIds(ids) => ids.contains(&note.id),
            Matcher::CardIds(ids) => ids.contains(&card.id),
            Matcher::Field { name, pattern } => note
                .fields
                .iter()
                .filter(|(n, _)| n.to_lowercase() == *name)
                .any(|(_, v)| glob_match(pattern, &v.to_lowercase())),
            Matcher::Text(text) => note
                .fields
                .iter()
                .any(|(_, v)| v.to_lowercase().contains(text.as_str())),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<String>, StoreError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(StoreError::InvalidQuery(format!(
            "unterminated quote in '{input}'"
        )));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_term(token: &str) -> Result<Term, StoreError> {
    let (negated, body) = match token.strip_prefix('-') {
        Some(rest) if !rest.is_empty() => (true, rest),
        _ => (false, token),
    };

    let matcher = match body.split_once(':') {
        Some((key, value)) if !key.is_empty() => {
            let value = value.to_lowercase();
            match key.to_lowercase().as_str() {
                "deck" => Matcher::Deck(value),
                "tag" => Matcher::Tag(value),
                "note" => Matcher::NoteType(value),
                "is" => Matcher::State(parse_state(&value)?),
                "nid" => Matcher::NoteIds(parse_ids(&value)?),
                "cid" => Matcher::CardIds(parse_ids(&value)?),
                field => Matcher::Field {
                    name: field.to_string(),
                    pattern: value,
                },
            }
        }
        _ => Matcher::Text(body.to_lowercase()),
    };

    Ok(Term { negated, matcher })
}

fn parse_state(value: &str) -> Result<StateFilter, StoreError> {
    match value {
        "new" => Ok(StateFilter::New),
        "learn" | "learning" => Ok(StateFilter::Learning),
        "review" => Ok(StateFilter::Review),
        "due" => Ok(StateFilter::Due),
        "suspended" => Ok(StateFilter::Suspended),
        other => Err(StoreError::InvalidQuery(format!("unknown state 'is:{other}'"))),
    }
}

fn parse_ids(value: &str) -> Result<Vec<i64>, StoreError> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| StoreError::InvalidQuery(format!("'{s}' is not an id")))
        })
        .collect()
}

/// Case-sensitive glob with `*` as the only wildcard. Callers lowercase both sides.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
