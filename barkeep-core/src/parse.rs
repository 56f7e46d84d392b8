//! Parsing of free-form generation output.
//!
//! Generated text is never trusted to be well formed. Structured answers
//! are requested as labeled lines and recovered with this grammar:
//!
//! ```text
//! document   := line*
//! line       := field+ | anything-else
//! field      := decoration* LABEL "s"? decoration* ":" decoration* value
//! decoration := whitespace | "*" | "_"
//! value      := characters up to the next LABEL on the same line, or the end of the line
//! ```
//!
//! Labels match case-insensitively and never as the tail of a longer word,
//! so `**Name:** Ada`, `name : Ada` and `Name: Ada Traits: tall` all parse
//! while `Surname:` does not. The first non-empty value for a label wins. A label that appears with nothing after it is
//! reported as empty rather than missing.
//!
//! Beverage lists use a second form: the text is split on `NAME:` markers
//! and each chunk carries a `Description:` label.

use crate::registry::Beverage;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Why a piece of generated output was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("name '{name}' is longer than {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("name '{name}' collides with the player's name")]
    CollidesWithPlayer { name: String },

    #[error("'{name}' was already generated")]
    Duplicate { name: String },

    #[error("nothing usable in the response")]
    NothingParsed,
}

/// A fixed set of labels and the compiled pattern that finds them.
#[derive(Debug, Clone)]
pub struct LabelSet {
    labels: Vec<&'static str>,
    pattern: Regex,
}

impl LabelSet {
    pub fn new(labels: &[&'static str]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = labels
            .iter()
            .map(|label| format!("({})", regex::escape(label)))
            .collect();
        let pattern = Regex::new(&format!(
            r"(?i)(?:^|[^\p{{L}}\p{{N}}])(?:{})s?[\s*_]*:[ \t*_]*",
            alternatives.join("|")
        ))?;
        Ok(Self {
            labels: labels.to_vec(),
            pattern,
        })
    }

    pub fn labels(&self) -> &[&'static str] {
        &self.labels
    }

    /// Extract every labeled value from `text`.
    pub fn parse(&self, text: &str) -> LabeledFields {
        // (label index, match start, match end)
        let found: Vec<(usize, usize, usize)> = self
            .pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let index = (1..=self.labels.len()).find(|i| caps.get(*i).is_some())?;
                Some((index - 1, whole.start(), whole.end()))
            })
            .collect();

        let mut values: HashMap<&'static str, String> = HashMap::new();
        for (position, &(index, _, end)) in found.iter().enumerate() {
            let stop = found
                .get(position + 1)
                .map(|next| next.1)
                .unwrap_or(text.len());
            let line = text[end..stop].split('\n').next().unwrap_or_default();
            let value = clean_value(line);

            let slot = values.entry(self.labels[index]).or_default();
            if slot.is_empty() {
                *slot = value;
            }
        }

        LabeledFields { values }
    }
}

/// Values recovered by [`LabelSet::parse`].
#[derive(Debug, Clone, Default)]
pub struct LabeledFields {
    values: HashMap<&'static str, String>,
}

impl LabeledFields {
    /// The value for `label`, if present and non-empty.
    pub fn get(&self, label: &str) -> Option<&str> {
        self.values
            .get(label)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// The value for `label`, or why it cannot be used.
    pub fn require(&self, label: &'static str) -> Result<&str, Rejection> {
        match self.values.get(label) {
            None => Err(Rejection::MissingField(label)),
            Some(value) if value.is_empty() => Err(Rejection::EmptyField(label)),
            Some(value) => Ok(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(String::is_empty)
    }
}

lazy_static! {
    pub static ref DISTILLATION_LABELS: LabelSet =
        LabelSet::new(&["Source", "Setting", "Theme", "Art"]).expect("static label pattern");
    pub static ref PATRON_LABELS: LabelSet =
        LabelSet::new(&["Name", "Traits", "Personality"]).expect("static label pattern");
    static ref BEVERAGE_SPLIT: Regex =
        Regex::new(r"(?i)\bname[\s*_]*:").expect("static beverage pattern");
    static ref DESCRIPTION_LABEL: Regex =
        Regex::new(r"(?i)\bdescription[\s*_]*:[ \t*_]*").expect("static description pattern");
}

/// The four summaries distilled from the seed characters. Any of them
/// may be empty when the model skipped a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distillation {
    pub source: String,
    pub setting: String,
    pub theme: String,
    pub art: String,
}

impl Distillation {
    /// Setting, theme and art are all required downstream.
    pub fn is_complete(&self) -> bool {
        !self.setting.is_empty() && !self.theme.is_empty() && !self.art.is_empty()
    }
}

pub fn parse_distillation(text: &str) -> Distillation {
    let fields = DISTILLATION_LABELS.parse(text);
    let take = |label: &str| fields.get(label).unwrap_or_default().to_string();
    Distillation {
        source: take("Source"),
        setting: take("Setting"),
        theme: take("Theme"),
        art: take("Art"),
    }
}

/// A patron as described by the model, before any name checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatronDraft {
    pub name: String,
    pub description: String,
    pub personality: String,
}

pub fn parse_patron(text: &str) -> Result<PatronDraft, Rejection> {
    let fields = PATRON_LABELS.parse(text);
    let name = clean_name(fields.require("Name")?);
    if name.is_empty() {
        return Err(Rejection::EmptyField("Name"));
    }
    Ok(PatronDraft {
        name,
        description: fields.require("Traits")?.to_string(),
        personality: fields.require("Personality")?.to_string(),
    })
}

/// Split a beverage list into entries. Each entry is parsed on its own,
/// so one malformed drink does not spoil the rest.
pub fn parse_beverages(text: &str) -> Vec<Result<Beverage, Rejection>> {
    BEVERAGE_SPLIT
        .split(text)
        .skip(1)
        .map(parse_beverage_entry)
        .collect()
}

fn parse_beverage_entry(chunk: &str) -> Result<Beverage, Rejection> {
    let Some(label) = DESCRIPTION_LABEL.find(chunk) else {
        return Err(Rejection::MissingField("Description"));
    };

    let name = chunk[..label.start()]
        .lines()
        .map(clean_name)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(Rejection::EmptyField("Name"));
    }

    let paragraph = chunk[label.end()..]
        .split("\n\n")
        .next()
        .unwrap_or_default();
    let description = clean_value(
        &paragraph
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    );
    if description.is_empty() {
        return Err(Rejection::EmptyField("Description"));
    }

    Ok(Beverage::new(name, description))
}

/// Strip surrounding punctuation and markup from a name.
pub fn clean_name(raw: &str) -> String {
    raw.trim_matches(|c: char| !c.is_alphanumeric())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip markup and stray separators around a value, keeping sentence punctuation.
pub fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '#' | '"' | '`'))
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-'))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patron_fields() {
        let draft = parse_patron(
            "Name: Marisol Vey\nTraits: Wiry, ink-stained fingers.\nPersonality: Restless and curious.",
        )
        .unwrap();
        assert_eq!(draft.name, "Marisol Vey");
        assert_eq!(draft.description, "Wiry, ink-stained fingers.");
        assert_eq!(draft.personality, "Restless and curious.");
    }

    #[test]
    fn test_markdown_and_case() {
        let draft = parse_patron(
            "Here you go!\n**NAME:** \"Tobiah\"\n* traits: Broad shoulders.\n__Personality__: Gentle.",
        )
        .unwrap();
        assert_eq!(draft.name, "Tobiah");
        assert_eq!(draft.description, "Broad shoulders.");
        assert_eq!(draft.personality, "Gentle.");
    }

    #[test]
    fn test_multiple_labels_on_one_line() {
        let draft = parse_patron("Name: Ada Traits: tall, freckled Personality: blunt").unwrap();
        assert_eq!(draft.name, "Ada");
        assert_eq!(draft.description, "tall, freckled");
        assert_eq!(draft.personality, "blunt");
    }

    #[test]
    fn test_missing_label() {
        assert_eq!(
            parse_patron("Name: Ada\nTraits: tall").unwrap_err(),
            Rejection::MissingField("Personality")
        );
        assert_eq!(
            parse_patron("just some prose").unwrap_err(),
            Rejection::MissingField("Name")
        );
    }

    #[test]
    fn test_label_present_but_empty() {
        assert_eq!(
            parse_patron("Name: Ada\nTraits:\nPersonality: blunt").unwrap_err(),
            Rejection::EmptyField("Traits")
        );
        assert_eq!(
            parse_patron("Name: ***\nTraits: tall\nPersonality: blunt").unwrap_err(),
            Rejection::EmptyField("Name")
        );
    }

    #[test]
    fn test_first_non_empty_value_wins() {
        let fields = PATRON_LABELS.parse("Name:\nName: Ada\nName: Bea");
        assert_eq!(fields.get("Name"), Some("Ada"));
    }

    #[test]
    fn test_label_inside_word_is_ignored() {
        let fields = DISTILLATION_LABELS.parse("Artist: nobody\nArt: watercolor");
        assert_eq!(fields.get("Art"), Some("watercolor"));
    }

    #[test]
    fn test_distillation_allows_plurals() {
        let parsed = parse_distillation(
            "Source: A gothic novel.\nSetting: A lighthouse town.\nThemes: Grief, renewal.\nArt: Inked noir.",
        );
        assert_eq!(parsed.source, "A gothic novel.");
        assert_eq!(parsed.theme, "Grief, renewal.");
        assert!(parsed.is_complete());
    }

    #[test]
    fn test_incomplete_distillation() {
        let parsed = parse_distillation("Setting: Somewhere.\nArt:");
        assert!(!parsed.is_complete());
        assert_eq!(parsed.art, "");
    }

    #[test]
    fn test_beverage_list() {
        let text = "Sure! Here are two drinks.\n\n\
            NAME: Ember Fizz\nDescription: A smoky citrus spritz.\n\n\
            NAME: **Low Tide**\nDescription: Briny gin over crushed ice,\nserved in a shell.";
        let drinks: Vec<_> = parse_beverages(text).into_iter().collect();
        assert_eq!(drinks.len(), 2);
        let first = drinks[0].as_ref().unwrap();
        assert_eq!(first.name, "Ember Fizz");
        assert_eq!(first.description, "A smoky citrus spritz.");
        let second = drinks[1].as_ref().unwrap();
        assert_eq!(second.name, "Low Tide");
        assert_eq!(
            second.description,
            "Briny gin over crushed ice, served in a shell."
        );
    }

    #[test]
    fn test_beverage_entries_fail_independently() {
        let text = "NAME: Orphan\n\nNAME: \nDescription: Nameless.\nNAME: Good One\nDescription: Fine.";
        let drinks = parse_beverages(text);
        assert_eq!(drinks.len(), 3);
        assert_eq!(
            drinks[0].as_ref().unwrap_err(),
            &Rejection::MissingField("Description")
        );
        assert_eq!(drinks[1].as_ref().unwrap_err(), &Rejection::EmptyField("Name"));
        assert_eq!(drinks[2].as_ref().unwrap().name, "Good One");
    }

    #[test]
    fn test_beverage_same_line() {
        let drinks = parse_beverages("NAME: Quince Sour - Description: Tart and pale.");
        let drink = drinks[0].as_ref().unwrap();
        assert_eq!(drink.name, "Quince Sour");
        assert_eq!(drink.description, "Tart and pale.");
    }

    #[test]
    fn test_clean_helpers() {
        assert_eq!(clean_name("  \"*Old  Tom.*\" "), "Old Tom");
        assert_eq!(clean_value("  ** - A quiet drink. ** "), "A quiet drink.");
    }
}
