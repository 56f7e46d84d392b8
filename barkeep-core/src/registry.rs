//! Patrons and beverages generated for a bar.
//!
//! Both are keyed by name, compared case-insensitively. Insertion order
//! is kept so prompts and saves list entities the way they were created.

use crate::emotion::Emotion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Whether two entity names are the same, ignoring case in any script.
pub fn same_name(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Errors from registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' is already registered")]
    Duplicate(String),
}

/// A generated bar patron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patron {
    /// Unique name.
    pub name: String,
    /// Physical traits.
    pub description: String,
    /// Free-text personality.
    pub personality: String,
    /// Portraits generated so far, by emotion. Populated lazily.
    #[serde(default)]
    portraits: BTreeMap<Emotion, String>,
}

impl Patron {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        personality: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            personality: personality.into(),
            portraits: BTreeMap::new(),
        }
    }

    /// The neutral portrait, or an empty reference if none exists yet.
    pub fn neutral_image(&self) -> &str {
        self.portraits
            .get(&Emotion::Neutral)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Portrait for `emotion`, falling back to the neutral portrait.
    pub fn image_for(&self, emotion: Emotion) -> &str {
        self.portraits
            .get(&emotion)
            .map(String::as_str)
            .unwrap_or_else(|| self.neutral_image())
    }

    /// Whether emotion-specific art exists (neutral counts only for itself).
    pub fn has_portrait(&self, emotion: Emotion) -> bool {
        self.portraits.contains_key(&emotion)
    }

    pub fn set_portrait(&mut self, emotion: Emotion, image: impl Into<String>) {
        self.portraits.insert(emotion, image.into());
    }

    /// Emotions with dedicated art.
    pub fn portrait_emotions(&self) -> impl Iterator<Item = Emotion> + '_ {
        self.portraits.keys().copied()
    }

    /// One-line summary used inside prompts.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} Personality: {}",
            self.name, self.description, self.personality
        )
    }
}

/// A drink on the bar's menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beverage {
    pub name: String,
    pub description: String,
    /// Image reference; empty until generated.
    #[serde(default)]
    pub image: String,
}

impl Beverage {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            image: String::new(),
        }
    }
}

/// The bar the session takes place in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub description: String,
    /// Image reference; empty until generated.
    #[serde(default)]
    pub image: String,
}

/// All patrons and beverages of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    patrons: Vec<Patron>,
    beverages: Vec<Beverage>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patrons(&self) -> &[Patron] {
        &self.patrons
    }

    pub fn beverages(&self) -> &[Beverage] {
        &self.beverages
    }

    pub fn patron(&self, name: &str) -> Option<&Patron> {
        self.patrons
            .iter()
            .find(|p| same_name(&p.name, name))
    }

    pub fn patron_mut(&mut self, name: &str) -> Option<&mut Patron> {
        self.patrons
            .iter_mut()
            .find(|p| same_name(&p.name, name))
    }

    pub fn beverage(&self, name: &str) -> Option<&Beverage> {
        self.beverages
            .iter()
            .find(|b| same_name(&b.name, name))
    }

    pub fn add_patron(&mut self, patron: Patron) -> Result<(), RegistryError> {
        if self.patron(&patron.name).is_some() {
            return Err(RegistryError::Duplicate(patron.name));
        }
        self.patrons.push(patron);
        Ok(())
    }

    pub fn add_beverage(&mut self, beverage: Beverage) -> Result<(), RegistryError> {
        if self.beverage(&beverage.name).is_some() {
            return Err(RegistryError::Duplicate(beverage.name));
        }
        self.beverages.push(beverage);
        Ok(())
    }

    /// Patron names in creation order.
    pub fn patron_names(&self) -> Vec<String> {
        self.patrons.iter().map(|p| p.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.patrons.is_empty() && self.beverages.is_empty()
    }
}
