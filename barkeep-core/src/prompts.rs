//! Prompt templates for every generation stage.

use crate::director::Direction;
use crate::emotion::Emotion;
use crate::graph::{SceneNode, Speaker};
use crate::parse::Distillation;
use crate::registry::{Beverage, Patron};

/// Everything the narration prompt needs to know about the next beat.
#[derive(Debug, Clone)]
pub struct Scene<'a> {
    pub direction: Direction,
    pub player: &'a str,
    pub summaries: &'a Distillation,
    pub bar: &'a str,
    /// Focus patron for patron-centric directions.
    pub focus: Option<&'a Patron>,
    /// Patrons in the bar after the director's transition.
    pub present: Vec<&'a Patron>,
    /// Tonight's beats so far, oldest first.
    pub history: Vec<&'a SceneNode>,
    /// Drink served in answer to the previous beat.
    pub served: Option<&'a Beverage>,
    pub menu: &'a [Beverage],
    pub night: u32,
}

/// Condense the seed characters into the four labeled summaries.
pub fn distillation_prompt(characters: &[String]) -> String {
    format!(
        r#"The following characters will visit a small bar, one night at a time:

{characters}

Summarize what they have in common as four labeled lines:

Source: the work or works the characters come from
Setting: a bar those characters would plausibly drink in, its era and location
Theme: the mood and recurring themes of the source material
Art: a short art-style description for illustrations (medium, palette, line work)

Answer with the four lines only."#,
        characters = bullet_list(characters),
    )
}

pub fn bar_prompt(summaries: &Distillation) -> String {
    format!(
        r#"Setting: {setting}
Theme: {theme}

Describe the bar in this setting in one paragraph of three or four sentences.
Mention its name, the light, the smell and what sits behind the counter.
Write in present tense. Do not introduce any customers."#,
        setting = summaries.setting,
        theme = summaries.theme,
    )
}

pub fn bar_image_prompt(summaries: &Distillation, description: &str) -> String {
    format!(
        "{description} Interior of the bar seen from behind the counter, no people. {art}",
        art = summaries.art,
    )
}

/// Ask for more drinks, steering away from the ones already accepted.
pub fn beverages_prompt(summaries: &Distillation, bar: &str, accepted: &[Beverage]) -> String {
    let avoid = if accepted.is_empty() {
        String::new()
    } else {
        let names: Vec<String> = accepted.iter().map(|b| b.name.clone()).collect();
        format!(
            "\nThe menu already has these drinks, do not repeat them:\n{}\n",
            bullet_list(&names)
        )
    };

    format!(
        r#"Setting: {setting}
Bar: {bar}
{avoid}
Invent drinks this bar would serve. For each drink write:

Name: the drink's name
Description: one sentence on how it looks and tastes

Write at least two drinks."#,
        setting = summaries.setting,
    )
}

pub fn beverage_image_prompt(summaries: &Distillation, beverage: &Beverage) -> String {
    format!(
        "A single serving of {name}: {description} Centered on a plain background. {art}",
        name = beverage.name,
        description = beverage.description,
        art = summaries.art,
    )
}

/// Who a patron prompt is about.
#[derive(Debug, Clone, Copy)]
pub enum PatronSeed<'a> {
    /// One of the player's seed characters.
    Source(&'a str),
    /// An original character who fits the setting.
    Filler,
}

/// Describe one patron in the labeled-line format.
///
/// `avoid` lists names the model must not reuse: already accepted
/// patrons and the throwaway dummies.
pub fn patron_prompt(
    summaries: &Distillation,
    bar: &str,
    player: &str,
    seed: PatronSeed<'_>,
    avoid: &[String],
) -> String {
    let who = match seed {
        PatronSeed::Source(character) => format!(
            "Describe {character} as a regular at this bar, true to {source}.",
            source = non_empty_or(&summaries.source, "their story"),
        ),
        PatronSeed::Filler => {
            "Invent an original regular for this bar who fits the setting.".to_string()
        }
    };
    let avoid = if avoid.is_empty() {
        String::new()
    } else {
        format!(
            "\nThese characters already exist, do not reuse their names:\n{}\n",
            bullet_list(avoid)
        )
    };

    format!(
        r#"Setting: {setting}
Theme: {theme}
Bar: {bar}

{who}
The bartender is called {player}; the patron must have a different name.
{avoid}
Answer with three labeled lines:

Name: first name or nickname only
Traits: physical appearance in one sentence
Personality: temperament and manner of speech in one sentence"#,
        setting = summaries.setting,
        theme = summaries.theme,
    )
}

/// A generic character request. Its answers are thrown away and only
/// used to steer later prompts off the model's most obvious picks.
pub fn dummy_patron_prompt(summaries: &Distillation) -> String {
    format!(
        r#"Setting: {setting}

Invent a bar customer for this setting. Answer with three labeled lines:

Name: first name only
Traits: physical appearance in one sentence
Personality: temperament in one sentence"#,
        setting = summaries.setting,
    )
}

pub fn patron_image_prompt(summaries: &Distillation, patron: &Patron) -> String {
    format!(
        "Portrait of {name}, {description} Waist up, facing the viewer, {cue}. {art}",
        name = patron.name,
        description = patron.description,
        cue = Emotion::Neutral.portrait_cue(),
        art = summaries.art,
    )
}

/// Re-prompt for an emotion variant of an existing portrait.
pub fn portrait_prompt(summaries: &Distillation, patron: &Patron, emotion: Emotion) -> String {
    format!(
        "Portrait of {name}, {description} Waist up, facing the viewer, {cue}. {art}",
        name = patron.name,
        description = patron.description,
        cue = emotion.portrait_cue(),
        art = summaries.art,
    )
}

/// Build the narration prompt for the next beat.
pub fn narration_prompt(scene: &Scene<'_>) -> String {
    let focus = scene.focus.map(|p| p.name.as_str()).unwrap_or("a patron");
    let player = scene.player;

    let instruction = match scene.direction {
        Direction::IntroduceBar => format!(
            "Night {night} begins. Describe {player} opening the bar: the room, the first sounds, \
             the feeling of the evening ahead. Narration only, no dialogue.",
            night = scene.night,
        ),
        Direction::Lull => format!(
            "Nothing much is happening. Describe a quiet moment as {player} tends the bar. \
             Narration only, no dialogue."
        ),
        Direction::IntroducePatron => format!(
            "{focus} walks in. Write {focus}'s first words to {player} as they take a seat, \
             in character."
        ),
        Direction::PatronBanter => format!(
            "{focus} makes small talk with {player}. Write {focus}'s next line, in character."
        ),
        Direction::PatronProblem => format!(
            "{focus} opens up to {player} about something that has been troubling them. \
             Write {focus}'s next line, in character."
        ),
        Direction::PatronDrinkRequest => format!(
            "{focus} wants a drink. Write {focus} asking {player} for something from the menu, \
             in character."
        ),
        Direction::PatronLeaves => format!(
            "{focus} is done for the night. Write {focus}'s goodbye to {player}, in character."
        ),
    };

    let mut prompt = format!(
        "Setting: {setting}\nTheme: {theme}\nBar: {bar}\n",
        setting = scene.summaries.setting,
        theme = scene.summaries.theme,
        bar = scene.bar,
    );

    if let Some(patron) = scene.focus {
        prompt.push_str(&format!(
            "\n## {name}\n{description}\nPersonality: {personality}\n",
            name = patron.name,
            description = patron.description,
            personality = patron.personality,
        ));
    }

    let others: Vec<String> = scene
        .present
        .iter()
        .filter(|p| Some(p.name.as_str()) != scene.focus.map(|f| f.name.as_str()))
        .map(|p| p.name.clone())
        .collect();
    if !others.is_empty() {
        prompt.push_str(&format!("\nAlso at the bar: {}\n", others.join(", ")));
    }

    if scene.direction == Direction::PatronDrinkRequest && !scene.menu.is_empty() {
        let menu: Vec<String> = scene
            .menu
            .iter()
            .map(|b| format!("{}: {}", b.name, b.description))
            .collect();
        prompt.push_str(&format!("\n## Menu\n{}\n", bullet_list(&menu)));
    }

    if !scene.history.is_empty() {
        prompt.push_str("\n## Tonight so far\n");
        for node in &scene.history {
            prompt.push_str(&format!("{}: {}\n", speaker_label(node, player), node.message));
        }
    }

    if let Some(beverage) = scene.served {
        prompt.push_str(&format!(
            "\n{player} has just served a {name} ({description}).\n",
            name = beverage.name,
            description = beverage.description,
        ));
    }

    prompt.push_str(&format!(
        "\n{instruction}\nKeep it under four sentences. Do not write lines for {player}."
    ));
    prompt
}

fn speaker_label<'a>(node: &'a SceneNode, player: &'a str) -> &'a str {
    match &node.speaker {
        None => "Narrator",
        Some(Speaker::Player) => player,
        Some(Speaker::Patron(name)) => name,
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}
