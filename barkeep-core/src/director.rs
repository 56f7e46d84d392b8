//! The scene director.
//!
//! A small state machine that picks the category of the next narrative
//! beat and keeps track of which patrons are in the bar. Transitions are
//! weighted random choices read from a [`TransitionTable`]; the random
//! source is always supplied by the caller so tests can seed it.

use crate::graph::SceneNode;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The category of a narrative beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Direction {
    /// Opening description of the bar.
    #[default]
    IntroduceBar,
    /// Quiet moment with no focus patron.
    Lull,
    IntroducePatron,
    PatronBanter,
    PatronProblem,
    PatronDrinkRequest,
    PatronLeaves,
}

impl Direction {
    pub const ALL: [Direction; 7] = [
        Direction::IntroduceBar,
        Direction::Lull,
        Direction::IntroducePatron,
        Direction::PatronBanter,
        Direction::PatronProblem,
        Direction::PatronDrinkRequest,
        Direction::PatronLeaves,
    ];

    /// Get the display name for this direction.
    pub fn name(&self) -> &'static str {
        match self {
            Direction::IntroduceBar => "Introduce Bar",
            Direction::Lull => "Lull",
            Direction::IntroducePatron => "Introduce Patron",
            Direction::PatronBanter => "Patron Banter",
            Direction::PatronProblem => "Patron Problem",
            Direction::PatronDrinkRequest => "Patron Drink Request",
            Direction::PatronLeaves => "Patron Leaves",
        }
    }

    /// Whether this direction centers on a single patron.
    pub fn is_patron_focused(&self) -> bool {
        !matches!(self, Direction::IntroduceBar | Direction::Lull)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Weighted candidate lists, one per direction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTable {
    entries: HashMap<Direction, Vec<(Direction, u32)>>,
}

impl TransitionTable {
    /// An empty table. Every lookup falls back to [`Direction::Lull`].
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Replace the candidates for `from`.
    pub fn with(mut self, from: Direction, candidates: Vec<(Direction, u32)>) -> Self {
        self.entries.insert(from, candidates);
        self
    }

    pub fn candidates(&self, from: Direction) -> &[(Direction, u32)] {
        self.entries.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Draw the next direction. `None` if `from` has no usable candidates.
    pub fn choose<R: Rng>(&self, from: Direction, rng: &mut R) -> Option<Direction> {
        self.candidates(from)
            .choose_weighted(rng, |(_, weight)| *weight)
            .ok()
            .map(|(direction, _)| *direction)
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        use Direction::*;
        Self::empty()
            .with(IntroduceBar, vec![(IntroducePatron, 1)])
            .with(
                Lull,
                vec![(IntroducePatron, 2), (PatronBanter, 1), (PatronDrinkRequest, 1)],
            )
            .with(
                IntroducePatron,
                vec![(PatronBanter, 1), (PatronDrinkRequest, 1)],
            )
            .with(PatronBanter, vec![(PatronProblem, 1), (PatronDrinkRequest, 1)])
            .with(
                PatronProblem,
                vec![(PatronBanter, 1), (PatronDrinkRequest, 1), (PatronLeaves, 1)],
            )
            .with(
                PatronDrinkRequest,
                vec![
                    (PatronBanter, 1),
                    (IntroducePatron, 1),
                    (PatronLeaves, 1),
                    (Lull, 1),
                ],
            )
            .with(PatronLeaves, vec![(Lull, 1), (IntroducePatron, 1)])
    }
}

/// Serializable director state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectorState {
    /// Current direction; unset before the first choice.
    pub direction: Option<Direction>,
    /// Every known patron.
    pub patrons: Vec<String>,
    /// Patrons currently in the bar, in arrival order.
    pub present_patron_ids: Vec<String>,
    /// Focus of the most recent direction.
    pub current_patron_id: Option<String>,
}

/// The scene director.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Director {
    #[serde(flatten)]
    state: DirectorState,
    #[serde(skip)]
    table: TransitionTable,
}

impl Default for Director {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Director {
    /// Create a director that knows about `patrons`, none of them present.
    pub fn new(patrons: Vec<String>) -> Self {
        Self {
            state: DirectorState {
                patrons,
                ..DirectorState::default()
            },
            table: TransitionTable::default(),
        }
    }

    /// Restore a director from saved state.
    pub fn from_state(state: DirectorState) -> Self {
        Self {
            state,
            table: TransitionTable::default(),
        }
    }

    /// Swap the transition table.
    pub fn with_table(mut self, table: TransitionTable) -> Self {
        self.table = table;
        self
    }

    pub fn state(&self) -> &DirectorState {
        &self.state
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn direction(&self) -> Option<Direction> {
        self.state.direction
    }

    pub fn current_patron(&self) -> Option<&str> {
        self.state.current_patron_id.as_deref()
    }

    pub fn present(&self) -> &[String] {
        &self.state.present_patron_ids
    }

    pub fn patrons(&self) -> &[String] {
        &self.state.patrons
    }

    /// Known patrons who are not in the bar.
    pub fn absent(&self) -> Vec<&String> {
        self.state
            .patrons
            .iter()
            .filter(|name| !self.state.present_patron_ids.contains(name))
            .collect()
    }

    /// Learn about a new patron. Known names are ignored.
    pub fn add_patron(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.state.patrons.contains(&name) {
            self.state.patrons.push(name);
        }
    }

    /// Pick the next direction and apply its roster effects.
    ///
    /// Before the first choice the director always opens with
    /// [`Direction::IntroduceBar`].
    pub fn choose_next<R: Rng>(&mut self, rng: &mut R) -> Direction {
        let target = match self.state.direction {
            None => Direction::IntroduceBar,
            Some(current) => self.table.choose(current, rng).unwrap_or(Direction::Lull),
        };
        self.transition(target, rng)
    }

    /// Enter `target`, falling back to [`Direction::Lull`] when the roster
    /// cannot support it. Returns the direction actually entered.
    pub fn transition<R: Rng>(&mut self, target: Direction, rng: &mut R) -> Direction {
        let entered = match target {
            Direction::IntroduceBar | Direction::Lull => {
                self.state.current_patron_id = None;
                target
            }
            Direction::IntroducePatron => {
                let pick = self.absent().choose(rng).map(|name| name.to_string());
                match pick {
                    Some(name) => {
                        self.state.present_patron_ids.push(name.clone());
                        self.state.current_patron_id = Some(name);
                        target
                    }
                    None => self.fall_back(target),
                }
            }
            Direction::PatronLeaves => {
                if self.state.present_patron_ids.is_empty() {
                    self.fall_back(target)
                } else {
                    let index = rng.gen_range(0..self.state.present_patron_ids.len());
                    let name = self.state.present_patron_ids.remove(index);
                    self.state.current_patron_id = Some(name);
                    target
                }
            }
            Direction::PatronBanter | Direction::PatronProblem | Direction::PatronDrinkRequest => {
                match self.state.present_patron_ids.choose(rng).cloned() {
                    Some(name) => {
                        self.state.current_patron_id = Some(name);
                        target
                    }
                    None => self.fall_back(target),
                }
            }
        };

        self.state.direction = Some(entered);
        tracing::debug!(
            target: "director",
            direction = %entered,
            focus = ?self.state.current_patron_id,
            present = self.state.present_patron_ids.len(),
            "Entered direction"
        );
        entered
    }

    /// Continue from a node's snapshot, e.g. after the player walked back.
    pub fn resume_from(&mut self, node: &SceneNode) {
        self.state.direction = Some(node.direction);
        self.state.present_patron_ids = node.present_patron_ids.clone();
        self.state.current_patron_id = node.selected_patron_id.clone();
        for name in &node.present_patron_ids {
            if !self.state.patrons.contains(name) {
                self.state.patrons.push(name.clone());
            }
        }
    }

    fn fall_back(&mut self, wanted: Direction) -> Direction {
        tracing::debug!(
            target: "director",
            wanted = %wanted,
            "Roster cannot support direction, falling back to a lull"
        );
        self.state.current_patron_id = None;
        Direction::Lull
    }
}
