//! Recipe definitions consumed by the session engine.
//!
//! Recipes arrive from the catalog already built; the engine only checks the
//! structural invariants it relies on and never mutates them.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStep {
    /// 0-based position, contiguous across the recipe.
    pub index: usize,
    pub instruction_text: String,
    /// Steps with a duration are time-gated; `None` means manual advancement.
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

impl RecipeStep {
    pub fn new(index: usize, instruction_text: impl Into<String>, duration_seconds: Option<u64>) -> Self {
        Self {
            index,
            instruction_text: instruction_text.into(),
            duration_seconds,
        }
    }

    pub fn is_timed(&self) -> bool {
        self.duration_seconds.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub steps: Vec<RecipeStep>,
}

impl Recipe {
    /// Build a recipe and validate it.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the id is empty, there are no steps, step
    /// indices are not contiguous from 0, an instruction is blank, or a
    /// duration is zero.
    pub fn new(id: impl Into<String>, steps: Vec<RecipeStep>) -> Result<Self> {
        let recipe = Self {
            id: id.into(),
            steps,
        };
        recipe.validate()?;
        Ok(recipe)
    }

    /// Convenience constructor assigning indices in order.
    pub fn from_instructions<I, S>(id: impl Into<String>, steps: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Option<u64>)>,
        S: Into<String>,
    {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, (text, duration))| RecipeStep::new(index, text, duration))
            .collect();
        Self::new(id, steps)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidInput("recipe id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "recipe {} has no steps",
                self.id
            )));
        }
        for (position, step) in self.steps.iter().enumerate() {
            if step.index != position {
                return Err(CoreError::InvalidInput(format!(
                    "recipe {}: step at position {position} has index {}",
                    self.id, step.index
                )));
            }
            if step.instruction_text.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!(
                    "recipe {}: step {position} has no instruction",
                    self.id
                )));
            }
            if step.duration_seconds == Some(0) {
                return Err(CoreError::InvalidInput(format!(
                    "recipe {}: step {position} has zero duration",
                    self.id
                )));
            }
        }
        Ok(())
    }

    pub fn step(&self, index: usize) -> Option<&RecipeStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    /// Sum of all step durations, ignoring untimed steps.
    pub fn total_timed_seconds(&self) -> u64 {
        self.steps
            .iter()
            .filter_map(|s| s.duration_seconds)
            .fold(0u64, |acc, d| acc.saturating_add(d))
    }
}
