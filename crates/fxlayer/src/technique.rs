//! Techniques: ordered passes forming one way to render an effect.

use std::fmt;

use fxlayer_core::{Identifiable, Properties, PropertyBag};

use crate::effect::EffectId;
use crate::pass::Pass;

pub struct Technique {
    effect: EffectId,
    name: String,
    effect_name: String,
    passes: Vec<Pass>,
    /// Why validation failed. `None` for valid techniques.
    error: Option<String>,
    properties: Properties,
}

impl Technique {
    pub(crate) fn valid(effect: EffectId, effect_name: &str, name: &str, passes: Vec<Pass>) -> Self {
        Self {
            effect,
            name: name.to_string(),
            effect_name: effect_name.to_string(),
            passes,
            error: None,
            properties: Properties::new(),
        }
    }

    /// A technique that failed validation keeps its name and the reason,
    /// but no passes.
    pub(crate) fn invalid(effect: EffectId, effect_name: &str, name: &str, error: String) -> Self {
        Self {
            effect,
            name: name.to_string(),
            effect_name: effect_name.to_string(),
            passes: Vec::new(),
            error: Some(error),
            properties: Properties::new(),
        }
    }

    pub fn effect_id(&self) -> EffectId {
        self.effect
    }

    /// Decided once, when the effect was compiled.
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass(&self, index: usize) -> Option<&Pass> {
        self.passes.get(index)
    }

    pub fn pass_by_name(&self, name: &str) -> Option<&Pass> {
        self.passes.iter().find(|p| p.name() == name)
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }
}

impl Identifiable for Technique {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> String {
        format!("{}:{}", self.effect_name, self.name)
    }
}

impl PropertyBag for Technique {
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl fmt::Debug for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Technique")
            .field("name", &self.full_name())
            .field("passes", &self.passes)
            .field("error", &self.error)
            .finish()
    }
}
