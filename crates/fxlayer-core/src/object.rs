//! Small capability traits shared by engine objects.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::error::{FxError, Result};
use crate::variant::Variant;

/// Anything addressable by name in logs and registries.
pub trait Identifiable {
    fn name(&self) -> &str;

    /// Name qualified by the owning object, `owner:name`.
    fn full_name(&self) -> String {
        self.name().to_string()
    }
}

/// Write-once property storage.
///
/// A property is set at most once over the object's life. Setting it again
/// is a resource conflict, not an overwrite.
#[derive(Debug, Default)]
pub struct Properties {
    values: RefCell<BTreeMap<String, Variant>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Variant> {
        self.values.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Variant) -> Result<()> {
        let mut values = self.values.borrow_mut();
        if let Some(existing) = values.get(name) {
            return Err(FxError::AlreadySet(format!(
                "property {name} already holds {existing}"
            )));
        }
        values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

pub trait PropertyBag {
    fn properties(&self) -> &Properties;

    fn property(&self, name: &str) -> Option<Variant> {
        self.properties().get(name)
    }

    fn require_property(&self, name: &str) -> Result<Variant> {
        self.property(name)
            .ok_or_else(|| FxError::PropertyNotFound(name.to_string()))
    }

    fn set_property(&self, name: &str, value: Variant) -> Result<()> {
        self.properties().set(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing(Properties);

    impl PropertyBag for Thing {
        fn properties(&self) -> &Properties {
            &self.0
        }
    }

    #[test]
    fn properties_are_write_once() {
        let thing = Thing(Properties::new());
        thing.set_property("device", Variant::Handle(0x1000)).unwrap();
        let err = thing.set_property("device", Variant::Handle(0x2000)).unwrap_err();
        assert!(matches!(err, FxError::AlreadySet(_)));
        assert_eq!(thing.property("device"), Some(Variant::Handle(0x1000)));
    }

    #[test]
    fn missing_required_property() {
        let thing = Thing(Properties::new());
        assert!(matches!(
            thing.require_property("blend"),
            Err(FxError::PropertyNotFound(name)) if name == "blend"
        ));
    }
}
