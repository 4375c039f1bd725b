//! Tagged value used for object properties and annotations.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Float4([f32; 4]),
    String(String),
    /// Opaque native pointer or handle, e.g. a device the adapter wraps.
    Handle(usize),
}

impl Variant {
    /// Parses an annotation value: booleans, integers and floats are typed,
    /// anything else stays a string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i32>() {
            return Self::Int(i);
        }
        if let Ok(f) = raw.parse::<f32>() {
            return Self::Float(f);
        }
        Self::String(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            Self::Int(i) => Some(i != 0),
            Self::UInt(u) => Some(u != 0),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float(f) => Some(f),
            Self::Int(i) => Some(i as f32),
            Self::UInt(u) => Some(u as f32),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<usize> {
        match *self {
            Self::Handle(h) => Some(h),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}u"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Float4([x, y, z, w]) => write!(f, "({x}, {y}, {z}, {w})"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Handle(h) => write!(f, "{h:#x}"),
        }
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_values_are_typed() {
        assert_eq!(Variant::parse("true"), Variant::Bool(true));
        assert_eq!(Variant::parse("12"), Variant::Int(12));
        assert_eq!(Variant::parse("0.5"), Variant::Float(0.5));
        assert_eq!(Variant::parse("add"), Variant::String("add".into()));
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Variant::Int(3).as_f32(), Some(3.0));
        assert_eq!(Variant::Int(0).as_bool(), Some(false));
        assert_eq!(Variant::String("x".into()).as_f32(), None);
    }
}
