// src/variant.rs
//! Build variants: named options a package can be built with
//!
//! Syntax inside a spec: `+shared` / `~shared` for boolean variants,
//! `build_type=Release` for single-valued ones and `languages=c,cxx`
//! for multi-valued ones.
//!
//! A single-valued variant is stored as a one-element value set, so the
//! same [`VariantValue`] type describes both a constraint and a concrete
//! choice. A constraint `x=a,b` is satisfied by any value set that
//! contains both `a` and `b`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Name of the variant that points a spec at a local source checkout
pub const DEV_PATH: &str = "dev_path";

/// A variant value, used both as a constraint and as a concrete choice
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    Bool(bool),
    Values(BTreeSet<String>),
}

impl VariantValue {
    /// Single string value
    pub fn single(value: impl Into<String>) -> Self {
        Self::Values(BTreeSet::from([value.into()]))
    }

    /// Parse the right-hand side of `name=value`
    ///
    /// `true`/`false` become booleans; anything else is split on commas.
    /// An item in double quotes is taken literally (`\"` and `\\`
    /// escape), so it may hold commas, spaces or parentheses.
    pub fn parse(text: &str) -> Result<Self, String> {
        match text {
            "true" => return Ok(Self::Bool(true)),
            "false" => return Ok(Self::Bool(false)),
            _ => {}
        }
        let mut values = BTreeSet::new();
        let mut chars = text.chars().peekable();
        loop {
            let mut item = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c) => item.push(c),
                            None => return Err(format!("unterminated quote in variant value '{}'", text)),
                        },
                        Some(c) => item.push(c),
                        None => return Err(format!("unterminated quote in variant value '{}'", text)),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    match c {
                        ',' => break,
                        '"' => return Err(format!("stray quote in variant value '{}'", text)),
                        _ => item.push(c),
                    }
                    chars.next();
                }
                item = item.trim().to_string();
            }
            if item.is_empty() {
                return Err(format!("empty item in variant value '{}'", text));
            }
            values.insert(item);
            match chars.next() {
                None => break,
                Some(',') => {}
                Some(c) => {
                    return Err(format!(
                        "unexpected '{}' after quoted item in variant value '{}'",
                        c, text
                    ))
                }
            }
        }
        Ok(Self::Values(values))
    }

    /// Check whether this value satisfies `constraint`
    pub fn satisfies(&self, constraint: &VariantValue) -> bool {
        match (self, constraint) {
            (Self::Bool(have), Self::Bool(want)) => have == want,
            (Self::Values(have), Self::Values(want)) => want.is_subset(have),
            _ => false,
        }
    }

    /// The single string value, if this holds exactly one
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Values(v) if v.len() == 1 => v.iter().next().map(String::as_str),
            _ => None,
        }
    }

    /// Format as it appears in a spec: `+name`, `~name` or `name=value`
    pub fn format_as(&self, name: &str) -> String {
        match self {
            Self::Bool(true) => format!("+{}", name),
            Self::Bool(false) => format!("~{}", name),
            Self::Values(_) => format!("{}={}", name, self),
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Values(values) => {
                let items: Vec<String> = values.iter().map(|v| quote_item(v)).collect();
                write!(f, "{}", items.join(","))
            }
        }
    }
}

/// Quote a value-set item that would not read back as itself
fn quote_item(item: &str) -> String {
    let plain = item != "true"
        && item != "false"
        && !item
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '"' | '\\' | '(' | ')' | '[' | ']' | '^'));
    if plain {
        return item.to_string();
    }
    let mut quoted = String::with_capacity(item.len() + 2);
    quoted.push('"');
    for c in item.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Values a declared variant may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedValues {
    /// `+name` / `~name`
    Bool,
    /// Exactly one of the listed values
    Single(Vec<String>),
    /// Any non-empty subset of the listed values
    Multi(Vec<String>),
    /// Any single free-form string; absent unless requested
    Any,
}

/// A variant declared by a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDecl {
    pub name: String,
    pub default: Option<VariantValue>,
    pub allowed: AllowedValues,
    pub description: String,
}

impl VariantDecl {
    /// Boolean variant
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default: Some(VariantValue::Bool(default)),
            allowed: AllowedValues::Bool,
            description: String::new(),
        }
    }

    /// Single-valued variant choosing from `values`
    pub fn single(name: impl Into<String>, default: &str, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            default: Some(VariantValue::single(default)),
            allowed: AllowedValues::Single(values.iter().map(|v| v.to_string()).collect()),
            description: String::new(),
        }
    }

    /// Multi-valued variant over `values`
    pub fn multi(name: impl Into<String>, default: &[&str], values: &[&str]) -> Self {
        Self {
            name: name.into(),
            default: Some(VariantValue::Values(
                default.iter().map(|v| v.to_string()).collect(),
            )),
            allowed: AllowedValues::Multi(values.iter().map(|v| v.to_string()).collect()),
            description: String::new(),
        }
    }

    /// The implicit `dev_path` variant every package accepts
    pub fn dev_path() -> Self {
        Self {
            name: DEV_PATH.to_string(),
            default: None,
            allowed: AllowedValues::Any,
            description: "Build from a local source checkout".to_string(),
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check the declaration is self-consistent
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("invalid variant name '{}'", self.name));
        }

        let check_values = |values: &[String]| -> Result<(), String> {
            if values.is_empty() {
                return Err(format!("variant '{}' lists no values", self.name));
            }
            for v in values {
                if v == "true" || v == "false" {
                    return Err(format!(
                        "variant '{}' uses reserved value '{}'; declare it boolean instead",
                        self.name, v
                    ));
                }
                if v.is_empty() || v.contains([',', ' ', '(', ')', '^']) {
                    return Err(format!("variant '{}' has invalid value '{}'", self.name, v));
                }
            }
            Ok(())
        };

        match (&self.allowed, &self.default) {
            (AllowedValues::Bool, Some(VariantValue::Bool(_))) => Ok(()),
            (AllowedValues::Single(values), Some(default)) => {
                check_values(values)?;
                match default.as_single() {
                    Some(d) if values.iter().any(|v| v == d) => Ok(()),
                    _ => Err(format!(
                        "default '{}' of variant '{}' is not one of its values",
                        default, self.name
                    )),
                }
            }
            (AllowedValues::Multi(values), Some(VariantValue::Values(default))) => {
                check_values(values)?;
                if default.is_empty() {
                    return Err(format!("variant '{}' has an empty default", self.name));
                }
                match default.iter().find(|d| !values.contains(d)) {
                    Some(d) => Err(format!(
                        "default '{}' of variant '{}' is not one of its values",
                        d, self.name
                    )),
                    None => Ok(()),
                }
            }
            (AllowedValues::Any, None) => Ok(()),
            _ => Err(format!(
                "variant '{}' has a default that does not match its kind",
                self.name
            )),
        }
    }

    /// Check a constraint could ever be met by this variant
    pub fn accepts_constraint(&self, constraint: &VariantValue) -> bool {
        match (&self.allowed, constraint) {
            (AllowedValues::Bool, VariantValue::Bool(_)) => true,
            (AllowedValues::Single(values), VariantValue::Values(want)) => {
                want.len() == 1 && want.iter().all(|w| values.contains(w))
            }
            (AllowedValues::Multi(values), VariantValue::Values(want)) => {
                want.iter().all(|w| values.contains(w))
            }
            (AllowedValues::Any, VariantValue::Values(want)) => want.len() == 1,
            _ => false,
        }
    }

    /// Candidate values, most preferred first, given every constraint on it
    ///
    /// `None` means the variant stays unset (only possible for free-form
    /// variants nobody asked for).
    pub fn candidates(&self, constraints: &[&VariantValue]) -> Vec<Option<VariantValue>> {
        let ok = |value: &VariantValue| constraints.iter().all(|c| value.satisfies(c));
        match &self.allowed {
            AllowedValues::Bool => {
                let default = matches!(self.default, Some(VariantValue::Bool(true)));
                [default, !default]
                    .into_iter()
                    .map(VariantValue::Bool)
                    .filter(|v| ok(v))
                    .map(Some)
                    .collect()
            }
            AllowedValues::Single(values) => {
                let default = self.default.as_ref().and_then(|d| d.as_single());
                default
                    .into_iter()
                    .chain(values.iter().map(String::as_str).filter(|v| Some(*v) != default))
                    .map(VariantValue::single)
                    .filter(|v| ok(v))
                    .map(Some)
                    .collect()
            }
            AllowedValues::Multi(values) => {
                let Some(required) = required_values(constraints) else {
                    return Vec::new();
                };
                if !required.iter().all(|r| values.contains(r)) {
                    return Vec::new();
                }
                let mut with_default = required.clone();
                if let Some(VariantValue::Values(default)) = &self.default {
                    with_default.extend(default.iter().cloned());
                }
                let mut out = vec![Some(VariantValue::Values(with_default.clone()))];
                if !required.is_empty() && required != with_default {
                    out.push(Some(VariantValue::Values(required)));
                }
                out
            }
            AllowedValues::Any => match required_values(constraints) {
                Some(required) if required.is_empty() => vec![self.default.clone()],
                Some(required) if required.len() == 1 => {
                    vec![Some(VariantValue::Values(required))]
                }
                _ => Vec::new(),
            },
        }
    }
}

/// Union of all value-set constraints; `None` if any constraint is boolean
fn required_values(constraints: &[&VariantValue]) -> Option<BTreeSet<String>> {
    let mut required = BTreeSet::new();
    for c in constraints {
        match c {
            VariantValue::Values(v) => required.extend(v.iter().cloned()),
            VariantValue::Bool(_) => return None,
        }
    }
    Some(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(VariantValue::parse("true").unwrap(), VariantValue::Bool(true));
        assert_eq!(VariantValue::parse("false").unwrap(), VariantValue::Bool(false));
        assert_eq!(
            VariantValue::parse("Release").unwrap(),
            VariantValue::single("Release")
        );
        let multi = VariantValue::parse("cxx,c").unwrap();
        assert_eq!(multi.to_string(), "c,cxx");
        assert!(VariantValue::parse("a,,b").is_err());
    }

    #[test]
    fn test_quoted_items_keep_delimiters() {
        let value = VariantValue::parse(r#""/tmp/my src,v2",plain"#).unwrap();
        assert_eq!(
            value,
            VariantValue::Values(BTreeSet::from(["/tmp/my src,v2".to_string(), "plain".to_string()]))
        );
        assert_eq!(value.to_string(), r#""/tmp/my src,v2",plain"#);

        let odd = VariantValue::single(r#"a"b\c"#);
        assert_eq!(odd.to_string(), r#""a\"b\\c""#);
        assert_eq!(VariantValue::parse(&odd.to_string()).unwrap(), odd);

        // A string that happens to read "true" stays a string
        let word = VariantValue::single("true");
        assert_eq!(word.to_string(), r#""true""#);
        assert_eq!(VariantValue::parse(&word.to_string()).unwrap(), word);

        assert!(VariantValue::parse(r#""open"#).is_err());
        assert!(VariantValue::parse(r#""a"b"#).is_err());
        assert!(VariantValue::parse(r#"a"b"#).is_err());
        assert!(VariantValue::parse(r#""""#).is_err());
    }

    #[test]
    fn test_format_as() {
        assert_eq!(VariantValue::Bool(true).format_as("shared"), "+shared");
        assert_eq!(VariantValue::Bool(false).format_as("shared"), "~shared");
        assert_eq!(
            VariantValue::single("Release").format_as("build_type"),
            "build_type=Release"
        );
    }

    #[test]
    fn test_satisfies_subset_semantics() {
        let have = VariantValue::parse("c,cxx,fortran").unwrap();
        assert!(have.satisfies(&VariantValue::parse("cxx").unwrap()));
        assert!(have.satisfies(&VariantValue::parse("c,fortran").unwrap()));
        assert!(!have.satisfies(&VariantValue::parse("go").unwrap()));
        assert!(!have.satisfies(&VariantValue::Bool(true)));
        assert!(VariantValue::Bool(true).satisfies(&VariantValue::Bool(true)));
        assert!(!VariantValue::Bool(true).satisfies(&VariantValue::Bool(false)));
    }

    #[test]
    fn test_bool_candidates_default_first() {
        let decl = VariantDecl::boolean("shared", true);
        assert_eq!(
            decl.candidates(&[]),
            vec![Some(VariantValue::Bool(true)), Some(VariantValue::Bool(false))]
        );
        let off = VariantValue::Bool(false);
        assert_eq!(decl.candidates(&[&off]), vec![Some(VariantValue::Bool(false))]);
    }

    #[test]
    fn test_single_candidates() {
        let decl = VariantDecl::single("build_type", "Release", &["Debug", "Release"]);
        let names: Vec<String> = decl
            .candidates(&[])
            .into_iter()
            .map(|v| v.unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Release", "Debug"]);

        let both = VariantValue::parse("Debug,Release").unwrap();
        assert!(decl.candidates(&[&both]).is_empty());
    }

    #[test]
    fn test_multi_candidates_include_default() {
        let decl = VariantDecl::multi("languages", &["c"], &["c", "cxx", "fortran"]);
        let want = VariantValue::single("fortran");
        let candidates = decl.candidates(&[&want]);
        assert_eq!(
            candidates,
            vec![
                Some(VariantValue::parse("c,fortran").unwrap()),
                Some(VariantValue::parse("fortran").unwrap()),
            ]
        );
        let unknown = VariantValue::single("go");
        assert!(decl.candidates(&[&unknown]).is_empty());
    }

    #[test]
    fn test_dev_path_candidates() {
        let decl = VariantDecl::dev_path();
        assert_eq!(decl.candidates(&[]), vec![None]);
        let path = VariantValue::single("/src/zlib");
        assert_eq!(decl.candidates(&[&path]), vec![Some(path.clone())]);
        let other = VariantValue::single("/src/other");
        assert!(decl.candidates(&[&path, &other]).is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(VariantDecl::boolean("shared", true).validate().is_ok());
        assert!(VariantDecl::single("bt", "Release", &["Debug", "Release"]).validate().is_ok());
        assert!(VariantDecl::single("bt", "Fast", &["Debug", "Release"]).validate().is_err());
        assert!(VariantDecl::single("bt", "true", &["true", "false"]).validate().is_err());
        assert!(VariantDecl::multi("langs", &[], &["c"]).validate().is_err());
        assert!(VariantDecl::boolean("bad name", true).validate().is_err());
        assert!(VariantDecl::dev_path().validate().is_ok());
    }

    #[test]
    fn test_serde_untagged() {
        let json = serde_json::to_string(&VariantValue::Bool(true)).unwrap();
        assert_eq!(json, "true");
        let json = serde_json::to_string(&VariantValue::parse("cxx,c").unwrap()).unwrap();
        assert_eq!(json, r#"["c","cxx"]"#);
        let back: VariantValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VariantValue::parse("c,cxx").unwrap());
    }
}
