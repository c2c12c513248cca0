//! Declarative payload validation
//!
//! Every request and confirmation implements [`Validate`] by declaring its
//! field rules against a [`Validator`]:
//!
//! ```
//! use ocppj_core::validation::{Validate, Validator};
//!
//! struct ChangeName {
//!     name: String,
//!     aliases: Vec<String>,
//! }
//!
//! impl Validate for ChangeName {
//!     fn check(&self, v: &mut Validator) {
//!         v.string("name", &self.name).required().max_len(20);
//!         v.list("aliases", &self.aliases)
//!             .unique()
//!             .each(|v, field, alias| {
//!                 v.string(field, alias).max_len(20);
//!             });
//!     }
//! }
//!
//! let ok = ChangeName { name: "alpha".into(), aliases: vec![] };
//! assert!(ok.validate().is_ok());
//!
//! let bad = ChangeName { name: String::new(), aliases: vec!["a".into(), "a".into()] };
//! assert_eq!(bad.validate().unwrap_err().violations.len(), 2);
//! ```
//!
//! Rules only constrain values that are present. Only `required` treats an
//! empty string or list as absent; every other rule sees the raw value.
//! Numbers have no bounds unless declared. String lengths count characters,
//! inclusive.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use thiserror::Error;

use crate::rpc::messages::ErrorCode;

/// A single constraint a field can violate
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    OneOf(&'static [&'static str]),
    MinItems(usize),
    MaxItems(usize),
    Unique,
    Uri,
    /// At least one of the named sibling fields must be present
    AtLeastOneOf(&'static [&'static str]),
    /// At most one of the named sibling fields may be present
    Exclusive(&'static [&'static str]),
    /// Required because the named sibling field is present
    RequiredWith(&'static str),
    Custom(&'static str),
}

impl Rule {
    /// The CALLERROR code reported when an inbound payload breaks this rule
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Rule::Required
            | Rule::MinItems(_)
            | Rule::MaxItems(_)
            | Rule::Unique
            | Rule::AtLeastOneOf(_)
            | Rule::Exclusive(_)
            | Rule::RequiredWith(_) => ErrorCode::OccurrenceConstraintViolation,
            Rule::MinLength(_)
            | Rule::MaxLength(_)
            | Rule::Min(_)
            | Rule::Max(_)
            | Rule::OneOf(_)
            | Rule::Uri
            | Rule::Custom(_) => ErrorCode::PropertyConstraintViolation,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => write!(f, "required"),
            Rule::MinLength(n) => write!(f, "min length {}", n),
            Rule::MaxLength(n) => write!(f, "max length {}", n),
            Rule::Min(n) => write!(f, "min {}", n),
            Rule::Max(n) => write!(f, "max {}", n),
            Rule::OneOf(values) => write!(f, "one of [{}]", values.join(", ")),
            Rule::MinItems(n) => write!(f, "min items {}", n),
            Rule::MaxItems(n) => write!(f, "max items {}", n),
            Rule::Unique => write!(f, "unique"),
            Rule::Uri => write!(f, "uri"),
            Rule::AtLeastOneOf(fields) => write!(f, "at least one of [{}]", fields.join(", ")),
            Rule::Exclusive(fields) => write!(f, "at most one of [{}]", fields.join(", ")),
            Rule::RequiredWith(sibling) => write!(f, "required with {}", sibling),
            Rule::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A field that broke a rule
#[derive(Debug, Clone, PartialEq, Error)]
#[error("field '{field}' violates {rule} (value: {value})")]
pub struct Violation {
    /// Wire path of the field, e.g. `configurationKey[1].key`
    pub field: String,
    pub rule: Rule,
    /// Offending value, rendered for diagnostics
    pub value: String,
}

/// All violations found in one payload
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Code of the first violation; the one reported to the peer
    pub fn error_code(&self) -> ErrorCode {
        self.violations
            .first()
            .map(|v| v.rule.error_code())
            .unwrap_or(ErrorCode::GenericError)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// A payload with declared field rules
pub trait Validate {
    /// Declare this payload's rules against the validator
    fn check(&self, v: &mut Validator);

    /// Evaluate all rules. Pure: the same payload always gets the same verdict.
    fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::new();
        self.check(&mut v);
        v.finish()
    }
}

/// Collects violations while rules are declared
#[derive(Debug, Default)]
pub struct Validator {
    prefix: Vec<String>,
    violations: Vec<Violation>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.violations,
            })
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    fn path(&self, field: &str) -> String {
        if self.prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.prefix.join("."), field)
        }
    }

    fn report(&mut self, field: &str, rule: Rule, value: String) {
        let field = self.path(field);
        self.violations.push(Violation { field, rule, value });
    }

    /// Rules for a string field that is always present on the type
    pub fn string<'v, 's>(&'v mut self, field: &str, value: &'s str) -> StringRules<'v, 's> {
        self.opt_string(field, Some(value))
    }

    /// Rules for an optional string field
    pub fn opt_string<'v, 's>(&'v mut self, field: &str, value: Option<&'s str>) -> StringRules<'v, 's> {
        StringRules {
            v: self,
            field: field.to_string(),
            value,
            missing: false,
        }
    }

    /// Rules for a numeric field
    pub fn number(&mut self, field: &str, value: impl Into<f64>) -> NumberRules<'_> {
        NumberRules {
            v: self,
            field: field.to_string(),
            value: Some(value.into()),
        }
    }

    /// Rules for an optional numeric field
    pub fn opt_number<N: Into<f64>>(&mut self, field: &str, value: Option<N>) -> NumberRules<'_> {
        NumberRules {
            v: self,
            field: field.to_string(),
            value: value.map(Into::into),
        }
    }

    /// Rules for a list field
    pub fn list<'v, 's, T>(&'v mut self, field: &str, items: &'s [T]) -> ListRules<'v, 's, T> {
        ListRules {
            v: self,
            field: field.to_string(),
            items,
        }
    }

    /// Validate a nested payload, prefixing its violations with `field`
    pub fn nested<T: Validate + ?Sized>(&mut self, field: &str, value: &T) {
        self.prefix.push(field.to_string());
        value.check(self);
        self.prefix.pop();
    }

    /// Validate a nested payload if present
    pub fn opt_nested<T: Validate>(&mut self, field: &str, value: Option<&T>) {
        if let Some(value) = value {
            self.nested(field, value);
        }
    }

    /// Require a field that is neither a string nor a list to be present
    pub fn present<T: fmt::Debug>(&mut self, field: &str, value: Option<&T>) {
        if value.is_none() {
            self.report(field, Rule::Required, "absent".to_string());
        }
    }

    /// At least one of `fields` must be present; `present[i]` tells whether `fields[i]` is
    pub fn at_least_one_of(&mut self, fields: &'static [&'static str], present: &[bool]) {
        if !present.iter().any(|p| *p) {
            let field = fields.join("|");
            self.report(&field, Rule::AtLeastOneOf(fields), "none present".to_string());
        }
    }

    /// At most one of `fields` may be present
    pub fn exclusive(&mut self, fields: &'static [&'static str], present: &[bool]) {
        let count = present.iter().filter(|p| **p).count();
        if count > 1 {
            let field = fields.join("|");
            self.report(&field, Rule::Exclusive(fields), format!("{} present", count));
        }
    }

    /// `field` is required whenever `sibling` is present
    pub fn required_with(&mut self, field: &str, present: bool, sibling: &'static str, sibling_present: bool) {
        if sibling_present && !present {
            self.report(field, Rule::RequiredWith(sibling), "absent".to_string());
        }
    }

    /// A named rule evaluated by the caller
    pub fn custom(&mut self, field: &str, rule: &'static str, holds: bool, value: impl fmt::Display) {
        if !holds {
            self.report(field, Rule::Custom(rule), value.to_string());
        }
    }
}

/// Rule chain for one string field.
///
/// Only `required` treats the empty string as absent. Every other rule sees
/// the raw value, unless `required` has already reported the field.
pub struct StringRules<'v, 's> {
    v: &'v mut Validator,
    field: String,
    value: Option<&'s str>,
    missing: bool,
}

impl<'v, 's> StringRules<'v, 's> {
    pub fn required(mut self) -> Self {
        if self.value.map_or(true, str::is_empty) {
            self.v.report(&self.field, Rule::Required, "\"\"".to_string());
            self.missing = true;
        }
        self
    }

    /// The value the remaining rules apply to
    fn checked(&self) -> Option<&'s str> {
        if self.missing {
            None
        } else {
            self.value
        }
    }

    pub fn min_len(self, min: usize) -> Self {
        if let Some(s) = self.checked() {
            if s.chars().count() < min {
                self.v.report(&self.field, Rule::MinLength(min), quoted(s));
            }
        }
        self
    }

    pub fn max_len(self, max: usize) -> Self {
        if let Some(s) = self.checked() {
            if s.chars().count() > max {
                self.v.report(&self.field, Rule::MaxLength(max), quoted(s));
            }
        }
        self
    }

    pub fn one_of(self, allowed: &'static [&'static str]) -> Self {
        if let Some(s) = self.checked() {
            if !allowed.contains(&s) {
                self.v.report(&self.field, Rule::OneOf(allowed), quoted(s));
            }
        }
        self
    }

    pub fn uri(self) -> Self {
        if let Some(s) = self.checked() {
            if !is_uri(s) {
                self.v.report(&self.field, Rule::Uri, quoted(s));
            }
        }
        self
    }
}

/// Rule chain for one numeric field
pub struct NumberRules<'v> {
    v: &'v mut Validator,
    field: String,
    value: Option<f64>,
}

impl<'v> NumberRules<'v> {
    pub fn required(self) -> Self {
        if self.value.is_none() {
            self.v.report(&self.field, Rule::Required, "absent".to_string());
        }
        self
    }

    pub fn min(self, min: f64) -> Self {
        if let Some(n) = self.value {
            if n < min {
                self.v.report(&self.field, Rule::Min(min), n.to_string());
            }
        }
        self
    }

    pub fn max(self, max: f64) -> Self {
        if let Some(n) = self.value {
            if n > max {
                self.v.report(&self.field, Rule::Max(max), n.to_string());
            }
        }
        self
    }

    pub fn non_negative(self) -> Self {
        self.min(0.0)
    }
}

/// Rule chain for one list field
pub struct ListRules<'v, 's, T> {
    v: &'v mut Validator,
    field: String,
    items: &'s [T],
}

impl<'v, 's, T> ListRules<'v, 's, T> {
    /// The list must have at least one element
    pub fn required(self) -> Self {
        if self.items.is_empty() {
            self.v.report(&self.field, Rule::Required, "[]".to_string());
        }
        self
    }

    pub fn min_items(self, min: usize) -> Self {
        if self.items.len() < min {
            let len = self.items.len();
            self.v.report(&self.field, Rule::MinItems(min), format!("{} items", len));
        }
        self
    }

    pub fn max_items(self, max: usize) -> Self {
        if self.items.len() > max {
            let len = self.items.len();
            self.v.report(&self.field, Rule::MaxItems(max), format!("{} items", len));
        }
        self
    }

    pub fn unique(self) -> Self
    where
        T: Eq + Hash + fmt::Debug,
    {
        let mut seen = HashSet::new();
        for (i, item) in self.items.iter().enumerate() {
            if !seen.insert(item) {
                let field = format!("{}[{}]", self.field, i);
                self.v.report(&field, Rule::Unique, format!("{:?}", item));
            }
        }
        self
    }

    /// Declare rules for every element; the closure gets the element's field name
    pub fn each<F>(self, mut f: F) -> Self
    where
        F: FnMut(&mut Validator, &str, &T),
    {
        for (i, item) in self.items.iter().enumerate() {
            let field = format!("{}[{}]", self.field, i);
            f(&mut *self.v, &field, item);
        }
        self
    }

    /// Validate every element as a nested payload
    pub fn each_nested(self) -> Self
    where
        T: Validate,
    {
        for (i, item) in self.items.iter().enumerate() {
            let field = format!("{}[{}]", self.field, i);
            self.v.nested(&field, item);
        }
        self
    }
}

fn quoted(s: &str) -> String {
    format!("{:?}", s)
}

/// `scheme ":" rest`, with an RFC 3986 scheme and no whitespace
fn is_uri(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((scheme, rest)) = s.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_alpha
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
}
