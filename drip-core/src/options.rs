//! Typed option schemas for backfill definitions
//!
//! A definition declares its parameters once, as an ordered list of
//! [`OptionSpec`]s. Operators submit untyped JSON; [`OptionsSchema::cast`]
//! coerces it into [`TypedOptions`], which definitions use to build their scope.
//!
//! Options bound to a record field via [`OptionSpec::filter_on`] also produce
//! filter predicates, so a definition can narrow its scope with
//! `Scope::apply(schema.predicates(&options))`. Absent or blank values never
//! produce a predicate.

use crate::scope::{FilterOp, Predicate};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

static ENUM_DELIMITER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,;\s]+").expect("enum delimiter regex"));

/// Allowed values of an enumeration option
#[derive(Clone)]
pub enum EnumValues {
    /// A fixed list declared with the option
    Fixed(Vec<String>),

    /// Computed each time the allowed values are needed
    Computed(Arc<dyn Fn() -> Vec<String> + Send + Sync>),
}

impl EnumValues {
    /// Resolve the allowed values
    pub fn available(&self) -> Vec<String> {
        match self {
            Self::Fixed(values) => values.clone(),
            Self::Computed(source) => source(),
        }
    }
}

impl fmt::Debug for EnumValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(values) => f.debug_tuple("Fixed").field(values).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Type of a declared option
#[derive(Debug, Clone)]
pub enum OptionType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    /// Multi-valued, string-compatible enumeration
    Enum(EnumValues),
}

impl OptionType {
    /// Enumeration with a fixed list of allowed values
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(EnumValues::Fixed(values.into_iter().map(Into::into).collect()))
    }

    /// Enumeration whose allowed values are computed on demand
    pub fn computed_enumeration<F>(source: F) -> Self
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        Self::Enum(EnumValues::Computed(Arc::new(source)))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Enum(_) => "enum",
        }
    }

    fn input_kind(&self) -> InputKind {
        match self {
            Self::String => InputKind::Text,
            Self::Integer => InputKind::Integer,
            Self::Decimal => InputKind::Decimal,
            Self::Boolean => InputKind::Checkbox,
            Self::Date => InputKind::Date,
            Self::DateTime => InputKind::DateTime,
            Self::Enum(_) => InputKind::MultiSelect,
        }
    }
}

/// A typed option value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    List(Vec<String>),
}

impl OptionValue {
    /// JSON representation used in predicates and persisted options
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Decimal(d) => Value::from(*d),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => Value::String(dt.to_rfc3339()),
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Blank values are skipped when building filters
    pub fn is_blank(&self) -> bool {
        match self {
            Self::String(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for OptionValue {
    fn from(d: f64) -> Self {
        Self::Decimal(d)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<NaiveDate> for OptionValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<DateTime<Utc>> for OptionValue {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// Value pre-filled in an option's form input
#[derive(Clone)]
pub enum FormDefault {
    Value(Value),
    Computed(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl FormDefault {
    pub fn resolve(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Computed(source) => source(),
        }
    }
}

impl fmt::Debug for FormDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Kind of form input an option renders as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Integer,
    Decimal,
    Checkbox,
    Date,
    DateTime,
    MultiSelect,
}

/// Declaration of a single option
#[derive(Debug, Clone)]
pub struct OptionSpec {
    name: String,
    option_type: OptionType,
    default: Option<OptionValue>,
    form_default: Option<FormDefault>,
    filter_field: Option<String>,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>, option_type: OptionType) -> Self {
        Self {
            name: name.into(),
            option_type,
            default: None,
            form_default: None,
            filter_field: None,
        }
    }

    /// Value used when the option is absent from the submitted input
    pub fn default_value(mut self, value: impl Into<OptionValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Value pre-filled in the form (display only, not used by `cast`)
    pub fn form_default(mut self, value: impl Into<Value>) -> Self {
        self.form_default = Some(FormDefault::Value(value.into()));
        self
    }

    /// Form default computed when the form is rendered
    pub fn form_default_with<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.form_default = Some(FormDefault::Computed(Arc::new(source)));
        self
    }

    /// Filter the definition's scope on `field` with this option's value
    pub fn filter_on(mut self, field: impl Into<String>) -> Self {
        self.filter_field = Some(field.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn option_type(&self) -> &OptionType {
        &self.option_type
    }

    pub fn default(&self) -> Option<&OptionValue> {
        self.default.as_ref()
    }

    pub fn filter_field(&self) -> Option<&str> {
        self.filter_field.as_deref()
    }

    /// Cast a raw JSON value; `Ok(None)` means absent
    fn cast(&self, raw: &Value) -> Result<Option<OptionValue>> {
        if raw.is_null() {
            return Ok(None);
        }

        let field = self.name.as_str();
        let value = match &self.option_type {
            OptionType::String => match raw {
                Value::String(s) => OptionValue::String(s.clone()),
                Value::Number(n) => OptionValue::String(n.to_string()),
                Value::Bool(b) => OptionValue::String(b.to_string()),
                other => return Err(cast_error(field, format!("expected a string, got {}", other))),
            },
            OptionType::Integer => match blank_to_none(raw) {
                None => return Ok(None),
                Some(raw) => OptionValue::Integer(cast_integer(field, raw)?),
            },
            OptionType::Decimal => match blank_to_none(raw) {
                None => return Ok(None),
                Some(raw) => OptionValue::Decimal(cast_decimal(field, raw)?),
            },
            OptionType::Boolean => match blank_to_none(raw) {
                None => return Ok(None),
                Some(raw) => OptionValue::Boolean(cast_boolean(field, raw)?),
            },
            OptionType::Date => match blank_to_none(raw) {
                None => return Ok(None),
                Some(raw) => OptionValue::Date(cast_date(field, raw)?),
            },
            OptionType::DateTime => match blank_to_none(raw) {
                None => return Ok(None),
                Some(raw) => OptionValue::DateTime(cast_datetime(field, raw)?),
            },
            OptionType::Enum(values) => {
                let selected = cast_enum(field, raw)?;
                let allowed = values.available();
                let unknown: Vec<&String> =
                    selected.iter().filter(|v| !allowed.contains(v)).collect();
                if !unknown.is_empty() {
                    warn!(option = field, values = ?unknown, "Enum option value outside the allowed set");
                }
                OptionValue::List(selected)
            }
        };

        Ok(Some(value))
    }
}

fn cast_error(field: &str, message: impl Into<String>) -> Error {
    Error::Cast {
        field: field.to_string(),
        message: message.into(),
    }
}

fn blank_to_none(raw: &Value) -> Option<&Value> {
    match raw {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(other),
    }
}

fn cast_integer(field: &str, raw: &Value) -> Result<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| cast_error(field, format!("{} is not an integer", n))),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f.trunc() as i64))
                .map_err(|_| cast_error(field, format!("'{}' is not an integer", s)))
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(cast_error(field, format!("expected an integer, got {}", other))),
    }
}

fn cast_decimal(field: &str, raw: &Value) -> Result<f64> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| cast_error(field, format!("{} is not a number", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| cast_error(field, format!("'{}' is not a decimal", s.trim()))),
        other => Err(cast_error(field, format!("expected a decimal, got {}", other))),
    }
}

fn cast_boolean(field: &str, raw: &Value) -> Result<bool> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(cast_error(field, format!("{} is not a boolean", n))),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" | "on" => Ok(true),
            "0" | "f" | "false" | "no" | "off" => Ok(false),
            other => Err(cast_error(field, format!("'{}' is not a boolean", other))),
        },
        other => Err(cast_error(field, format!("expected a boolean, got {}", other))),
    }
}

fn cast_date(field: &str, raw: &Value) -> Result<NaiveDate> {
    let s = raw
        .as_str()
        .ok_or_else(|| cast_error(field, format!("expected a date string, got {}", raw)))?
        .trim();

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| parse_datetime(s).map(|dt| dt.date_naive()).ok_or(()))
        .map_err(|_| cast_error(field, format!("'{}' is not a date", s)))
}

fn cast_datetime(field: &str, raw: &Value) -> Result<DateTime<Utc>> {
    let s = raw
        .as_str()
        .ok_or_else(|| cast_error(field, format!("expected a datetime string, got {}", raw)))?
        .trim();

    parse_datetime(s).ok_or_else(|| cast_error(field, format!("'{}' is not a datetime", s)))
}

/// Parse RFC 3339 or a naive `YYYY-MM-DD HH:MM[:SS]` timestamp (interpreted as UTC)
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

fn cast_enum(field: &str, raw: &Value) -> Result<Vec<String>> {
    match raw {
        Value::String(s) => Ok(split_enum(s)),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(cast_error(field, format!("unexpected enum value {}", other))),
            })
            .filter(|item| !matches!(item, Ok(s) if s.is_empty()))
            .collect(),
        other => Err(cast_error(field, format!("expected a delimited string, got {}", other))),
    }
}

/// Split a comma / semicolon / whitespace delimited enum value
pub fn split_enum(raw: &str) -> Vec<String> {
    ENUM_DELIMITER
        .split(raw)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Options after casting, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedOptions {
    values: Vec<(String, Option<OptionValue>)>,
}

impl TypedOptions {
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(OptionValue::as_i64)
    }

    pub fn decimal(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(OptionValue::as_f64)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(OptionValue::as_str)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(OptionValue::as_bool)
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        self.get(name).and_then(OptionValue::as_date)
    }

    pub fn datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(OptionValue::as_datetime)
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(OptionValue::as_list)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&OptionValue>)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value.as_ref()))
    }

    /// JSON object with absent options as `null`
    pub fn to_json(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(key, value)| (key.clone(), value.as_ref().map_or(Value::Null, OptionValue::to_json)))
            .collect()
    }
}

/// Display metadata of one option
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMetadata {
    pub label: String,
    pub input: InputKind,
    pub form_default: Option<Value>,
    pub choices: Option<Vec<String>>,
}

/// A rendered-ready form field for one option
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub input: InputKind,
    pub value: Option<Value>,
    pub choices: Vec<String>,
    pub selected: Vec<String>,
}

/// Ordered, typed parameter declarations of a backfill definition
#[derive(Debug, Clone, Default)]
pub struct OptionsSchema {
    specs: Vec<OptionSpec>,
}

/// Builder for [`OptionsSchema`]
#[derive(Debug, Default)]
pub struct OptionsSchemaBuilder {
    specs: Vec<OptionSpec>,
}

impl OptionsSchemaBuilder {
    pub fn option(mut self, spec: OptionSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Build the schema, rejecting duplicate names
    pub fn build(self) -> Result<OptionsSchema> {
        let mut schema = OptionsSchema::default();
        for spec in self.specs {
            schema.declare(spec)?;
        }
        Ok(schema)
    }
}

impl OptionsSchema {
    pub fn builder() -> OptionsSchemaBuilder {
        OptionsSchemaBuilder::default()
    }

    /// Declare an option
    pub fn declare(&mut self, spec: OptionSpec) -> Result<&mut Self> {
        if self.get(spec.name()).is_some() {
            return Err(Error::InvalidSchema(format!(
                "option '{}' is declared twice",
                spec.name()
            )));
        }
        self.specs.push(spec);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn specs(&self) -> &[OptionSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|spec| spec.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Cast raw input into typed options.
    ///
    /// Unknown keys fail with [`Error::UnknownOption`]; absent keys take the
    /// declared default.
    pub fn cast(&self, raw: &Map<String, Value>) -> Result<TypedOptions> {
        let known: HashSet<&str> = self.specs.iter().map(|spec| spec.name()).collect();
        let mut unknown: Vec<&str> = raw
            .keys()
            .map(String::as_str)
            .filter(|key| !known.contains(key))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(Error::UnknownOption(unknown.join(", ")));
        }

        let values = self
            .specs
            .iter()
            .map(|spec| {
                let value = match raw.get(spec.name()) {
                    Some(raw_value) => spec.cast(raw_value)?,
                    None => spec.default.clone(),
                };
                Ok((spec.name.clone(), value))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TypedOptions { values })
    }

    /// Predicates for every filter-bound option with a non-blank value
    pub fn predicates(&self, options: &TypedOptions) -> Vec<Predicate> {
        self.specs
            .iter()
            .filter_map(|spec| {
                let field = spec.filter_field()?;
                let value = options.get(spec.name()).filter(|v| !v.is_blank())?;
                let op = match value {
                    OptionValue::List(_) => FilterOp::In,
                    _ => FilterOp::Eq,
                };
                Some(Predicate::new(field, op, value.to_json()))
            })
            .collect()
    }

    /// Display metadata for a declared option
    pub fn display_metadata(&self, name: &str) -> Option<DisplayMetadata> {
        let spec = self.get(name)?;
        Some(DisplayMetadata {
            label: spec.name.to_uppercase(),
            input: spec.option_type.input_kind(),
            form_default: spec.form_default.as_ref().map(FormDefault::resolve),
            choices: match &spec.option_type {
                OptionType::Enum(values) => Some(values.available()),
                _ => None,
            },
        })
    }

    /// Form fields for every option, pre-filled from `current`.
    ///
    /// A field's value is the current value, else its form default, else its
    /// declared default. Enum fields select the current subset, or every choice
    /// when nothing is selected yet.
    pub fn form_fields(&self, current: &Map<String, Value>) -> Vec<FormField> {
        self.specs
            .iter()
            .map(|spec| {
                let current_value = current.get(spec.name()).filter(|v| !v.is_null()).cloned();

                match &spec.option_type {
                    OptionType::Enum(values) => {
                        let choices = values.available();
                        let selected = match current_value.as_ref() {
                            Some(Value::String(s)) if !s.trim().is_empty() => split_enum(s),
                            Some(Value::Array(items)) if !items.is_empty() => items
                                .iter()
                                .filter_map(|item| item.as_str().map(str::to_string))
                                .collect(),
                            _ => choices.clone(),
                        };
                        FormField {
                            name: spec.name.clone(),
                            label: spec.name.to_uppercase(),
                            input: InputKind::MultiSelect,
                            value: Some(Value::String(selected.join(","))),
                            choices,
                            selected,
                        }
                    }
                    other => FormField {
                        name: spec.name.clone(),
                        label: spec.name.to_uppercase(),
                        input: other.input_kind(),
                        value: current_value
                            .or_else(|| spec.form_default.as_ref().map(FormDefault::resolve))
                            .or_else(|| spec.default.as_ref().map(OptionValue::to_json)),
                        choices: Vec::new(),
                        selected: Vec::new(),
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn employee_schema() -> OptionsSchema {
        OptionsSchema::builder()
            .option(OptionSpec::new("age", OptionType::Integer).filter_on("age"))
            .option(OptionSpec::new("name", OptionType::String).filter_on("name"))
            .option(
                OptionSpec::new("colors", OptionType::enumeration(["red", "green", "blue"]))
                    .filter_on("color"),
            )
            .option(OptionSpec::new("dry_run", OptionType::Boolean).default_value(true))
            .build()
            .unwrap()
    }

    #[test]
    fn test_cast_scalars() {
        let schema = employee_schema();
        let typed = schema
            .cast(&raw(json!({"age": "25", "name": "John", "dry_run": "0"})))
            .unwrap();

        assert_eq!(typed.integer("age"), Some(25));
        assert_eq!(typed.string("name"), Some("John"));
        assert_eq!(typed.boolean("dry_run"), Some(false));
    }

    #[test]
    fn test_cast_enum_splits_delimited_values() {
        let schema = employee_schema();

        let typed = schema.cast(&raw(json!({"colors": "red,green"}))).unwrap();
        assert_eq!(typed.list("colors").unwrap(), ["red", "green"]);

        let typed = schema.cast(&raw(json!({"colors": " red ; blue  green"}))).unwrap();
        assert_eq!(typed.list("colors").unwrap(), ["red", "blue", "green"]);

        let typed = schema.cast(&raw(json!({"colors": "green"}))).unwrap();
        assert_eq!(typed.list("colors").unwrap(), ["green"]);
    }

    #[test]
    fn test_cast_enum_is_lenient_about_membership() {
        let schema = employee_schema();
        let typed = schema.cast(&raw(json!({"colors": "red,purple"}))).unwrap();
        assert_eq!(typed.list("colors").unwrap(), ["red", "purple"]);
    }

    #[test]
    fn test_cast_defaults_and_blanks() {
        let schema = employee_schema();
        let typed = schema.cast(&raw(json!({"age": ""}))).unwrap();

        assert_eq!(typed.integer("age"), None);
        assert_eq!(typed.boolean("dry_run"), Some(true));
        assert_eq!(typed.get("name"), None);
    }

    #[test]
    fn test_cast_failure_names_field() {
        let schema = employee_schema();
        let err = schema.cast(&raw(json!({"age": "twenty"}))).unwrap_err();
        assert!(matches!(err, Error::Cast { ref field, .. } if field == "age"));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let schema = employee_schema();
        let err = schema.cast(&raw(json!({"salary": 10}))).unwrap_err();
        assert!(matches!(err, Error::UnknownOption(ref key) if key == "salary"));
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let result = OptionsSchema::builder()
            .option(OptionSpec::new("age", OptionType::Integer))
            .option(OptionSpec::new("age", OptionType::String))
            .build();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_dates_and_datetimes() {
        let schema = OptionsSchema::builder()
            .option(OptionSpec::new("since", OptionType::Date))
            .option(OptionSpec::new("until", OptionType::DateTime))
            .build()
            .unwrap();

        let typed = schema
            .cast(&raw(json!({"since": "2010-01-01", "until": "2024-03-01 12:30:00"})))
            .unwrap();
        assert_eq!(typed.date("since"), NaiveDate::from_ymd_opt(2010, 1, 1));
        assert_eq!(
            typed.datetime("until").map(|dt| dt.to_rfc3339()),
            Some("2024-03-01T12:30:00+00:00".to_string())
        );
        assert!(schema.cast(&raw(json!({"since": "yesterday"}))).is_err());
    }

    #[test]
    fn test_predicates_skip_blank_values() {
        let schema = employee_schema();
        let typed = schema
            .cast(&raw(json!({"age": 25, "name": "", "colors": "red,blue"})))
            .unwrap();

        let predicates = schema.predicates(&typed);
        assert_eq!(
            predicates,
            vec![
                Predicate::new("age", FilterOp::Eq, 25),
                Predicate::new("color", FilterOp::In, json!(["red", "blue"])),
            ]
        );
    }

    #[test]
    fn test_false_boolean_is_not_blank() {
        let schema = OptionsSchema::builder()
            .option(OptionSpec::new("active", OptionType::Boolean).filter_on("active"))
            .build()
            .unwrap();
        let typed = schema.cast(&raw(json!({"active": false}))).unwrap();
        assert_eq!(
            schema.predicates(&typed),
            vec![Predicate::new("active", FilterOp::Eq, false)]
        );
    }

    #[test]
    fn test_display_metadata() {
        let schema = OptionsSchema::builder()
            .option(OptionSpec::new("start_date", OptionType::Date).form_default("2010-01-01"))
            .option(
                OptionSpec::new("items", OptionType::computed_enumeration(|| {
                    vec!["a".to_string(), "b".to_string()]
                }))
                .form_default_with(|| json!("a")),
            )
            .build()
            .unwrap();

        let meta = schema.display_metadata("start_date").unwrap();
        assert_eq!(meta.form_default, Some(json!("2010-01-01")));
        assert_eq!(meta.input, InputKind::Date);

        let meta = schema.display_metadata("items").unwrap();
        assert_eq!(meta.choices, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(meta.form_default, Some(json!("a")));

        assert!(schema.display_metadata("missing").is_none());
    }

    #[test]
    fn test_form_fields_resolution_order() {
        let schema = OptionsSchema::builder()
            .option(OptionSpec::new("dry_run", OptionType::Boolean).default_value(true))
            .option(OptionSpec::new("name", OptionType::String).default_value("default_name"))
            .option(OptionSpec::new("since", OptionType::Date).form_default("2010-01-01"))
            .option(OptionSpec::new("colors", OptionType::enumeration(["red", "green"])))
            .build()
            .unwrap();

        let fields = schema.form_fields(&raw(json!({"name": "custom"})));
        assert_eq!(fields[0].value, Some(json!(true)));
        assert_eq!(fields[0].input, InputKind::Checkbox);
        assert_eq!(fields[1].value, Some(json!("custom")));
        assert_eq!(fields[2].value, Some(json!("2010-01-01")));
        assert_eq!(fields[3].selected, vec!["red", "green"]);
        assert_eq!(fields[3].label, "COLORS");

        let fields = schema.form_fields(&raw(json!({"colors": "green"})));
        assert_eq!(fields[3].selected, vec!["green"]);
    }
}
