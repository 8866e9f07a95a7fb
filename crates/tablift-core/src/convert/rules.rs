//! The basic conversion rules.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::error::ConfigError;
use crate::value::{FormData, RawRecord, Value};

use super::{Conversion, ConvertError, FieldBinding};

/// Copy the bound column's value through unchanged.
pub struct DirectConversion {
    binding: FieldBinding,
}

impl DirectConversion {
    /// Bind to one source column.
    pub fn new(column: impl Into<String>) -> Result<Self, ConfigError> {
        let column = column.into();
        if column.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "direct" });
        }
        Ok(Self {
            binding: FieldBinding::Column(column),
        })
    }
}

impl Conversion for DirectConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        _raw_record: &mut RawRecord,
        _form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        Ok(raw_value.clone())
    }
}

/// Concatenate several source columns with a single-space separator.
pub struct ConcatConversion {
    binding: FieldBinding,
    columns: Vec<String>,
}

impl ConcatConversion {
    /// Bind to a fixed tuple of source columns.
    pub fn new(columns: Vec<String>) -> Result<Self, ConfigError> {
        if columns.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "concat" });
        }
        Ok(Self {
            binding: FieldBinding::Columns(columns.clone()),
            columns,
        })
    }
}

impl Conversion for ConcatConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        _raw_value: &Value,
        raw_record: &mut RawRecord,
        _form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        let mut parts = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = raw_record
                .get(column)
                .ok_or_else(|| ConvertError::MissingColumn(column.clone()))?;
            parts.push(value.render());
        }
        Ok(Value::Text(parts.join(" ")))
    }
}

/// Resolve the source column dynamically from context, then copy its value.
pub struct DynamicSourceConversion {
    binding: FieldBinding,
    resolver: Box<dyn Fn(&Value, &RawRecord, &FormData) -> String>,
}

impl DynamicSourceConversion {
    /// Build from a resolver that names the source column per record.
    pub fn new(resolver: impl Fn(&Value, &RawRecord, &FormData) -> String + 'static) -> Self {
        Self {
            binding: FieldBinding::Unbound,
            resolver: Box::new(resolver),
        }
    }
}

impl Conversion for DynamicSourceConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        raw_record: &mut RawRecord,
        form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        let column = (self.resolver)(raw_value, raw_record, form_data);
        raw_record
            .get(&column)
            .cloned()
            .ok_or(ConvertError::MissingColumn(column))
    }
}

/// Map an enumerable set of raw values onto the boolean domain.
///
/// Matching is case-insensitive unless normalization is disabled; values
/// missing from the truth table map to `false`.
pub struct BooleanConversion {
    binding: FieldBinding,
    truth_table: Vec<(String, bool)>,
    normalize: bool,
}

impl BooleanConversion {
    /// Bind to one source column with the given truth table.
    pub fn new(
        column: impl Into<String>,
        truth_table: Vec<(String, bool)>,
    ) -> Result<Self, ConfigError> {
        let column = column.into();
        if column.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "boolean" });
        }
        Ok(Self {
            binding: FieldBinding::Column(column),
            truth_table,
            normalize: true,
        })
    }

    /// Disable case-insensitive matching.
    pub fn without_normalize(mut self) -> Self {
        self.normalize = false;
        self
    }
}

impl Conversion for BooleanConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        _raw_record: &mut RawRecord,
        _form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        let mut key = raw_value.render();
        if self.normalize {
            key = key.to_lowercase();
        }
        let truth = self
            .truth_table
            .iter()
            .find(|(entry, _)| {
                if self.normalize {
                    entry.to_lowercase() == key
                } else {
                    *entry == key
                }
            })
            .map(|(_, truth)| *truth)
            .unwrap_or(false);
        Ok(Value::Bool(truth))
    }
}

/// Strip configured characters from both ends, then apply a cleanup
/// function.
pub struct CleanConversion {
    binding: FieldBinding,
    strip_chars: String,
    clean: Option<Box<dyn Fn(&str) -> Value>>,
}

impl CleanConversion {
    /// Bind to one source column.
    pub fn new(column: impl Into<String>, strip_chars: impl Into<String>) -> Result<Self, ConfigError> {
        let column = column.into();
        if column.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "clean" });
        }
        Ok(Self {
            binding: FieldBinding::Column(column),
            strip_chars: strip_chars.into(),
            clean: None,
        })
    }

    /// Apply a further cleanup function after stripping.
    pub fn with_clean(mut self, clean: impl Fn(&str) -> Value + 'static) -> Self {
        self.clean = Some(Box::new(clean));
        self
    }
}

impl Conversion for CleanConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        _raw_record: &mut RawRecord,
        _form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        let rendered = raw_value.render();
        let stripped = rendered.trim_matches(|c: char| self.strip_chars.contains(c));
        Ok(match &self.clean {
            Some(clean) => clean(stripped),
            None => Value::Text(stripped.to_string()),
        })
    }
}

/// Evaluate an arbitrary boolean predicate over the raw record.
pub struct FlagConversion {
    binding: FieldBinding,
    predicate: Box<dyn Fn(&Value, &RawRecord) -> bool>,
}

impl FlagConversion {
    /// Bind to one source column with the given predicate.
    pub fn new(
        column: impl Into<String>,
        predicate: impl Fn(&Value, &RawRecord) -> bool + 'static,
    ) -> Result<Self, ConfigError> {
        let column = column.into();
        if column.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "flag" });
        }
        Ok(Self {
            binding: FieldBinding::Column(column),
            predicate: Box::new(predicate),
        })
    }
}

impl Conversion for FlagConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        raw_record: &mut RawRecord,
        _form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        Ok(Value::Bool((self.predicate)(raw_value, raw_record)))
    }
}

/// Upgrade a date-only value into a date-time at midnight.
///
/// Empty input yields an empty-string sentinel rather than an error, so the
/// target slot stays populatable by form defaults.
pub struct DateToDateTimeConversion {
    binding: FieldBinding,
}

impl DateToDateTimeConversion {
    /// Bind to one source column.
    pub fn new(column: impl Into<String>) -> Result<Self, ConfigError> {
        let column = column.into();
        if column.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "date-to-datetime" });
        }
        Ok(Self {
            binding: FieldBinding::Column(column),
        })
    }
}

impl Conversion for DateToDateTimeConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        _raw_record: &mut RawRecord,
        _form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        if !raw_value.is_truthy() {
            return Ok(Value::Text(String::new()));
        }
        let rendered = raw_value.render();
        match parse_loose(rendered.trim()) {
            Some(dt) => Ok(Value::DateTime(dt)),
            None => Err(ConvertError::InvalidValue {
                value: rendered,
                message: "not a recognizable date".to_string(),
            }),
        }
    }
}

/// Parse a free-text date, yielding no value on failure instead of raising.
pub struct DateOrNoneConversion {
    binding: FieldBinding,
}

impl DateOrNoneConversion {
    /// Bind to one source column.
    pub fn new(column: impl Into<String>) -> Result<Self, ConfigError> {
        let column = column.into();
        if column.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "date-or-none" });
        }
        Ok(Self {
            binding: FieldBinding::Column(column),
        })
    }
}

impl Conversion for DateOrNoneConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        _raw_record: &mut RawRecord,
        _form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        if !raw_value.is_truthy() {
            return Ok(Value::Null);
        }
        let rendered = raw_value.render();
        match parse_loose(rendered.trim()) {
            Some(dt) => Ok(Value::DateTime(dt)),
            None => {
                debug!(value = %rendered, "date did not parse; yielding no value");
                Ok(Value::Null)
            }
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%d.%m.%Y", "%B %d, %Y"];

/// Try a fixed set of common legacy-export formats, date-time first.
fn parse_loose(input: &str) -> Option<NaiveDateTime> {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}
