//! Choice conversions: map labelled legacy values onto stored keys.

use tracing::{debug, info};

use crate::error::ConfigError;
use crate::value::{FormData, RawRecord, Value};

use super::{Conversion, ConvertError, FieldBinding};

/// Side-effecting customization hook, invoked with the raw value, the raw
/// record, the normalized label→key mapping, the resolved value, and the
/// in-progress output, always after the match/no-match decision.
pub type ChoiceCallback =
    Box<dyn Fn(&Value, &mut RawRecord, &[(String, Value)], &Value, &mut FormData)>;

/// Resolve a raw value against a set of `(stored key, display label)`
/// choices.
///
/// The raw value and the labels are normalized identically (lower-case plus
/// character strip, unless normalization is disabled) and resolved by exact
/// match. With substring matching enabled, an unmatched value falls back to
/// the first label containing it; which label wins when several contain the
/// value follows mapping order and should be treated as arbitrary.
///
/// Unmatched values with no default produce an empty result; a configured
/// shadow field additionally records the raw value on the raw record as an
/// audit trail.
pub struct ChoiceConversion {
    binding: FieldBinding,
    choices: Vec<(Value, String)>,
    normalize: bool,
    substring_check: bool,
    default_value: Option<Value>,
    shadow_field: Option<String>,
    strip_chars: String,
    callback: Option<ChoiceCallback>,
}

impl ChoiceConversion {
    /// Bind to one source column with the given choices.
    pub fn new(
        column: impl Into<String>,
        choices: Vec<(Value, String)>,
    ) -> Result<Self, ConfigError> {
        let column = column.into();
        if column.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "choice" });
        }
        Ok(Self {
            binding: FieldBinding::Column(column),
            choices,
            normalize: true,
            substring_check: false,
            default_value: None,
            shadow_field: None,
            strip_chars: String::from(" "),
            callback: None,
        })
    }

    /// Disable normalization: labels and values match verbatim.
    pub fn without_normalize(mut self) -> Self {
        self.normalize = false;
        self
    }

    /// Fall back to substring matching when no label matches exactly.
    pub fn with_substring_check(mut self) -> Self {
        self.substring_check = true;
        self
    }

    /// Value to produce when nothing matches.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Record unmatched raw values on the raw record under this column.
    pub fn with_shadow_field(mut self, field: impl Into<String>) -> Self {
        self.shadow_field = Some(field.into());
        self
    }

    /// Characters stripped from both ends during normalization.
    pub fn with_strip_chars(mut self, chars: impl Into<String>) -> Self {
        self.strip_chars = chars.into();
        self
    }

    /// Install a post-decision callback.
    pub fn with_callback(
        mut self,
        callback: impl Fn(&Value, &mut RawRecord, &[(String, Value)], &Value, &mut FormData) + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    fn normalize_key(&self, input: &str) -> String {
        if !self.normalize {
            return input.to_string();
        }
        input
            .to_lowercase()
            .trim_matches(|c: char| self.strip_chars.contains(c))
            .to_string()
    }

    /// Build the label→key mapping with the same normalization applied to
    /// the labels.
    fn choice_mapping(&self) -> Vec<(String, Value)> {
        self.choices
            .iter()
            .map(|(key, label)| (self.normalize_key(label), key.clone()))
            .collect()
    }

    fn translate(&self, translation_key: &str, mapping: &[(String, Value)]) -> Value {
        if let Some((_, key)) = mapping.iter().find(|(label, _)| label == translation_key) {
            return key.clone();
        }
        if self.substring_check && !translation_key.is_empty() {
            if let Some((label, key)) = mapping
                .iter()
                .find(|(label, _)| label.contains(translation_key))
            {
                debug!(value = translation_key, label = label.as_str(), "substring match");
                return key.clone();
            }
        }
        self.default_value.clone().unwrap_or(Value::Null)
    }

    /// Resolve one raw value: normalize, translate, apply the shadow-field
    /// audit write and the callback.
    pub(crate) fn map_value(
        &self,
        raw_value: &Value,
        raw_record: &mut RawRecord,
        mapping: &[(String, Value)],
        form_data: &mut FormData,
    ) -> Value {
        let translation_key = self.normalize_key(&raw_value.render());
        let mapped = self.translate(&translation_key, mapping);
        info!(from = %raw_value.render(), to = %mapped.render(), "choice conversion");

        if !mapped.is_truthy() {
            if let Some(shadow) = &self.shadow_field {
                debug!(shadow = shadow.as_str(), "recording unmatched raw value");
                raw_record.set(shadow.clone(), raw_value.clone());
            }
        }
        if let Some(callback) = &self.callback {
            callback(raw_value, raw_record, mapping, &mapped, form_data);
        }

        mapped
    }
}

impl Conversion for ChoiceConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        raw_value: &Value,
        raw_record: &mut RawRecord,
        form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        let mapping = self.choice_mapping();
        Ok(self.map_value(raw_value, raw_record, &mapping, form_data))
    }
}

/// Split the raw value on a separator and resolve each token as a single
/// choice, collecting the truthy results in token order.
pub struct MultipleChoiceConversion {
    inner: ChoiceConversion,
    separator: String,
}

impl MultipleChoiceConversion {
    /// Bind to one source column with the given choices.
    pub fn new(
        column: impl Into<String>,
        choices: Vec<(Value, String)>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: ChoiceConversion::new(column, choices)?,
            separator: ",".to_string(),
        })
    }

    /// Token separator (`,` unless specified).
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Configure the underlying single-choice behavior.
    pub fn map_inner(mut self, configure: impl FnOnce(ChoiceConversion) -> ChoiceConversion) -> Self {
        self.inner = configure(self.inner);
        self
    }
}

impl Conversion for MultipleChoiceConversion {
    fn binding(&self) -> &FieldBinding {
        self.inner.binding()
    }

    fn convert(
        &self,
        raw_value: &Value,
        raw_record: &mut RawRecord,
        form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        let mapping = self.inner.choice_mapping();
        let rendered = raw_value.render();

        let mut mapped_values = Vec::new();
        for token in rendered.split(self.separator.as_str()) {
            let mapped = self.inner.map_value(
                &Value::Text(token.to_string()),
                raw_record,
                &mapping,
                form_data,
            );
            if mapped.is_truthy() {
                mapped_values.push(mapped);
            }
        }
        Ok(Value::List(mapped_values))
    }
}

/// Resolve several source columns under one fixed choice mapping, collecting
/// the truthy results in column-declaration order.
///
/// Normalization is off unless explicitly enabled; legacy multi-column flag
/// exports carry the stored label verbatim.
pub struct MultipleColumnChoiceConversion {
    inner: ChoiceConversion,
    columns: Vec<String>,
    binding: FieldBinding,
}

impl MultipleColumnChoiceConversion {
    /// Bind to a fixed tuple of source columns with the given choices.
    pub fn new(
        columns: Vec<String>,
        choices: Vec<(Value, String)>,
    ) -> Result<Self, ConfigError> {
        if columns.is_empty() {
            return Err(ConfigError::UnboundConversion { rule: "multiple-column-choice" });
        }
        // The inner conversion is keyed off the first column only to satisfy
        // its binding; reads go through the column list.
        let inner = ChoiceConversion::new(columns[0].clone(), choices)?.without_normalize();
        Ok(Self {
            binding: FieldBinding::Columns(columns.clone()),
            inner,
            columns,
        })
    }

    /// Configure the underlying single-choice behavior.
    pub fn map_inner(mut self, configure: impl FnOnce(ChoiceConversion) -> ChoiceConversion) -> Self {
        self.inner = configure(self.inner);
        self
    }
}

impl Conversion for MultipleColumnChoiceConversion {
    fn binding(&self) -> &FieldBinding {
        &self.binding
    }

    fn convert(
        &self,
        _raw_value: &Value,
        raw_record: &mut RawRecord,
        form_data: &mut FormData,
    ) -> Result<Value, ConvertError> {
        let mapping = self.inner.choice_mapping();

        let mut mapped_values = Vec::new();
        for column in &self.columns {
            let value = raw_record
                .get(column)
                .cloned()
                .ok_or_else(|| ConvertError::MissingColumn(column.clone()))?;
            let mapped = self.inner.map_value(&value, raw_record, &mapping, form_data);
            if mapped.is_truthy() {
                mapped_values.push(mapped);
            }
        }
        Ok(Value::List(mapped_values))
    }
}
