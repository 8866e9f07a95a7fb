//! Value-transformation rules.
//!
//! Each rule maps one raw staged value (plus the raw record and the
//! in-progress output) to a transformed value. Rules are bound to a source
//! column, to a fixed tuple of columns, or declared field-less; the binding
//! tells the migration engine what to feed them.
//!
//! Rules never decide skip-vs-abort policy themselves: a missing column
//! surfaces as [`ConvertError::MissingColumn`] and the engine applies the
//! per-field skip policy.

pub mod choice;
pub mod rules;

use thiserror::Error;

use crate::value::{FormData, RawRecord, Value};

pub use choice::{
    ChoiceCallback, ChoiceConversion, MultipleChoiceConversion, MultipleColumnChoiceConversion,
};
pub use rules::{
    BooleanConversion, CleanConversion, ConcatConversion, DateOrNoneConversion,
    DateToDateTimeConversion, DirectConversion, DynamicSourceConversion, FlagConversion,
};

/// Errors a conversion rule can surface to the migration engine.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The rule's source column is not present in the record it reads from.
    #[error("column '{0}' is not present in the record")]
    MissingColumn(String),

    /// The raw value could not be coerced into the rule's domain.
    #[error("value '{value}' is not valid for this rule: {message}")]
    InvalidValue {
        /// Rendering of the offending raw value.
        value: String,
        /// What went wrong.
        message: String,
    },
}

/// What a conversion rule reads from the raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldBinding {
    /// One source column; the engine feeds its value as `raw_value`.
    Column(String),
    /// A fixed tuple of source columns; the rule reads them itself.
    Columns(Vec<String>),
    /// Explicitly field-less; the engine feeds `Null` as `raw_value`.
    Unbound,
}

/// A value-transformation rule.
///
/// `raw_record` is mutable only for the shadow-field audit path of the
/// choice conversion; `form_data` is mutable only for rule callbacks.
pub trait Conversion {
    /// The raw-record binding this rule reads from.
    fn binding(&self) -> &FieldBinding;

    /// Transform `raw_value` into the output value for the bound slot.
    fn convert(
        &self,
        raw_value: &Value,
        raw_record: &mut RawRecord,
        form_data: &mut FormData,
    ) -> Result<Value, ConvertError>;
}
