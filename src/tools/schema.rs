//! Pluggable input validators. A tool owns one `InputSchema`; the engine runs it before anything else.

use std::any::type_name;
use std::marker::PhantomData;

use jsonschema::JSONSchema;
use jsonschema::error::{ValidationError, ValidationErrorKind};
use schemars::{JsonSchema, schema_for};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::tools::error::{FieldError, SchemaError};

/// Validates raw tool input, producing the normalized input or every field error found.
pub trait InputSchema: Send + Sync {
    fn validate(&self, input: &Value) -> Result<Value, Vec<FieldError>>;

    /// JSON schema advertised to the model.
    fn to_json_schema(&self) -> Value;
}

/// Accepts any input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyInput;

impl InputSchema for AnyInput {
    fn validate(&self, input: &Value) -> Result<Value, Vec<FieldError>> {
        Ok(input.clone())
    }

    fn to_json_schema(&self) -> Value {
        json!({ "type": "object" })
    }
}

/// Schema derived from the input struct `T` and compiled once.
///
/// `null` input is treated as `{}`. Unknown fields pass validation and are dropped from
/// the normalized value, which is `T` serialized back to JSON.
pub struct TypedSchema<T> {
    schema: Value,
    validator: JSONSchema,
    _input: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T>
where
    T: JsonSchema + DeserializeOwned + Serialize,
{
    pub fn compile() -> Result<Self, SchemaError> {
        let input = type_name::<T>();
        let schema = serde_json::to_value(schema_for!(T))
            .map_err(|source| SchemaError::Serialize { input, source })?;
        let validator = JSONSchema::compile(&schema).map_err(|e| SchemaError::Compile {
            input,
            message: e.to_string(),
        })?;
        Ok(Self {
            schema,
            validator,
            _input: PhantomData,
        })
    }
}

impl<T> InputSchema for TypedSchema<T>
where
    T: JsonSchema + DeserializeOwned + Serialize,
{
    fn validate(&self, input: &Value) -> Result<Value, Vec<FieldError>> {
        let empty = Value::Object(Map::new());
        let input = if input.is_null() { &empty } else { input };
        if let Err(errors) = self.validator.validate(input) {
            return Err(errors.map(field_error).collect());
        }
        let typed: T = parse_input(input).map_err(|e| vec![e])?;
        serde_json::to_value(&typed).map_err(|e| vec![FieldError::new("", e.to_string())])
    }

    fn to_json_schema(&self) -> Value {
        self.schema.clone()
    }
}

fn field_error(error: ValidationError<'_>) -> FieldError {
    if let ValidationErrorKind::Required { property } = &error.kind {
        let name = property
            .as_str()
            .map_or_else(|| property.to_string(), str::to_string);
        return FieldError::new(name, "is required");
    }
    let path = error.instance_path.to_string();
    FieldError::new(path.trim_start_matches('/'), error.to_string())
}

/// Typed view of input that already passed its schema.
pub fn parse_input<T: DeserializeOwned>(input: &Value) -> Result<T, FieldError> {
    T::deserialize(input).map_err(|e| FieldError::new("", e.to_string()))
}
