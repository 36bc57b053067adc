use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterSchema {
    pub parameters: Vec<Parameter>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, param_type: ParamType, description: &str) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, param_type: ParamType, description: &str) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: false,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                json!({
                    "type": p.param_type.as_str(),
                    "description": p.description,
                }),
            );
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }

    /// Checks raw model-supplied arguments against the declared parameters and
    /// returns the coerced argument map. Undeclared keys are dropped.
    pub fn validate(&self, raw: &Value) -> Result<Map<String, Value>, String> {
        let empty = Map::new();
        let args = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(format!(
                    "expected an object of arguments, got {}",
                    type_name(other)
                ));
            }
        };

        let mut validated = Map::new();
        for p in &self.parameters {
            match args.get(&p.name) {
                None | Some(Value::Null) => {
                    if p.required {
                        return Err(format!("missing required parameter '{}'", p.name));
                    }
                }
                Some(value) => {
                    let coerced = coerce(value, p.param_type).ok_or_else(|| {
                        format!(
                            "parameter '{}' must be {}, got {}",
                            p.name,
                            p.param_type.as_str(),
                            type_name(value)
                        )
                    })?;
                    validated.insert(p.name.clone(), coerced);
                }
            }
        }

        for key in args.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                tracing::debug!(argument = %key, "dropping undeclared tool argument");
            }
        }

        Ok(validated)
    }
}

fn coerce(value: &Value, expected: ParamType) -> Option<Value> {
    match (expected, value) {
        (ParamType::String, Value::String(_)) => Some(value.clone()),
        (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (ParamType::Number, Value::Number(_)) => Some(value.clone()),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        (ParamType::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Some(value.clone())
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| json!(f as i64))
            }
        }
        (ParamType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(|i| json!(i)),

        (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },

        (ParamType::Object, Value::Object(_)) => Some(value.clone()),
        (ParamType::Array, Value::Array(_)) => Some(value.clone()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
