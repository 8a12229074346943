use serde_json::{Number, Value};

use crate::{
    error::{MigrateError, Result},
    schema::FieldType,
};

/// Converts a raw V1 hash value into its JSON-typed V2 value.
pub fn coerce(field: &str, ty: FieldType, raw: &[u8]) -> Result<Value> {
    let invalid = || MigrateError::Coercion {
        field: field.to_owned(),
        value: String::from_utf8_lossy(raw).into_owned(),
        expected: ty.to_string(),
    };

    let text = std::str::from_utf8(raw).map_err(|_| invalid())?;

    if ty == FieldType::String {
        return Ok(Value::String(text.to_owned()));
    }

    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }

    match ty {
        FieldType::String => Ok(Value::String(text.to_owned())),
        FieldType::Integer => {
            if let Ok(value) = text.parse::<i64>() {
                return Ok(Value::from(value));
            }

            match text.parse::<f64>() {
                Ok(value) if value.is_finite() && value.fract() == 0.0 => {
                    Ok(Value::from(value as i64))
                }
                _ => Err(invalid()),
            }
        }
        FieldType::Timestamp => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        FieldType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_keep_content() {
        assert_eq!(
            coerce("email", FieldType::String, b" a@b.com").unwrap(),
            json!(" a@b.com")
        );
        assert_eq!(coerce("email", FieldType::String, b"").unwrap(), json!(""));
        assert!(coerce("email", FieldType::String, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn integers() {
        assert_eq!(coerce("n", FieldType::Integer, b"12").unwrap(), json!(12));
        assert_eq!(coerce("n", FieldType::Integer, b"12.0").unwrap(), json!(12));
        assert_eq!(coerce("n", FieldType::Integer, b"").unwrap(), Value::Null);
        assert!(matches!(
            coerce("n", FieldType::Integer, b"12.5"),
            Err(MigrateError::Coercion { .. })
        ));
    }

    #[test]
    fn timestamps() {
        assert_eq!(
            coerce("created", FieldType::Timestamp, b"1700000000").unwrap(),
            json!(1_700_000_000.0)
        );
        assert_eq!(
            coerce("created", FieldType::Timestamp, b"1700000000.25").unwrap(),
            json!(1_700_000_000.25)
        );
        assert!(coerce("created", FieldType::Timestamp, b"yesterday").is_err());
    }

    #[test]
    fn booleans() {
        for raw in ["true", "1", "YES"] {
            assert_eq!(
                coerce("verified", FieldType::Boolean, raw.as_bytes()).unwrap(),
                json!(true)
            );
        }
        for raw in ["false", "0", "No"] {
            assert_eq!(
                coerce("verified", FieldType::Boolean, raw.as_bytes()).unwrap(),
                json!(false)
            );
        }
        assert!(coerce("verified", FieldType::Boolean, b"maybe").is_err());
    }
}
