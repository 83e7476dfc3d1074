//! The `JSON` global.

use super::object::{ScriptFunction, ScriptObject};
use super::value::ScriptValue;
use crate::error::ScriptError;

/// Encode a value. Yields `undefined` for values with no JSON form.
pub fn stringify(value: &ScriptValue) -> Result<ScriptValue, ScriptError> {
    match value.to_json()? {
        Some(json) => serde_json::to_string(&json)
            .map(ScriptValue::String)
            .map_err(|e| ScriptError::type_error(e.to_string())),
        None => Ok(ScriptValue::Undefined),
    }
}

/// Decode a JSON document
pub fn parse(text: &str) -> Result<ScriptValue, ScriptError> {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|json| ScriptValue::from_json(&json))
        .map_err(|e| ScriptError::syntax_error(format!("Unexpected token in JSON: {}", e)))
}

pub(crate) fn install(global: &ScriptObject) {
    let json = ScriptObject::new();
    json.define_readonly(
        "stringify",
        ScriptFunction::new("stringify", |info| stringify(info.arg(0))).into(),
    );
    json.define_readonly(
        "parse",
        ScriptFunction::new("parse", |info| match info.arg(0) {
            ScriptValue::String(text) => parse(text),
            other => Err(ScriptError::syntax_error(format!(
                "\"{}\" is not valid JSON",
                other.type_name()
            ))),
        })
        .into(),
    );
    global.set("JSON", json.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_stringify_object() {
        let object = ScriptObject::new();
        object.set("type", ScriptValue::from("send"));
        object.set("payload", ScriptValue::Array(vec![ScriptValue::from(1.0)]));

        let encoded = stringify(&ScriptValue::Object(object)).unwrap();
        assert_eq!(encoded, ScriptValue::from(r#"{"payload":[1],"type":"send"}"#));
    }

    #[test]
    fn test_stringify_undefined() {
        assert_eq!(stringify(&ScriptValue::Undefined).unwrap(), ScriptValue::Undefined);
    }

    #[test]
    fn test_parse_malformed_is_syntax_error() {
        let err = parse("{not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn test_round_trip_through_globals() {
        let global = ScriptObject::new();
        install(&global);
        let json = global.get("JSON");
        let json = json.as_object().unwrap();

        let text = json
            .call_method("stringify", vec![ScriptValue::Array(vec![
                ScriptValue::Bool(true),
                ScriptValue::Null,
                ScriptValue::from("x"),
            ])])
            .unwrap();
        let back = json.call_method("parse", vec![text]).unwrap();
        assert_eq!(
            back,
            ScriptValue::Array(vec![ScriptValue::Bool(true), ScriptValue::Null, ScriptValue::from("x")])
        );
    }

    #[test]
    fn test_parse_rejects_non_string() {
        let global = ScriptObject::new();
        install(&global);
        let json = global.get("JSON");
        let err = json
            .as_object()
            .unwrap()
            .call_method("parse", vec![ScriptValue::Undefined])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
    }
}
