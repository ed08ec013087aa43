//! Request bodies accepted by the module API.

use serde::Deserialize;

use modhost_core::Value;

/// Body of `POST /modules/:name/call/:export`.
///
/// ```json
/// { "args": [{ "i32": 41 }, { "i32": 1 }] }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub args: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_request() {
        let request: CallRequest =
            serde_json::from_str(r#"{"args": [{"i32": 41}, {"f64": 0.5}]}"#).unwrap();
        assert_eq!(request.args, vec![Value::I32(41), Value::F64(0.5)]);
    }

    #[test]
    fn test_args_default_to_empty() {
        let request: CallRequest = serde_json::from_str("{}").unwrap();
        assert!(request.args.is_empty());
    }

    #[test]
    fn test_reject_unknown_value_type() {
        let result = serde_json::from_str::<CallRequest>(r#"{"args": [{"v128": 1}]}"#);
        assert!(result.is_err());
    }
}
