use serde_json::{from_str, Value};
use anyhow::Result;
use std::error::Error;
use std::fmt;
use std::fmt::Formatter;


/// Filters invalid content and tries to parse the valid json string.
///
/// Returns a [serde_json::Value] if the string is valid json else an [InvalidJSON] error.
///
/// # Example
/// ```
/// use pipeprompt::utils::postprocess::json::filter_to_json;
/// let valid_str = "partially valid: {\"a\":\"alice\"}";
/// let json_value = filter_to_json(valid_str).expect("Expect to be fine but failed");
/// assert_eq!(json_value["a"], "alice");
///
/// let invalid_str = "partially valid: \"a\":\"alice\"}";
/// assert_eq!(filter_to_json(invalid_str).is_err(), true)
/// ```
pub fn filter_to_json(string: impl Into<String>) -> Result<Value> {
    filter_between(string.into(), '{', '}')
}

/// Like [filter_to_json], but for a JSON list such as `["query 1", "query 2"]`.
///
/// # Example
/// ```
/// use pipeprompt::utils::postprocess::json::filter_to_json_list;
/// let value = filter_to_json_list("Here you go: [\"a\", \"b\"]. Good luck!").unwrap();
/// assert_eq!(value, serde_json::json!(["a", "b"]));
/// ```
pub fn filter_to_json_list(string: impl Into<String>) -> Result<Value> {
    filter_between(string.into(), '[', ']')
}

fn filter_between(string: String, open: char, close: char) -> Result<Value> {
    let left_idx = string.find(open);
    let right_idx = string.rfind(close);
    match (left_idx, right_idx) {
        (Some(li), Some(ri)) if li < ri => {
            let valid_json = &string[li..ri + 1];
            let value = from_str(valid_json)?;
            Ok(value)
        }
        _ => Err(InvalidJSON { invalid_string: string }.into())
    }
}

/// Error when the string is not a valid json.
#[derive(Debug, Clone)]
pub struct InvalidJSON {
    pub invalid_string: String,
}


impl fmt::Display for InvalidJSON {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid string to be parsed:\n{}", self.invalid_string)
    }
}

impl Error for InvalidJSON {}


#[cfg(test)]
mod test_json {
    use serde_json::json;
    use crate::utils::postprocess::json::{filter_to_json, filter_to_json_list, InvalidJSON};

    #[test]
    fn test_filter_to_json() {
        let valid_str = "{\"a\":\"alice\"}";
        let json_value = filter_to_json(valid_str).expect("Expect to be fine but failed");
        assert_eq!(json_value["a"], "alice");

        let valid_str = "Here is the result you ask for: {\"a\":\"alice\"}";
        let json_value = filter_to_json(valid_str).expect("Expect to be fine but failed");
        assert_eq!(json_value["a"], "alice");

        let invalid_str = "Here is the result you ask for: {\"a\":\"alice\"";
        let json_error = filter_to_json(invalid_str).expect_err("This should give error but not");
        assert!(json_error.downcast_ref::<InvalidJSON>().is_some());

        let invalid_str = "{{}}";
        filter_to_json(invalid_str).expect_err("This should give error but not");

        filter_to_json("} backwards {").expect_err("closing brace before opening brace");
    }

    #[test]
    fn test_agent_reply() {
        let reply = r#"Based on the task, the best agent is:
{
    "agent": "Code Search Agent",
    "agent_role_prompt": "You are a seasoned software development assistant AI."
}"#;
        let value = filter_to_json(reply).unwrap();
        assert_eq!(value["agent"], "Code Search Agent");
    }

    #[test]
    fn test_filter_to_json_list() {
        let value = filter_to_json_list("[\"query 1\", \"query 2\", \"query 3\"]").unwrap();
        assert_eq!(value, json!(["query 1", "query 2", "query 3"]));
        filter_to_json_list("no list").expect_err("nothing to parse");
    }
}
