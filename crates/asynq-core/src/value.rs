//! Dynamic call values
//!
//! Work items are described as a callable plus positional and keyword
//! arguments. Arguments and return values are JSON values so that any
//! callable can be queued behind one object-safe signature.

pub use serde_json::Value;

/// Positional arguments of a call
pub type Args = Vec<Value>;

/// Keyword arguments of a call
pub type Kwargs = serde_json::Map<String, Value>;

/// Render a call as `name(arg, ..., key=value)` for logs and failure reports.
pub fn describe_call(name: &str, args: &[Value], kwargs: &Kwargs) -> String {
    let mut parts: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    parts.extend(kwargs.iter().map(|(key, value)| format!("{}={}", key, value)));
    format!("{}({})", name, parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_positional() {
        let text = describe_call("divide", &[json!(1000), json!(2)], &Kwargs::new());
        assert_eq!(text, "divide(1000, 2)");
    }

    #[test]
    fn test_describe_keywords() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("scale".to_string(), json!(1.5));
        kwargs.insert("label".to_string(), json!("x"));

        let text = describe_call("f", &[json!(1)], &kwargs);
        assert!(text.starts_with("f(1, "));
        assert!(text.contains("scale=1.5"));
        assert!(text.contains("label=\"x\""));
    }

    #[test]
    fn test_describe_no_args() {
        assert_eq!(describe_call("noop", &[], &Kwargs::new()), "noop()");
    }
}
