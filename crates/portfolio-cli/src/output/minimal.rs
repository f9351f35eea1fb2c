use serde_json::Value;

/// Print just the key answer from the output.
///
/// Heuristic: a failed optimization prints its error, an allocation prints
/// one `SYMBOL weight` line per holding, otherwise the first well-known
/// field present wins, then the first field in the result object.
pub fn print_minimal(value: &Value) {
    for line in minimal_lines(value) {
        println!("{}", line);
    }
}

fn minimal_lines(value: &Value) -> Vec<String> {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let priority_keys = [
        "weights",
        "expected_returns",
        "points",
        "sharpe_ratio",
        "volatility",
    ];

    if let Value::Object(map) = result_obj {
        if map.get("success") == Some(&Value::Bool(false)) {
            if let Some(Value::String(err)) = map.get("error") {
                return vec![err.clone()];
            }
        }

        for key in &priority_keys {
            match map.get(*key) {
                Some(Value::Object(inner)) if !inner.is_empty() => {
                    return inner
                        .iter()
                        .map(|(k, v)| format!("{} {}", k, format_minimal(v)))
                        .collect();
                }
                Some(Value::Array(items)) if !items.is_empty() => {
                    return items.iter().map(format_minimal).collect();
                }
                Some(val) if !val.is_null() && !val.is_object() && !val.is_array() => {
                    return vec![format_minimal(val)];
                }
                _ => {}
            }
        }

        if let Some((key, val)) = map.iter().next() {
            return vec![format!("{}: {}", key, format_minimal(val))];
        }
    }

    vec![format_minimal(result_obj)]
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_weights_one_per_line() {
        let out = json!({"result": {"weights": {"BBB": 0.7, "AAA": 0.3}, "success": true}});
        assert_eq!(minimal_lines(&out), vec!["BBB 0.7", "AAA 0.3"]);
    }

    #[test]
    fn test_failure_prints_error() {
        let out = json!({"result": {
            "weights": {},
            "success": false,
            "error": "Optimization failed: Iteration limit reached"
        }});
        assert_eq!(
            minimal_lines(&out),
            vec!["Optimization failed: Iteration limit reached"]
        );
    }
}
