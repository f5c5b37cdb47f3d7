use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Expand `{{name}}` and `{{@parameter}}` tokens.
///
/// - `{{name}}` reads the execution's variable bag (e.g. `{{button.x}}` after a
///   `find_image` stored as `button`).
/// - `{{@key}}` reads the parameter bag; dotted paths walk into JSON objects
///   (`{{@window.title}}`). Non-string values are rendered as compact JSON.
/// - Whitespace inside the braces is ignored and unknown tokens are kept verbatim.
pub fn interpolate(
    template: &str,
    variables: &HashMap<String, String>,
    parameters: &BTreeMap<String, Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = after_open[..close].trim();
        let original = &rest[open..open + 2 + close + 2];

        let replacement = match token.strip_prefix('@') {
            _ if token.is_empty() => None,
            Some(path) => lookup_parameter(parameters, path.trim()),
            None => variables.get(token).cloned(),
        };
        out.push_str(replacement.as_deref().unwrap_or(original));
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);
    out
}

fn lookup_parameter(parameters: &BTreeMap<String, Value>, path: &str) -> Option<String> {
    let mut segments = path.split('.').map(str::trim);
    let mut current = parameters.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variables_from_recognition_are_expanded() {
        let mut vars = HashMap::new();
        vars.insert("ok.x".to_string(), "140".to_string());
        vars.insert("ok.y".to_string(), "62".to_string());
        let params = BTreeMap::new();
        assert_eq!(interpolate("at {{ok.x}},{{ ok.y }}", &vars, &params), "at 140,62");
    }

    #[test]
    fn parameters_support_dotted_paths_and_json_rendering() {
        let vars = HashMap::new();
        let mut params = BTreeMap::new();
        params.insert("game".to_string(), json!({ "title": "Solitaire", "level": 3 }));
        params.insert("retries".to_string(), json!(5));
        assert_eq!(
            interpolate("{{@game.title}} L{{@game.level}} x{{@retries}}", &vars, &params),
            "Solitaire L3 x5"
        );
    }

    #[test]
    fn unknown_empty_and_unterminated_tokens_are_kept() {
        let vars = HashMap::new();
        let params = BTreeMap::new();
        assert_eq!(interpolate("{{missing}} {{@nope.deep}}", &vars, &params), "{{missing}} {{@nope.deep}}");
        assert_eq!(interpolate("a {{}} b", &vars, &params), "a {{}} b");
        assert_eq!(interpolate("open {{x", &vars, &params), "open {{x");
    }
}
