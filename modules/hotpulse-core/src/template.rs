use std::borrow::Cow;

use regex::Regex;

use crate::error::{HotpulseError, HotpulseResult};

/// Appended to content cut at the length limit so downstream readers can
/// tell the input was lossy.
pub const TRUNCATION_MARKER: &str = "\n...(content truncated due to length)...";

pub const BACKGROUND_BEGIN: &str = "@@@BACKGROUND_BEGIN";
pub const BACKGROUND_END: &str = "BACKGROUND_END@@@";

/// A prompt whose `{{config.*}}` variables are resolved and whose runtime
/// placeholders are known to be exactly the expected set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
    runtime_vars: Vec<String>,
}

impl PromptTemplate {
    /// Resolve config variables and check that the template uses every
    /// placeholder in `required` and nothing else.
    pub fn new(
        name: impl Into<String>,
        raw: &str,
        toml_value: &toml::Value,
        required: &[&str],
    ) -> HotpulseResult<Self> {
        let name = name.into();
        let resolved = resolve_config_vars(raw, toml_value)
            .map_err(|e| HotpulseError::Template(format!("{name} prompt: {e}")))?;
        let found = validate_template(&resolved, required)
            .map_err(|e| HotpulseError::Template(format!("{name} prompt: {e}")))?;

        if let Some(missing) = required.iter().find(|r| !found.iter().any(|f| f == *r)) {
            return Err(HotpulseError::Template(format!(
                "{name} prompt is missing placeholder {{{{{missing}}}}}"
            )));
        }

        Ok(Self {
            name,
            text: resolved,
            runtime_vars: required.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved template text, runtime placeholders intact.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fill the runtime placeholders.
    pub fn render(&self, vars: &[(&str, &str)]) -> HotpulseResult<String> {
        if let Some(missing) = self
            .runtime_vars
            .iter()
            .find(|v| !vars.iter().any(|(k, _)| k == v))
        {
            return Err(HotpulseError::Template(format!(
                "no value for {{{{{missing}}}}} in {} prompt",
                self.name
            )));
        }
        resolve_runtime_vars(&self.text, vars)
    }
}

/// Cut `text` to `max_chars` characters and append [`TRUNCATION_MARKER`].
/// Text at or under the limit is returned unchanged. A limit of 0 disables
/// truncation.
pub fn truncate_content(text: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed(text);
    }
    let head = ai_client::truncate_chars(text, max_chars);
    if head.len() == text.len() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{head}{TRUNCATION_MARKER}"))
    }
}

/// Replace everything between the background markers in `prompt` with
/// `context`. The markers themselves are kept so the update can be repeated.
/// Braces in `context` are escaped so the result still loads as a template.
pub fn inject_background(prompt: &str, context: &str) -> HotpulseResult<String> {
    let pattern = format!(
        r"(?s){}.*?{}",
        regex::escape(BACKGROUND_BEGIN),
        regex::escape(BACKGROUND_END)
    );
    let re = Regex::new(&pattern).map_err(|e| HotpulseError::Template(e.to_string()))?;

    if !re.is_match(prompt) {
        return Err(HotpulseError::Template(format!(
            "prompt has no {BACKGROUND_BEGIN} ... {BACKGROUND_END} section"
        )));
    }

    let context = context.trim_end().replace("{{", "\\{{");
    let replacement = format!("{BACKGROUND_BEGIN}\n{context}\n{BACKGROUND_END}");
    Ok(re
        .replacen(prompt, 1, |_: &regex::Captures| replacement.clone())
        .into_owned())
}

/// Resolve `{{config.*}}` variables from the TOML value tree at load time.
/// Runtime vars (non-`config.` prefixed) and `\{{` escapes are left as-is.
pub fn resolve_config_vars(template: &str, toml_value: &toml::Value) -> HotpulseResult<String> {
    substitute(template, false, |var_name, out| {
        if let Some(path) = var_name.strip_prefix("config.") {
            let value = lookup_toml_path(toml_value, path).ok_or_else(|| {
                HotpulseError::Template(format!("Config variable not found: {{{{{var_name}}}}}"))
            })?;
            out.push_str(&toml_value_to_string(value));
        } else {
            out.push_str("{{");
            out.push_str(var_name);
            out.push_str("}}");
        }
        Ok(())
    })
}

/// Resolve `{{var}}` placeholders from runtime values and turn `\{{` into a
/// literal `{{`. A placeholder without a value is an error.
pub fn resolve_runtime_vars(template: &str, vars: &[(&str, &str)]) -> HotpulseResult<String> {
    substitute(template, true, |var_name, out| {
        let (_, value) = vars.iter().find(|(k, _)| *k == var_name).ok_or_else(|| {
            HotpulseError::Template(format!("Unresolved template variable: {{{{{var_name}}}}}"))
        })?;
        out.push_str(value);
        Ok(())
    })
}

/// Check that every `{{...}}` left in a resolved template is an allowed
/// runtime variable. Returns the variables found, in order of appearance.
pub fn validate_template(template: &str, allowed_runtime: &[&str]) -> HotpulseResult<Vec<String>> {
    let mut found = Vec::new();
    substitute(template, false, |var_name, _| {
        if !allowed_runtime.contains(&var_name) {
            return Err(HotpulseError::Template(format!(
                "Unknown template variable: {{{{{var_name}}}}}. Allowed runtime vars: {allowed_runtime:?}"
            )));
        }
        if !found.iter().any(|f| f == var_name) {
            found.push(var_name.to_string());
        }
        Ok(())
    })?;
    Ok(found)
}

/// Walk `template`, copying literal text and handing each trimmed
/// `{{name}}` to `on_var`.
fn substitute(
    template: &str,
    unescape: bool,
    mut on_var: impl FnMut(&str, &mut String) -> HotpulseResult<()>,
) -> HotpulseResult<String> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'{') {
            chars.next(); // consume first {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume second {
                result.push_str(if unescape { "{{" } else { "\\{{" });
            } else {
                result.push_str("\\{");
            }
        } else if c == '{' && chars.peek() == Some(&'{') {
            chars.next(); // consume second {

            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') if chars.peek() == Some(&'}') => {
                        chars.next();
                        break;
                    }
                    Some(ch) => var_name.push(ch),
                    None => {
                        return Err(HotpulseError::Template(format!(
                            "Unclosed template variable: {{{{{var_name}"
                        )))
                    }
                }
            }

            on_var(var_name.trim(), &mut result)?;
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Walk the TOML value tree by dotted path (e.g., "identity.platform").
fn lookup_toml_path<'a>(value: &'a toml::Value, path: &str) -> Option<&'a toml::Value> {
    let mut current = value;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

/// Convert a TOML value to its string representation for template substitution.
fn toml_value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Array(arr) => arr
            .iter()
            .map(toml_value_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        toml::Value::Table(_) => "[table]".to_string(),
        toml::Value::Datetime(dt) => dt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_toml() -> toml::Value {
        toml::from_str(
            r#"
            [identity]
            platform = "Weibo"
            language = "zh"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_config_vars_and_keeps_runtime_vars() {
        let result = resolve_config_vars(
            "Posts from {{config.identity.platform}} about {{keyword}}",
            &test_toml(),
        )
        .unwrap();
        assert_eq!(result, "Posts from Weibo about {{keyword}}");
    }

    #[test]
    fn errors_on_missing_config_var() {
        assert!(resolve_config_vars("{{config.nonexistent.field}}", &test_toml()).is_err());
    }

    #[test]
    fn escaped_braces_survive_validation_and_render_literally() {
        let template = PromptTemplate::new(
            "labeling_user",
            r#"Answer as \{{"topic": "..."}} for: {{content}}"#,
            &test_toml(),
            &["content"],
        )
        .unwrap();
        let rendered = template.render(&[("content", "hello")]).unwrap();
        assert_eq!(rendered, r#"Answer as {{"topic": "..."}} for: hello"#);
    }

    #[test]
    fn missing_placeholder_is_construction_error() {
        let err = PromptTemplate::new("keyword", "Summarize {{content}}", &test_toml(), &[
            "keyword", "content",
        ])
        .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("{{keyword}}"));
    }

    #[test]
    fn unknown_placeholder_is_construction_error() {
        let result = PromptTemplate::new("system", "Hi {{user_name}}", &test_toml(), &[]);
        assert!(result.is_err());
    }

    #[test]
    fn unclosed_placeholder_is_error() {
        assert!(validate_template("Hi {{content", &["content"]).is_err());
    }

    #[test]
    fn render_fills_repeated_placeholders() {
        let template = PromptTemplate::new(
            "keyword",
            "[{{keyword}}]\n{{content}}\n(end of {{keyword}})",
            &test_toml(),
            &["keyword", "content"],
        )
        .unwrap();
        let rendered = template
            .render(&[("keyword", "#flood#"), ("content", "water rising")])
            .unwrap();
        assert_eq!(rendered, "[#flood#]\nwater rising\n(end of #flood#)");
    }

    #[test]
    fn render_without_value_errors() {
        let template =
            PromptTemplate::new("labeling_user", "{{content}}", &test_toml(), &["content"]).unwrap();
        assert!(template.render(&[]).is_err());
    }

    #[test]
    fn truncation_passes_short_text_through_unchanged() {
        let text = "短文本";
        assert!(matches!(truncate_content(text, 3), Cow::Borrowed(t) if t == text));
        assert!(matches!(truncate_content(text, 10), Cow::Borrowed(t) if t == text));
    }

    #[test]
    fn truncation_cuts_to_exact_char_count_plus_marker() {
        let text = "一二三四五六";
        let out = truncate_content(text, 4);
        assert_eq!(out, format!("一二三四{TRUNCATION_MARKER}"));
        assert_eq!(
            out.strip_suffix(TRUNCATION_MARKER).unwrap().chars().count(),
            4
        );
    }

    #[test]
    fn truncation_disabled_at_zero() {
        let text = "x".repeat(50);
        assert_eq!(truncate_content(&text, 0), text);
    }

    #[test]
    fn inject_background_replaces_between_markers() {
        let prompt = format!("Rules.\n{BACKGROUND_BEGIN}\nold context\n{BACKGROUND_END}\nLabel it.");
        let updated = inject_background(&prompt, "new $1 context\n").unwrap();
        assert_eq!(
            updated,
            format!("Rules.\n{BACKGROUND_BEGIN}\nnew $1 context\n{BACKGROUND_END}\nLabel it.")
        );
        // Markers survive, so the update is repeatable.
        let again = inject_background(&updated, "third").unwrap();
        assert!(again.contains("third"));
        assert!(!again.contains("new $1 context"));
    }

    #[test]
    fn injected_braces_render_literally() {
        let prompt = format!("{BACKGROUND_BEGIN}\n{BACKGROUND_END}");
        let updated = inject_background(&prompt, "model said {{x}}").unwrap();
        let template = PromptTemplate::new("labeling", &updated, &test_toml(), &[]).unwrap();
        assert!(template.render(&[]).unwrap().contains("model said {{x}}"));
    }

    #[test]
    fn inject_background_without_markers_errors() {
        assert!(inject_background("no markers here", "ctx").is_err());
    }
}
