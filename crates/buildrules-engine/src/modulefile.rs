//! Lmod module files rendered from `{{ key }}` templates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use buildrules_rule::Rule;

/// Failure to render a module template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder `{0}`")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Substitute every `{{ key }}` in `template` with its value from `vars`.
///
/// Whitespace inside the braces is ignored.
///
/// # Errors
/// Returns `TemplateError::UnknownPlaceholder` for a key missing from `vars`
/// and `TemplateError::Unterminated` for a `{{` without a closing `}}`.
pub fn render(template: &str, vars: &BTreeMap<&str, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);
        let inner = tail.get(2..).unwrap_or_default();
        let Some(end) = inner.find("}}") else {
            return Err(TemplateError::Unterminated(
                template.len().saturating_sub(tail.len()),
            ));
        };
        let key = inner.get(..end).unwrap_or_default().trim();
        let value = vars
            .get(key)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(key.to_owned()))?;
        out.push_str(value);
        rest = inner.get(end.saturating_add(2)..).unwrap_or_default();
    }
    out.push_str(rest);
    Ok(out)
}

/// Escape `value` for use inside a double-quoted Lua string.
pub fn lua_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// A rendered module file and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
    pub path: PathBuf,
    pub content: String,
}

impl ModuleFile {
    /// `<module_root>/<name>/<version>.lua`.
    pub fn location(module_root: &Path, name: &str, version: &str) -> PathBuf {
        module_root.join(name).join(format!("{version}.lua"))
    }

    /// An action that writes this file, replacing any previous version.
    pub fn into_rule(self) -> Rule {
        let detail = self.path.display().to_string();
        Rule::action("write-module", detail, move || {
            buildrules_util::fs::write_atomic(&self.path, self.content.as_bytes())?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("name", "tools".to_owned()),
            ("version", "1.0".to_owned()),
        ])
    }

    #[test]
    fn substitutes_placeholders() {
        let out = render("whatis(\"{{ name }}/{{version}}\")\n", &vars()).unwrap();
        assert_eq!(out, "whatis(\"tools/1.0\")\n");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let text = "-- plain { braces } stay\n";
        assert_eq!(render(text, &vars()).unwrap(), text);
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        assert_eq!(
            render("{{ name }} {{ prefix }}", &vars()),
            Err(TemplateError::UnknownPlaceholder("prefix".to_owned()))
        );
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        assert_eq!(
            render("ok {{ name", &vars()),
            Err(TemplateError::Unterminated(3))
        );
    }

    #[test]
    fn lua_quote_escapes() {
        assert_eq!(lua_quote(r#"a "b" \c"#), r#"a \"b\" \\c"#);
    }

    #[test]
    fn module_rule_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = ModuleFile::location(tmp.path(), "tools", "1.0");
        let rule = ModuleFile {
            path: path.clone(),
            content: "-- module\n".to_owned(),
        }
        .into_rule();

        assert_eq!(rule.action_name(), Some("write-module"));
        assert!(!path.exists());
        rule.execute().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "-- module\n");
    }
}
