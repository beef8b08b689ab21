//! Reusable prompt templates with `{name}` placeholders.

use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, Role};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl TemplateVariable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    variables: Vec<TemplateVariable>,
    open: char,
    close: char,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, variables: Vec<TemplateVariable>) -> Self {
        Self {
            template: template.into(),
            variables,
            open: '{',
            close: '}',
        }
    }

    /// `delimiter` is an opening and closing character, e.g. `"[]"`. A single
    /// character is used on both sides.
    pub fn with_delimiter(
        template: impl Into<String>,
        variables: Vec<TemplateVariable>,
        delimiter: &str,
    ) -> Result<Self> {
        let mut chars = delimiter.chars();
        let open = chars
            .next()
            .ok_or_else(|| LlmError::Configuration("template delimiter is empty".to_string()))?;
        let close = chars.next().unwrap_or(open);
        Ok(Self {
            template: template.into(),
            variables,
            open,
            close,
        })
    }

    pub fn system(template: impl Into<String>, variables: Vec<TemplateVariable>) -> Self {
        Self::new(template, variables)
    }

    pub fn user(template: impl Into<String>, variables: Vec<TemplateVariable>) -> Self {
        Self::new(template, variables)
    }

    pub fn assistant(template: impl Into<String>, variables: Vec<TemplateVariable>) -> Self {
        Self::new(template, variables)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn variables(&self) -> &[TemplateVariable] {
        &self.variables
    }

    pub fn add_variable(&mut self, variable: TemplateVariable) {
        self.variables.push(variable);
    }

    fn placeholder(&self, name: &str) -> String {
        format!("{}{name}{}", self.open, self.close)
    }

    fn placeholder_regex(&self) -> Result<Regex> {
        let pattern = format!(
            "{}([A-Za-z0-9_]+){}",
            regex::escape(&self.open.to_string()),
            regex::escape(&self.close.to_string())
        );
        Regex::new(&pattern)
            .map_err(|e| LlmError::Configuration(format!("invalid template delimiter: {e}")))
    }

    /// Substitute `values` into the template.
    ///
    /// Declared variables resolve to their value, then their default, then the
    /// empty string. Undeclared placeholders are replaced only when a value is
    /// given and are otherwise left as written.
    pub fn format(&self, values: &HashMap<String, String>) -> Result<String> {
        for var in &self.variables {
            let provided = values.get(&var.name).is_some_and(|v| !v.is_empty());
            if var.required && !provided && var.default_value.is_none() {
                return Err(LlmError::MissingVariable(var.name.clone()));
            }
        }

        let mut out = self.template.clone();
        for var in &self.variables {
            let value = values
                .get(&var.name)
                .or(var.default_value.as_ref())
                .map(String::as_str)
                .unwrap_or("");
            out = out.replace(&self.placeholder(&var.name), value);
        }

        let re = self.placeholder_regex()?;
        let out = re.replace_all(&out, |caps: &regex::Captures<'_>| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        });
        Ok(out.into_owned())
    }

    /// Distinct placeholder names in first-appearance order.
    pub fn extract_variable_names(&self) -> Result<Vec<String>> {
        let re = self.placeholder_regex()?;
        let mut names: Vec<String> = Vec::new();
        for caps in re.captures_iter(&self.template) {
            let name = &caps[1];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    pub fn to_chat_message(&self, role: Role, values: &HashMap<String, String>) -> Result<ChatMessage> {
        Ok(ChatMessage::new(role, self.format(values)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_declared_and_undeclared_placeholders() {
        let t = PromptTemplate::new(
            "Translate {text} into {language} for {audience}.",
            vec![TemplateVariable::new("language").with_default("French")],
        );
        let out = t
            .format(&values(&[("text", "hello")]))
            .expect("format");
        assert_eq!(out, "Translate hello into French for {audience}.");
    }

    #[test]
    fn declared_without_value_or_default_becomes_empty() {
        let t = PromptTemplate::new("[{tone}]", vec![TemplateVariable::new("tone")]);
        assert_eq!(t.format(&HashMap::new()).expect("format"), "[]");
    }

    #[test]
    fn required_variable_must_be_present_and_non_empty() {
        let t = PromptTemplate::new("Hi {name}", vec![TemplateVariable::new("name").required()]);
        match t.format(&values(&[("name", "")])) {
            Err(LlmError::MissingVariable(name)) => assert_eq!(name, "name"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(t.format(&values(&[("name", "Ada")])).expect("format"), "Hi Ada");
    }

    #[test]
    fn required_variable_with_default_is_satisfied() {
        let t = PromptTemplate::new(
            "Hi {name}",
            vec![TemplateVariable::new("name").required().with_default("there")],
        );
        assert_eq!(t.format(&HashMap::new()).expect("format"), "Hi there");
    }

    #[test]
    fn values_are_inserted_literally() {
        let t = PromptTemplate::new("cost: {amount}", Vec::new());
        assert_eq!(
            t.format(&values(&[("amount", "$5 {x}")])).expect("format"),
            "cost: $5 {x}"
        );
    }

    #[test]
    fn custom_delimiter() {
        let t = PromptTemplate::with_delimiter("Dear [name], see [[link]]", Vec::new(), "[]")
            .expect("delimiter");
        assert_eq!(t.extract_variable_names().expect("names"), vec!["name", "link"]);
        assert_eq!(
            t.format(&values(&[("name", "Bo"), ("link", "x")])).expect("format"),
            "Dear Bo, see [x]"
        );
        assert!(PromptTemplate::with_delimiter("x", Vec::new(), "").is_err());
    }

    #[test]
    fn extract_names_is_deduplicated() {
        let t = PromptTemplate::new("{a} {b} {a} {not-valid}", Vec::new());
        assert_eq!(t.extract_variable_names().expect("names"), vec!["a", "b"]);
    }

    #[test]
    fn to_chat_message_uses_role() {
        let mut t = PromptTemplate::system("You are {persona}.", Vec::new());
        t.add_variable(TemplateVariable::new("persona").with_default("helpful"));
        assert_eq!(t.variables().len(), 1);
        let msg = t.to_chat_message(Role::System, &HashMap::new()).expect("message");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content, "You are helpful.");
    }
}
