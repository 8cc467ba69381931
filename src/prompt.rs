//! # Prompt
//! A prompt is simply a string.
//!
//! ## PromptTemplate
//! A prompt template is a string with placeholders, plus default values for some of them.
//!
//! ## Placeholder
//! A placeholder is written `{{name}}`, where `name` consists of letters, digits and underscores.
//! Anything else that looks like a placeholder (`{{ name }}`, `{{a-b}}`, an unclosed `{{`) is plain text.
//!
//! ## Variables
//! [Variables] is the mapping a template is rendered against. It remembers insertion order, so the variables
//! accumulated by a [Chain](crate::chain::Chain) run list initial inputs first and step outputs in step order.
//!
//! ## Rendering
//! A placeholder takes its value from the variables first and from the template defaults second.
//! [PromptTemplate::render] fails with [Error::MissingVariables](crate::errors::Error::MissingVariables) when some
//! placeholder has neither, while [PromptTemplate::render_partial] leaves such placeholders untouched.
//!

use std::collections::BTreeMap;
use std::sync::Arc;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::errors::{Error, Result};
use crate::utils::JsonMap;
use crate::utils::prompt_processing::{get_placeholders, replace_placeholders};

/// Separator used by [PromptTemplate::compose_default].
pub const DEFAULT_COMPOSE_SEPARATOR: &str = "\n\n";

/// Insertion-ordered mapping from variable name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonMap", into = "JsonMap")]
pub struct Variables(JsonMap);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a variable. An overwritten variable keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(name.into(), Value::String(value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Remove a variable. The remaining variables keep their order.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        match self.0.shift_remove(name) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item=&str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &str)> {
        self.0.iter().filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<T: IntoIterator<Item=(K, V)>>(iter: T) -> Self {
        let mut variables = Variables::new();
        for (name, value) in iter {
            variables.insert(name, value);
        }
        variables
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Variables {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl TryFrom<JsonMap> for Variables {
    type Error = String;

    fn try_from(map: JsonMap) -> std::result::Result<Self, String> {
        if let Some((name, _)) = map.iter().find(|(_, v)| !v.is_string()) {
            return Err(format!("variable '{}' must be a string", name));
        }
        Ok(Self(map))
    }
}

impl From<Variables> for JsonMap {
    fn from(variables: Variables) -> Self {
        variables.0
    }
}

/// A prompt template with placeholders and default values for some of them.
///
/// The template string is fixed at construction; only the defaults can change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TemplateRecord", into = "TemplateRecord")]
pub struct PromptTemplate {
    /// The template string, immutable
    template: Arc<String>,

    /// Mapping from placeholder name to its fallback value
    defaults: BTreeMap<String, String>,
}

/// On-disk shape of a [PromptTemplate]: `{"template": ..., "defaults": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateRecord {
    template: Option<String>,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
}

impl PromptTemplate {
    /// Create a prompt template from a string without defaults.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        Self::with_defaults(template, BTreeMap::<String, String>::new())
    }

    /// Create a prompt template from a string with defaults. Fails if the template is empty or only whitespace.
    /// Warns if the template does not have any placeholder.
    pub fn with_defaults<K, V>(template: impl Into<String>, defaults: impl IntoIterator<Item=(K, V)>) -> Result<Self>
        where K: Into<String>, V: Into<String> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(Error::invalid_argument("prompt template must not be empty"));
        }
        if get_placeholders(&template).is_empty() {
            warn!("Your prompt template does not have a placeholder. If this is intended, ignore this message. \
            Otherwise, check whether you have written placeholders correctly.\n\
            Got prompt template:\n\
            {}", template);
        }
        Ok(Self {
            template: Arc::new(template),
            defaults: defaults.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        })
    }

    /// Get the prompt template as a string.
    #[inline]
    pub fn str(&self) -> &str {
        &self.template
    }

    #[inline]
    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    /// Distinct placeholder names in the order they first appear.
    pub fn variables(&self) -> Vec<String> {
        get_placeholders(&self.template)
    }

    /// Placeholder names without a default, in the order they first appear.
    pub fn required_variables(&self) -> Vec<String> {
        self.variables()
            .into_iter()
            .filter(|name| !self.defaults.contains_key(name))
            .collect()
    }

    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// Removing a default that does not exist does nothing.
    pub fn remove_default(&mut self, name: &str) -> &mut Self {
        self.defaults.remove(name);
        self
    }

    fn resolve<'a>(&'a self, variables: &'a Variables, name: &str) -> Option<&'a str> {
        variables.get(name).or_else(|| self.defaults.get(name).map(String::as_str))
    }

    /// Render the template, failing with every unresolved placeholder if any is left.
    pub fn render(&self, variables: &Variables) -> Result<String> {
        let missing: Vec<String> = self.variables()
            .into_iter()
            .filter(|name| self.resolve(variables, name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingVariables { missing });
        }
        Ok(self.render_partial(variables))
    }

    /// Render the template, leaving unresolved placeholders as `{{name}}`.
    pub fn render_partial(&self, variables: &Variables) -> String {
        replace_placeholders(&self.template, |name| self.resolve(variables, name))
    }

    /// Join two templates with `separator`. Defaults of `other` win on collision. Neither template changes.
    pub fn compose(&self, other: &PromptTemplate, separator: &str) -> PromptTemplate {
        let template = format!("{}{}{}", self.template, separator, other.template);
        let mut defaults = self.defaults.clone();
        defaults.extend(other.defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
        PromptTemplate {
            template: Arc::new(template),
            defaults,
        }
    }

    /// [PromptTemplate::compose] with a blank line as separator.
    pub fn compose_default(&self, other: &PromptTemplate) -> PromptTemplate {
        self.compose(other, DEFAULT_COMPOSE_SEPARATOR)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a template from `{"template": ..., "defaults": {...}}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl TryFrom<TemplateRecord> for PromptTemplate {
    type Error = &'static str;

    fn try_from(record: TemplateRecord) -> std::result::Result<Self, Self::Error> {
        match record.template {
            Some(template) if !template.trim().is_empty() => Ok(Self {
                template: Arc::new(template),
                defaults: record.defaults,
            }),
            Some(_) => Err("field `template` must not be empty"),
            None => Err("missing field `template`"),
        }
    }
}

impl From<PromptTemplate> for TemplateRecord {
    fn from(template: PromptTemplate) -> Self {
        Self {
            template: Some(template.template.as_ref().clone()),
            defaults: template.defaults,
        }
    }
}

#[cfg(test)]
mod test_prompt {
    use super::{PromptTemplate, Variables};
    use crate::errors::Error;

    #[test]
    fn test_new_rejects_blank() {
        assert!(matches!(PromptTemplate::new(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(PromptTemplate::new("  \n\t"), Err(Error::InvalidArgument(_))));
        assert!(PromptTemplate::new("no placeholders here").is_ok());
    }

    #[test]
    fn test_variables_and_required() {
        let mut template = PromptTemplate::with_defaults(
            "{{tone}} reply to {{name}} about {{topic}}, {{name}}!",
            [("tone", "Friendly"), ("unused", "x")],
        ).unwrap();
        assert_eq!(vec!["tone", "name", "topic"], template.variables());
        assert_eq!(vec!["name", "topic"], template.required_variables());

        template.set_default("topic", "rust");
        assert_eq!(vec!["name"], template.required_variables());

        template.remove_default("tone").remove_default("never_there");
        assert_eq!(vec!["tone", "name"], template.required_variables());
        assert_eq!(vec!["tone", "name", "topic"], template.variables());
    }

    #[test]
    fn test_render_strict_missing() {
        let template = PromptTemplate::new("Hello {{name}}").unwrap();
        match template.render(&Variables::new()) {
            Err(Error::MissingVariables { missing }) => assert_eq!(vec!["name"], missing),
            other => panic!("expected MissingVariables, got {:?}", other),
        }
        assert_eq!("Hello {{name}}", template.render_partial(&Variables::new()));
    }

    #[test]
    fn test_render_reports_all_missing() {
        let template = PromptTemplate::with_defaults("{{b}} {{a}} {{c}} {{b}}", [("c", "C")]).unwrap();
        match template.render(&Variables::new()) {
            Err(Error::MissingVariables { missing }) => assert_eq!(vec!["b", "a"], missing),
            other => panic!("expected MissingVariables, got {:?}", other),
        }
        assert_eq!("{{b}} {{a}} C {{b}}", template.render_partial(&Variables::new()));
    }

    #[test]
    fn test_render_every_occurrence() {
        let template = PromptTemplate::new("{{a}} and {{b}} and {{a}}").unwrap();
        let variables = Variables::from([("a", "alice"), ("b", "bob")]);
        assert_eq!("alice and bob and alice", template.render(&variables).unwrap());
    }

    #[test]
    fn test_render_malformed_is_literal() {
        let template = PromptTemplate::new("{{ name }} {{name}} {{ and {{x-y}}").unwrap();
        assert_eq!(vec!["name"], template.variables());
        let rendered = template.render(&Variables::from([("name", "N")])).unwrap();
        assert_eq!("{{ name }} N {{ and {{x-y}}", rendered);
    }

    #[test]
    fn test_default_override() {
        let mut template = PromptTemplate::new("{{style}}").unwrap();
        template.set_default("style", "concise");
        assert_eq!("concise", template.render(&Variables::new()).unwrap());
        assert_eq!("bold", template.render(&Variables::from([("style", "bold")])).unwrap());
    }

    #[test]
    fn test_rendered_has_no_resolved_placeholders() {
        let template = PromptTemplate::with_defaults("{{x}}{{y}} {{x}} {{z}}", [("z", "{{z}}?")]).unwrap();
        let variables = Variables::from([("x", "1"), ("y", "2")]);
        let rendered = template.render(&variables).unwrap();
        assert_eq!("12 1 {{z}}?", rendered);
        assert!(!rendered.contains("{{x}}") && !rendered.contains("{{y}}"));
    }

    #[test]
    fn test_compose() {
        let a = PromptTemplate::with_defaults("You are {{role}}.", [("role", "a poet"), ("shared", "from a")]).unwrap();
        let b = PromptTemplate::with_defaults("Write about {{topic}}. {{shared}}", [("shared", "from b")]).unwrap();
        let composed = a.compose_default(&b);

        assert_eq!("You are {{role}}.\n\nWrite about {{topic}}. {{shared}}", composed.str());
        assert_eq!(Some(&"from b".to_string()), composed.defaults().get("shared"));
        assert_eq!(vec!["topic"], composed.required_variables());
        // operands untouched
        assert_eq!("You are {{role}}.", a.str());
        assert_eq!(Some(&"from a".to_string()), a.defaults().get("shared"));

        let variables = Variables::from([("topic", "rain")]);
        assert_eq!(
            format!("{}\n\n{}", a.render(&variables).unwrap(), b.render(&variables).unwrap()),
            composed.render(&variables).unwrap()
        );

        let dashed = a.compose(&b, " -- ");
        assert_eq!("You are {{role}}. -- Write about {{topic}}. {{shared}}", dashed.str());
    }

    #[test]
    fn test_json_round_trip() {
        let template = PromptTemplate::with_defaults("Summarize {{text}} in {{lang}}", [("lang", "English")]).unwrap();
        let json = template.to_json().unwrap();
        let restored = PromptTemplate::from_json(&json).unwrap();
        assert_eq!(template, restored);

        let variables = Variables::from([("text", "the report")]);
        assert_eq!(template.render(&variables).unwrap(), restored.render(&variables).unwrap());
    }

    #[test]
    fn test_json_shape() {
        let template = PromptTemplate::from_json(r#"{"template": "Hi {{who}}"}"#).unwrap();
        assert!(template.defaults().is_empty());

        let value: serde_json::Value = serde_json::from_str(&template.to_json().unwrap()).unwrap();
        assert_eq!(value["template"], "Hi {{who}}");
        assert!(value["defaults"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_json_malformed() {
        for json in [r#"{"defaults": {}}"#, r#"{"template": ""}"#, r#"{"template": "   "}"#, r#"{"template": 3}"#, "not json"] {
            assert!(matches!(PromptTemplate::from_json(json), Err(Error::MalformedData(_))), "accepted {}", json);
        }
        let message = PromptTemplate::from_json(r#"{"defaults": {}}"#).unwrap_err().to_string();
        assert!(message.starts_with("MalformedData: missing field `template`"), "got {}", message);
        assert_eq!(1, message.matches("MalformedData").count());
    }

    #[test]
    fn test_variables_order_and_overwrite() {
        let mut variables = Variables::from([("b", "1"), ("a", "2")]);
        variables.insert("c", "3").insert("b", "4");
        assert_eq!(vec!["b", "a", "c"], variables.names().collect::<Vec<_>>());
        assert_eq!(Some("4"), variables.get("b"));
        assert_eq!(Some("4".to_string()), variables.remove("b"));
        assert_eq!(2, variables.len());
        assert!(!variables.contains("b"));
        assert_eq!(vec!["a", "c"], variables.names().collect::<Vec<_>>());

        let mut variables = Variables::from([("a", "1"), ("b", "2"), ("c", "3")]);
        variables.remove("a");
        assert_eq!(vec!["b", "c"], variables.names().collect::<Vec<_>>());
        assert_eq!(None, variables.remove("a"));
    }

    #[test]
    fn test_variables_json() {
        let variables: Variables = serde_json::from_str(r#"{"z": "last", "a": "first"}"#).unwrap();
        assert_eq!(vec![("z", "last"), ("a", "first")], variables.iter().collect::<Vec<_>>());
        assert!(serde_json::from_str::<Variables>(r#"{"n": 1}"#).is_err());
    }
}
