use std::collections::HashSet;
use regex::{Captures, Regex};
use lazy_static::lazy_static;


lazy_static! {
    /// Matches a placeholder `{{name}}`, where `name` is letters, digits and underscores.
    pub(crate) static ref PLACEHOLDER_MATCH_RE: Regex = Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").unwrap();
}

/// Get the distinct placeholder names of a string in the order they first appear.
pub fn get_placeholders(string: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER_MATCH_RE.captures_iter(string)
        .filter_map(|captures| {
            let name = &captures[1];
            seen.insert(name.to_string()).then(|| name.to_string())
        })
        .collect()
}

/// Replaces every placeholder that `resolve` gives a value for. Placeholders it returns `None` for stay verbatim.
///
/// Substituted values are never scanned again, so a value that itself looks like `{{x}}` is inserted as is.
pub(crate) fn replace_placeholders<'a>(original: &str, resolve: impl Fn(&str) -> Option<&'a str>) -> String {
    PLACEHOLDER_MATCH_RE.replace_all(original, |captures: &Captures| {
        match resolve(&captures[1]) {
            Some(value) => value.to_string(),
            None => captures[0].to_string(),
        }
    }).into_owned()
}

#[cfg(test)]
mod string_tests {
    use std::collections::HashMap;
    use super::{get_placeholders, replace_placeholders};

    #[test]
    fn test_get_keys() {
        let string = "{{a}}";
        assert_eq!(vec!["a".to_string()], get_placeholders(string));

        let string = "{{a\n}}";
        assert_eq!(0, get_placeholders(string).len());

        let string = "{{b}}    {{a}} {{b}}";
        assert_eq!(vec!["b".to_string(), "a".to_string()], get_placeholders(string));

        let string = "{{user_name2}} {{ spaced }} {{a-b}} {{}} {{ {{unclosed";
        assert_eq!(vec!["user_name2".to_string()], get_placeholders(string));
    }

    #[test]
    fn test_replace() {
        let string = "{{a}} and {{b}} and {{a}}";
        let mapping = HashMap::from([
            ("a", "alice"),
            ("b", "bob"),
        ]);
        let replaced = replace_placeholders(string, |name| mapping.get(name).copied());
        assert_eq!("alice and bob and alice", replaced);
    }

    #[test]
    fn test_replace_leaves_unresolved() {
        let string = "{{a}} meets {{c}}";
        let replaced = replace_placeholders(string, |name| (name == "a").then_some("alice"));
        assert_eq!("alice meets {{c}}", replaced);
    }

    #[test]
    fn test_replace_does_not_expand_values() {
        let string = "{{a}}";
        let replaced = replace_placeholders(string, |name| match name {
            "a" => Some("{{b}} costs $1"),
            "b" => Some("bob"),
            _ => None,
        });
        assert_eq!("{{b}} costs $1", replaced);
    }

    #[test]
    fn test_triple_braces() {
        assert_eq!(vec!["a".to_string()], get_placeholders("{{{a}}}"));
        let replaced = replace_placeholders("{{{a}}}", |_| Some("x"));
        assert_eq!("{x}", replaced);
    }
}
