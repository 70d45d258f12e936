mod parser;

pub use parser::{Part, Segment, TemplateParser};

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Variable name -> bound value
pub type Bindings = HashMap<String, String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Invalid URI template '{template}': {reason}")]
    Syntax { template: String, reason: String },

    #[error("No value for URI template variable '{0}'")]
    MissingVariable(String),

    #[error("Empty value for URI template variable '{0}'")]
    EmptyVariable(String),
}

/// A compiled URI template such as `/api/{version}/{*rest}`.
///
/// `{name}` binds exactly one path segment, `{*name}` is a catch-all that
/// must be the final segment and absorbs everything after it. Templates
/// may also carry a `scheme://authority` prefix (`http://{host}:{port}/...`),
/// which is how destination templates are written.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    pattern: String,
    origin: Option<Vec<Part>>,
    segments: Vec<Segment>,
    variables: Vec<String>,
    matcher: Regex,
}

impl UriTemplate {
    pub fn compile(pattern: &str) -> Result<Self, TemplateError> {
        let parsed = TemplateParser::parse(pattern)?;
        let matcher = Self::build_matcher(parsed.origin.as_deref(), &parsed.segments).map_err(
            |e| TemplateError::Syntax {
                template: pattern.to_string(),
                reason: e.to_string(),
            },
        )?;

        Ok(Self {
            pattern: pattern.trim().to_string(),
            origin: parsed.origin,
            segments: parsed.segments,
            variables: parsed.variables,
            matcher,
        })
    }

    fn build_matcher(origin: Option<&[Part]>, segments: &[Segment]) -> Result<Regex, regex::Error> {
        let mut re = String::from("^");

        if let Some(parts) = origin {
            Self::push_parts(&mut re, parts);
        }

        for segment in segments {
            match segment.parts.as_slice() {
                [Part::CatchAll(name)] => {
                    re.push_str(&format!("(?:/(?P<{}>.*))?", name));
                }
                parts => {
                    re.push('/');
                    Self::push_parts(&mut re, parts);
                }
            }
        }

        re.push_str("/?$");
        Regex::new(&re)
    }

    fn push_parts(re: &mut String, parts: &[Part]) {
        for part in parts {
            match part {
                Part::Literal(text) => re.push_str(&regex::escape(text)),
                Part::Variable(name) => re.push_str(&format!("(?P<{}>[^/]+)", name)),
                Part::CatchAll(name) => re.push_str(&format!("(?P<{}>.*)", name)),
            }
        }
    }

    /// The raw pattern this template was compiled from
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Variable names in declaration order
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }

    /// Match a request path. Literals are compared case-sensitively.
    pub fn matches(&self, path: &str) -> Option<Bindings> {
        let captures = self.matcher.captures(path)?;

        let mut bindings = Bindings::with_capacity(self.variables.len());
        for name in &self.variables {
            let value = captures
                .name(name)
                .map(|m| m.as_str().trim_end_matches('/'))
                .unwrap_or("");
            bindings.insert(name.clone(), value.to_string());
        }

        Some(bindings)
    }

    /// Match already-split path segments.
    pub fn match_segments<S: AsRef<str>>(&self, segments: &[S]) -> Option<Bindings> {
        let mut path = String::new();
        for segment in segments {
            path.push('/');
            path.push_str(segment.as_ref());
        }
        if path.is_empty() {
            path.push('/');
        }
        self.matches(&path)
    }

    /// Fill every variable from `params`. Extra params are ignored.
    pub fn bind(&self, params: &Bindings) -> Result<String, TemplateError> {
        self.render(params, true)
    }

    /// Best-effort binding: segments whose variables are absent are left out
    /// so the result stays addressable with a partial parameter set.
    pub fn bind_non_strict(&self, params: &Bindings) -> String {
        // Non-strict rendering never reports a missing variable
        self.render(params, false).unwrap_or_else(|_| "/".to_string())
    }

    fn render(&self, params: &Bindings, strict: bool) -> Result<String, TemplateError> {
        let mut out = String::new();

        if let Some(parts) = &self.origin {
            for part in parts {
                match part {
                    Part::Literal(text) => out.push_str(text),
                    Part::Variable(_) | Part::CatchAll(_) => {
                        if let Some(value) = Self::value_of(part, params, strict)? {
                            out.push_str(value);
                        }
                    }
                }
            }
        }

        let mut rendered = Vec::with_capacity(self.segments.len());
        'segments: for segment in &self.segments {
            let mut text = String::new();
            for part in &segment.parts {
                match part {
                    Part::Literal(lit) => text.push_str(lit),
                    Part::Variable(_) | Part::CatchAll(_) => {
                        match Self::value_of(part, params, strict)? {
                            Some(value) => text.push_str(value),
                            None => continue 'segments,
                        }
                    }
                }
            }
            if !text.is_empty() {
                rendered.push(text);
            }
        }

        if rendered.is_empty() {
            if self.origin.is_none() {
                out.push('/');
            }
        } else {
            for segment in rendered {
                out.push('/');
                out.push_str(&segment);
            }
        }

        Ok(out)
    }

    /// Value to render for a variable part, with surrounding slashes removed.
    /// In strict mode a non-catch-all variable must not render empty, or the
    /// result would no longer match this template.
    fn value_of<'a>(
        part: &Part,
        params: &'a Bindings,
        strict: bool,
    ) -> Result<Option<&'a str>, TemplateError> {
        let (name, catch_all) = match part {
            Part::Variable(name) => (name, false),
            Part::CatchAll(name) => (name, true),
            Part::Literal(_) => return Ok(None),
        };

        let Some(value) = params.get(name) else {
            if strict {
                return Err(TemplateError::MissingVariable(name.clone()));
            }
            return Ok(None);
        };

        let value = value.trim_matches('/');
        if strict && !catch_all && value.is_empty() {
            return Err(TemplateError::EmptyVariable(name.clone()));
        }

        Ok(Some(value))
    }
}

impl FromStr for UriTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl PartialEq for UriTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for UriTemplate {}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_compile_rejects_duplicate_names() {
        let err = UriTemplate::compile("/{id}/items/{id}").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_compile_rejects_inner_catch_all() {
        let err = UriTemplate::compile("/api/{*rest}/tail").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
        assert!(UriTemplate::compile("/api/x{*rest}").is_err());
    }

    #[test]
    fn test_match_literal_is_case_sensitive() {
        let template = UriTemplate::compile("/api/users").unwrap();
        assert!(template.matches("/api/users").is_some());
        assert!(template.matches("/api/users/").is_some());
        assert!(template.matches("/API/users").is_none());
        assert!(template.matches("/api/users/1").is_none());
    }

    #[test]
    fn test_variable_binds_one_segment() {
        let template = UriTemplate::compile("/users/{id}").unwrap();
        let bound = template.matches("/users/42").unwrap();
        assert_eq!(bound.get("id").map(String::as_str), Some("42"));
        assert!(template.matches("/users/42/orders").is_none());
        assert!(template.matches("/users").is_none());
    }

    #[test]
    fn test_catch_all_absorbs_rest() {
        let template = UriTemplate::compile("/api/{*rest}").unwrap();

        let bound = template.match_segments(&["api", "foo", "bar"]).unwrap();
        assert_eq!(bound["rest"], "foo/bar");

        let bound = template.matches("/api").unwrap();
        assert_eq!(bound["rest"], "");

        assert!(template.matches("/apix/foo").is_none());
    }

    #[test]
    fn test_bind_strict_missing_variable() {
        let template = UriTemplate::compile("/api/{version}/{name}").unwrap();
        let err = template.bind(&params(&[("version", "1.0")])).unwrap_err();
        assert_eq!(err, TemplateError::MissingVariable("name".to_string()));
    }

    #[test]
    fn test_bind_ignores_extra_params() {
        let template = UriTemplate::compile("/api/{name}").unwrap();
        let path = template
            .bind(&params(&[("name", "orders"), ("unused", "x")]))
            .unwrap();
        assert_eq!(path, "/api/orders");
    }

    #[test]
    fn test_bind_non_strict_omits_absent_segments() {
        let template = UriTemplate::compile("/version/{version}/{servicePath}").unwrap();
        assert_eq!(
            template.bind_non_strict(&params(&[("servicePath", "/foo")])),
            "/version/foo"
        );
        assert_eq!(template.bind_non_strict(&Bindings::new()), "/version");

        let root = UriTemplate::compile("{contextPath}/").unwrap();
        assert_eq!(root.bind_non_strict(&Bindings::new()), "/");
        assert_eq!(
            root.bind_non_strict(&params(&[("contextPath", "/cxf/crm")])),
            "/cxf/crm"
        );
    }

    #[test]
    fn test_bind_destination_with_origin() {
        let template = UriTemplate::compile("http://{host}:{port}/svc/{*rest}").unwrap();
        let url = template
            .bind(&params(&[("host", "h1"), ("port", "8080"), ("rest", "a/b")]))
            .unwrap();
        assert_eq!(url, "http://h1:8080/svc/a/b");

        let bare = UriTemplate::compile("http://backend:9000").unwrap();
        assert_eq!(bare.bind(&Bindings::new()).unwrap(), "http://backend:9000");
    }

    #[test]
    fn test_match_bind_round_trip() {
        let template = UriTemplate::compile("/shop/{tenant}/v{major}/{*rest}").unwrap();
        let bindings = params(&[("tenant", "acme"), ("major", "2"), ("rest", "cart/items/7")]);

        let path = template.bind(&bindings).unwrap();
        assert_eq!(path, "/shop/acme/v2/cart/items/7");
        assert_eq!(template.matches(&path), Some(bindings));
    }

    #[test]
    fn test_bind_rejects_empty_variables() {
        let template = UriTemplate::compile("/a/{x}/b").unwrap();
        assert_eq!(
            template.bind(&params(&[("x", "")])),
            Err(TemplateError::EmptyVariable("x".to_string()))
        );
        assert!(template.bind(&params(&[("x", "/")])).is_err());

        let file = UriTemplate::compile("/files/{name}.json").unwrap();
        assert!(file.bind(&params(&[("name", "")])).is_err());

        let origin = UriTemplate::compile("http://{host}:{port}/x").unwrap();
        assert!(origin.bind(&params(&[("host", ""), ("port", "80")])).is_err());

        // lenient binding still drops the segment
        assert_eq!(template.bind_non_strict(&params(&[("x", "")])), "/a/b");
    }

    #[test]
    fn test_round_trip_across_template_shapes() {
        let cases: &[(&str, &[(&str, &str)])] = &[
            ("/a/{x}/b", &[("x", "mid")]),
            ("/api/{*rest}", &[("rest", "")]),
            ("/api/{*rest}", &[("rest", "one/two/three")]),
            ("/files/{name}.{ext}", &[("name", "report"), ("ext", "pdf")]),
            ("/v{major}.{minor}/{id}", &[("major", "2"), ("minor", "1"), ("id", "42")]),
            (
                "http://{host}:{port}/svc/{*rest}",
                &[("host", "h1"), ("port", "8080"), ("rest", "deep/path")],
            ),
            ("https://{host}/{tenant}", &[("host", "gw.local"), ("tenant", "acme")]),
        ];

        for (pattern, pairs) in cases {
            let template = UriTemplate::compile(pattern).unwrap();
            let bindings = params(pairs);
            let bound = template.bind(&bindings).unwrap();
            assert_eq!(template.matches(&bound), Some(bindings), "{} -> {}", pattern, bound);
        }
    }

    #[test]
    fn test_variables_are_fixed_at_compile() {
        let template: UriTemplate = "/a/{x}/{y}".parse().unwrap();
        assert_eq!(template.variables(), ["x", "y"]);
        assert!(template.has_variable("y"));
        assert!(!template.has_variable("version"));
        assert_eq!(template.to_string(), "/a/{x}/{y}");
    }
}
