use super::TemplateError;
use std::collections::HashSet;

/// One piece of a template segment: fixed text or a named placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Variable(String),
    /// Trailing `{*name}` placeholder absorbing the rest of the path
    CatchAll(String),
}

/// A `/`-delimited piece of the path portion of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub parts: Vec<Part>,
}

impl Segment {
    /// Name of the variable when the segment is exactly one placeholder
    pub fn sole_variable(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [Part::Variable(name)] | [Part::CatchAll(name)] => Some(name),
            _ => None,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self.parts.as_slice(), [Part::CatchAll(_)])
    }
}

/// Parsed form of a template pattern.
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    /// `scheme://authority` prefix for absolute destination templates
    pub origin: Option<Vec<Part>>,
    pub segments: Vec<Segment>,
    pub variables: Vec<String>,
}

pub struct TemplateParser;

impl TemplateParser {
    pub fn parse(pattern: &str) -> Result<ParsedTemplate, TemplateError> {
        let pattern = pattern.trim();
        let syntax = |reason: &str| TemplateError::Syntax {
            template: pattern.to_string(),
            reason: reason.to_string(),
        };

        let (origin_str, path_str) = Self::split_origin(pattern);

        let mut names = HashSet::new();
        let mut variables = Vec::new();

        let origin = match origin_str {
            Some(origin) => {
                let parts = Self::parse_parts(origin).map_err(|r| syntax(&r))?;
                for part in &parts {
                    match part {
                        Part::CatchAll(_) => {
                            return Err(syntax("catch-all variable must be the final segment"));
                        }
                        Part::Variable(name) => {
                            if !names.insert(name.clone()) {
                                return Err(syntax(&format!("duplicate variable '{}'", name)));
                            }
                            variables.push(name.clone());
                        }
                        Part::Literal(_) => {}
                    }
                }
                Some(parts)
            }
            None => None,
        };

        let raw_segments: Vec<&str> = path_str.split('/').filter(|s| !s.is_empty()).collect();
        let last = raw_segments.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(raw_segments.len());

        for (idx, raw) in raw_segments.iter().enumerate() {
            let parts = Self::parse_parts(raw).map_err(|r| syntax(&r))?;

            for part in &parts {
                let name = match part {
                    Part::CatchAll(name) => {
                        if idx != last || parts.len() != 1 {
                            return Err(syntax("catch-all variable must be the final segment"));
                        }
                        name
                    }
                    Part::Variable(name) => name,
                    Part::Literal(_) => continue,
                };
                if !names.insert(name.clone()) {
                    return Err(syntax(&format!("duplicate variable '{}'", name)));
                }
                variables.push(name.clone());
            }

            segments.push(Segment { parts });
        }

        Ok(ParsedTemplate {
            origin,
            segments,
            variables,
        })
    }

    /// Split `scheme://authority/path` into its origin and path halves
    fn split_origin(pattern: &str) -> (Option<&str>, &str) {
        match pattern.find("://") {
            Some(pos) => {
                let after = pos + 3;
                match pattern[after..].find('/') {
                    Some(slash) => (Some(&pattern[..after + slash]), &pattern[after + slash..]),
                    None => (Some(pattern), ""),
                }
            }
            None => (None, pattern),
        }
    }

    fn parse_parts(input: &str) -> Result<Vec<Part>, String> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = input.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }

                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err("nested '{' in placeholder".to_string()),
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(format!("unterminated placeholder '{{{}'", name));
                    }

                    let name = name.trim();
                    let (catch_all, name) = match name.strip_prefix('*') {
                        Some(rest) => (true, rest),
                        None => (false, name),
                    };
                    Self::check_name(name)?;

                    if catch_all {
                        parts.push(Part::CatchAll(name.to_string()));
                    } else {
                        parts.push(Part::Variable(name.to_string()));
                    }
                }
                '}' => return Err("unbalanced '}'".to_string()),
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(parts)
    }

    fn check_name(name: &str) -> Result<(), String> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(first) => {
                (first.is_ascii_alphabetic() || first == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => return Err("empty placeholder name".to_string()),
        };

        if valid {
            Ok(())
        } else {
            Err(format!("invalid placeholder name '{}'", name))
        }
    }
}
