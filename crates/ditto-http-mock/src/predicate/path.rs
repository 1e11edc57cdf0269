//! Path matching, including `{name}` templates that bind path parameters.

use super::multi_value::MultiValueMap;
use super::nottable::NottableValue;
use super::string_matcher::RegexStringMatcher;

#[derive(Debug, Clone)]
enum Segment {
    Literal(NottableValue),
    Parameter(String),
}

/// Compiled path matcher.
///
/// A plain value is compared with the regex-or-literal rules of
/// [`RegexStringMatcher`]. A value with whole-segment `{name}` placeholders is
/// a template: segment counts must agree, literal segments must match and each
/// placeholder binds exactly one non-empty segment.
#[derive(Debug, Clone)]
pub struct CompiledPathMatch {
    value: NottableValue,
    template: Option<Vec<Segment>>,
}

impl CompiledPathMatch {
    pub fn compile(value: &NottableValue) -> Self {
        let segments: Vec<&str> = value.value().split('/').collect();
        let is_template = segments.iter().any(|s| parameter_name(s).is_some());
        let template = is_template.then(|| {
            segments
                .iter()
                .map(|s| match parameter_name(s) {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Literal(NottableValue::new(*s)),
                })
                .collect()
        });
        Self {
            value: value.clone(),
            template,
        }
    }

    pub fn value(&self) -> &NottableValue {
        &self.value
    }

    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }

    /// Bind the template placeholders against `path`.
    ///
    /// Returns `None` when the path does not fit the template (or the matcher
    /// is not a template). Negation is not applied here.
    pub fn extract(&self, path: &str) -> Option<MultiValueMap> {
        let template = self.template.as_ref()?;
        let actual: Vec<&str> = path.split('/').collect();
        if actual.len() != template.len() {
            return None;
        }
        let mut bound = MultiValueMap::new();
        for (segment, part) in template.iter().zip(actual) {
            match segment {
                Segment::Literal(literal) => {
                    if !RegexStringMatcher::CASE_SENSITIVE.matches_value(literal, part) {
                        return None;
                    }
                }
                Segment::Parameter(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    let decoded = urlencoding::decode(part)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| part.to_string());
                    bound.insert(name.as_str(), decoded);
                }
            }
        }
        Some(bound)
    }

    /// Whether `path` satisfies this matcher, honouring negation.
    pub fn matches(&self, path: &str) -> bool {
        if self.template.is_some() {
            self.extract(path).is_some() != self.value.is_not()
        } else {
            RegexStringMatcher::CASE_SENSITIVE.matches_value(&self.value, path)
        }
    }
}

fn parameter_name(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix('{')?.strip_suffix('}')?;
    (!name.is_empty() && !name.contains(['{', '}'])).then_some(name)
}
