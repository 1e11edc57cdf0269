//! XML parsing helpers shared by the XML, XPath and XML-schema body matchers.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use sxd_document::parser;
use sxd_xpath::{Context, Factory, Value, XPath};

const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";
const XPATH_CACHE_LIMIT: usize = 256;

thread_local! {
    // Built expressions are neither Send nor Sync, so each thread keeps its own
    static XPATH_CACHE: RefCell<HashMap<String, Rc<XPath>>> = RefCell::new(HashMap::new());
}

/// Owned, normalised element tree.
///
/// Whitespace-only text, comments and processing instructions are dropped so
/// that formatting differences do not affect comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Option<XmlNode> {
        let package = parser::parse(xml).ok()?;
        let document = package.as_document();
        document.root().children().into_iter().find_map(|child| match child {
            ChildOfRoot::Element(element) => Some(XmlNode::from_element(element)),
            _ => None,
        })
    }

    fn from_element(element: Element<'_>) -> XmlNode {
        let name = element.name();
        let attributes = element
            .attributes()
            .into_iter()
            .filter(|a| a.name().namespace_uri() != Some(XMLNS_URI))
            .filter(|a| a.name().local_part() != "xmlns")
            .map(|a| (qualified(a.name().namespace_uri(), a.name().local_part()), a.value().to_string()))
            .collect();

        let mut children = Vec::new();
        let mut text = String::new();
        for child in element.children() {
            match child {
                ChildOfElement::Element(e) => children.push(XmlNode::from_element(e)),
                ChildOfElement::Text(t) => text.push_str(t.text()),
                _ => {}
            }
        }

        XmlNode {
            namespace: name.namespace_uri().map(str::to_string),
            name: name.local_part().to_string(),
            attributes,
            children,
            text: text.trim().to_string(),
        }
    }

    pub fn child_elements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn qualified(namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(ns) => format!("{{{ns}}}{local}"),
        None => local.to_string(),
    }
}

/// Compile-time check that an XPath expression parses.
pub fn validate_xpath(expression: &str) -> Result<(), String> {
    build_xpath(expression).map(|_| ())
}

fn build_xpath(expression: &str) -> Result<XPath, String> {
    Factory::new()
        .build(expression)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "empty XPath expression".to_string())
}

/// Build an expression once per thread and reuse it afterwards.
fn cached_xpath(expression: &str) -> Option<Rc<XPath>> {
    XPATH_CACHE.with(|cache| {
        if let Some(xpath) = cache.borrow().get(expression) {
            return Some(xpath.clone());
        }
        let xpath = Rc::new(build_xpath(expression).ok()?);
        let mut cache = cache.borrow_mut();
        if cache.len() >= XPATH_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(expression.to_string(), xpath.clone());
        Some(xpath)
    })
}

/// Evaluate an XPath expression against an XML body.
///
/// The result is truthy when it is `true`, a non-empty node-set, a non-empty
/// string or a non-zero number. Unparseable bodies never match.
pub fn xpath_matches(xml: &str, expression: &str, namespaces: &BTreeMap<String, String>) -> bool {
    let Some(xpath) = cached_xpath(expression) else {
        return false;
    };
    let Ok(package) = parser::parse(xml) else {
        return false;
    };
    let document = package.as_document();
    let mut context = Context::new();
    for (prefix, uri) in namespaces {
        context.set_namespace(prefix, uri);
    }
    match xpath.evaluate(&context, document.root()) {
        Ok(Value::Boolean(b)) => b,
        Ok(Value::Nodeset(nodes)) => nodes.size() > 0,
        Ok(Value::String(s)) => !s.is_empty(),
        Ok(Value::Number(n)) => n != 0.0 && !n.is_nan(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalises_whitespace_and_comments() {
        let a = XmlNode::parse("<a x=\"1\"><!-- c --><b>hi</b>\n  <c/></a>").unwrap();
        let b = XmlNode::parse("<a x='1'><b> hi </b><c></c></a>").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.children.len(), 2);
        assert_eq!(a.attributes.get("x").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(XmlNode::parse("<a><b></a>").is_none());
        assert!(XmlNode::parse("not xml").is_none());
    }

    #[test]
    fn test_xpath_is_built_once_per_thread() {
        let expression = "/cached/entry[@id = 'only-here']";
        let ns = BTreeMap::new();
        assert!(xpath_matches("<cached><entry id='only-here'/></cached>", expression, &ns));
        let first = cached_xpath(expression).unwrap();
        assert!(!xpath_matches("<cached/>", expression, &ns));
        let second = cached_xpath(expression).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(cached_xpath("//[").is_none());
    }

    #[test]
    fn test_xpath_truthiness() {
        let xml = "<order><item price=\"3\">pen</item></order>";
        let ns = BTreeMap::new();
        assert!(xpath_matches(xml, "/order/item", &ns));
        assert!(!xpath_matches(xml, "/order/missing", &ns));
        assert!(xpath_matches(xml, "/order/item[@price > 2]", &ns));
        assert!(xpath_matches(xml, "string(/order/item) = 'pen'", &ns));
        assert!(!xpath_matches(xml, "count(/order/missing)", &ns));
        assert!(!xpath_matches("<broken", "/order", &ns));
    }

    #[test]
    fn test_xpath_with_namespaces() {
        let xml = "<s:Envelope xmlns:s=\"urn:soap\"><s:Body>x</s:Body></s:Envelope>";
        let mut ns = BTreeMap::new();
        ns.insert("soap".to_string(), "urn:soap".to_string());
        assert!(xpath_matches(xml, "/soap:Envelope/soap:Body", &ns));
    }

    #[test]
    fn test_validate_xpath() {
        assert!(validate_xpath("/a/b").is_ok());
        assert!(validate_xpath("/a/[").is_err());
    }
}
