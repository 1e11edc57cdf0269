//! Validation of XML bodies against a subset of XML Schema (XSD 1.0).
//!
//! Supported: global `element` declarations (with `ref`), named and anonymous
//! `complexType` with `sequence`, `all` and `choice` content (nested groups
//! included), `minOccurs`/`maxOccurs`, attributes with `use="required"`, and
//! the built-in simple types listed in [`SimpleType`].

use super::xml::XmlNode;
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleType {
    String,
    Int,
    Integer,
    Long,
    Decimal,
    Double,
    Boolean,
    Date,
}

impl SimpleType {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "string" | "normalizedString" | "token" | "anyURI" => SimpleType::String,
            "int" | "short" | "byte" => SimpleType::Int,
            "integer" | "positiveInteger" | "nonNegativeInteger" => SimpleType::Integer,
            "long" => SimpleType::Long,
            "decimal" => SimpleType::Decimal,
            "double" | "float" => SimpleType::Double,
            "boolean" => SimpleType::Boolean,
            "date" => SimpleType::Date,
            _ => return None,
        })
    }

    fn accepts(self, text: &str) -> bool {
        let text = text.trim();
        match self {
            SimpleType::String => true,
            SimpleType::Int => text.parse::<i32>().is_ok(),
            SimpleType::Long => text.parse::<i64>().is_ok(),
            SimpleType::Integer => {
                let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            }
            SimpleType::Decimal => {
                let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
                let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
                (!whole.is_empty() || !fraction.is_empty())
                    && whole.bytes().all(|b| b.is_ascii_digit())
                    && fraction.bytes().all(|b| b.is_ascii_digit())
            }
            SimpleType::Double => {
                matches!(text, "INF" | "-INF" | "NaN")
                    || (!text.contains(['i', 'I', 'n', 'N']) && text.parse::<f64>().is_ok())
            }
            SimpleType::Boolean => matches!(text, "true" | "false" | "1" | "0"),
            SimpleType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        }
    }
}

#[derive(Debug, Clone)]
enum TypeRef {
    AnyType,
    Simple(SimpleType),
    Complex(ComplexType),
    Named(String),
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    ty: TypeRef,
    min: u32,
    max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Sequence,
    All,
    Choice,
}

#[derive(Debug, Clone)]
enum Particle {
    Element(ElementDecl),
    Group(Group),
}

#[derive(Debug, Clone)]
struct Group {
    kind: GroupKind,
    items: Vec<Particle>,
    min: u32,
    max: Option<u32>,
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    required: bool,
    ty: SimpleType,
}

#[derive(Debug, Clone, Default)]
struct ComplexType {
    content: Option<Group>,
    attributes: Vec<AttributeDecl>,
    mixed: bool,
}

/// A parsed schema ready to validate documents.
#[derive(Debug, Clone)]
pub struct XmlSchema {
    elements: HashMap<String, ElementDecl>,
    types: HashMap<String, ComplexType>,
}

impl XmlSchema {
    /// Parse XSD source.
    pub fn parse(source: &str) -> Result<Self, String> {
        let root = XmlNode::parse(source).ok_or("schema is not well-formed XML")?;
        if root.name != "schema" {
            return Err(format!("expected <schema> root, found <{}>", root.name));
        }

        let mut elements = HashMap::new();
        let mut types = HashMap::new();
        for child in &root.children {
            match child.name.as_str() {
                "element" => {
                    let decl = parse_element(child)?;
                    elements.insert(decl.name.clone(), decl);
                }
                "complexType" => {
                    let name = child
                        .attributes
                        .get("name")
                        .ok_or("top-level complexType requires a name")?;
                    types.insert(name.clone(), parse_complex_type(child)?);
                }
                "annotation" | "import" | "include" => {}
                other => return Err(format!("unsupported schema construct <{other}>")),
            }
        }
        Ok(Self { elements, types })
    }

    /// Validate a document, returning the first violation found.
    pub fn validate(&self, xml: &str) -> Result<(), String> {
        let root = XmlNode::parse(xml).ok_or("document is not well-formed XML")?;
        let decl = self
            .elements
            .get(&root.name)
            .ok_or_else(|| format!("no global element declaration for <{}>", root.name))?;
        self.validate_element(decl, &root)
    }

    fn validate_element(&self, decl: &ElementDecl, node: &XmlNode) -> Result<(), String> {
        match &decl.ty {
            TypeRef::AnyType => Ok(()),
            TypeRef::Simple(ty) => self.validate_simple(*ty, node),
            TypeRef::Complex(ct) => self.validate_complex(ct, node),
            TypeRef::Named(name) => {
                if let Some(ty) = SimpleType::from_name(name) {
                    self.validate_simple(ty, node)
                } else if let Some(ct) = self.types.get(name) {
                    self.validate_complex(ct, node)
                } else if name == "anyType" {
                    Ok(())
                } else {
                    Err(format!("unknown type {name}"))
                }
            }
        }
    }

    fn validate_simple(&self, ty: SimpleType, node: &XmlNode) -> Result<(), String> {
        if !node.children.is_empty() {
            return Err(format!("<{}> must not contain elements", node.name));
        }
        if !ty.accepts(&node.text) {
            return Err(format!("<{}> value {:?} is not a valid {ty:?}", node.name, node.text));
        }
        Ok(())
    }

    fn validate_complex(&self, ct: &ComplexType, node: &XmlNode) -> Result<(), String> {
        for attr in &ct.attributes {
            match node.attributes.get(&attr.name) {
                Some(value) if !attr.ty.accepts(value) => {
                    return Err(format!(
                        "attribute {} on <{}> is not a valid {:?}",
                        attr.name, node.name, attr.ty
                    ))
                }
                None if attr.required => {
                    return Err(format!(
                        "attribute {} is required on <{}>",
                        attr.name, node.name
                    ))
                }
                _ => {}
            }
        }
        if let Some(extra) = node
            .attributes
            .keys()
            .find(|k| !ct.attributes.iter().any(|a| &a.name == *k))
        {
            return Err(format!("attribute {extra} is not allowed on <{}>", node.name));
        }
        if !ct.mixed && !node.text.is_empty() && ct.content.is_some() {
            return Err(format!("<{}> does not allow text content", node.name));
        }

        let children: Vec<&XmlNode> = node.children.iter().collect();
        let consumed = match &ct.content {
            Some(group) => self.match_group(group, &children, 0)?,
            None => 0,
        };
        if let Some(unexpected) = children.get(consumed) {
            return Err(format!(
                "unexpected element <{}> in <{}>",
                unexpected.name, node.name
            ));
        }
        Ok(())
    }

    /// Match a group with its occurrence bounds, returning the new position.
    fn match_group(&self, group: &Group, children: &[&XmlNode], start: usize) -> Result<usize, String> {
        let mut pos = start;
        let mut count = 0u32;
        while group.max.map_or(true, |max| count < max) {
            match self.match_group_once(group, children, pos) {
                Ok(next) if next > pos => {
                    pos = next;
                    count += 1;
                }
                Ok(_) => {
                    // A group that matched nothing satisfies any remaining minimum
                    count = count.max(group.min);
                    break;
                }
                Err(e) if count < group.min => return Err(e),
                Err(_) => break,
            }
        }
        if count < group.min {
            return Err(format!(
                "expected at least {} occurrence(s) of a {:?} group",
                group.min, group.kind
            ));
        }
        Ok(pos)
    }

    fn match_group_once(&self, group: &Group, children: &[&XmlNode], start: usize) -> Result<usize, String> {
        match group.kind {
            GroupKind::Sequence => {
                let mut pos = start;
                for item in &group.items {
                    pos = self.match_particle(item, children, pos)?;
                }
                Ok(pos)
            }
            GroupKind::Choice => {
                let mut last_error = None;
                for item in &group.items {
                    match self.match_particle(item, children, start) {
                        Ok(next) if next > start => return Ok(next),
                        Ok(_) => {}
                        Err(e) => last_error = Some(e),
                    }
                }
                if group.items.iter().any(|item| self.particle_is_optional(item)) {
                    return Ok(start);
                }
                Err(last_error.unwrap_or_else(|| "no choice alternative matched".to_string()))
            }
            GroupKind::All => {
                let mut seen = vec![0u32; group.items.len()];
                let mut pos = start;
                'outer: while let Some(child) = children.get(pos) {
                    for (index, item) in group.items.iter().enumerate() {
                        if let Particle::Element(decl) = item {
                            if decl.name == child.name && seen[index] == 0 {
                                self.validate_element(self.resolve(decl), child)?;
                                seen[index] = 1;
                                pos += 1;
                                continue 'outer;
                            }
                        }
                    }
                    break;
                }
                for (index, item) in group.items.iter().enumerate() {
                    if let Particle::Element(decl) = item {
                        if decl.min > 0 && seen[index] == 0 {
                            return Err(format!("missing required element <{}>", decl.name));
                        }
                    }
                }
                Ok(pos)
            }
        }
    }

    fn match_particle(&self, particle: &Particle, children: &[&XmlNode], start: usize) -> Result<usize, String> {
        match particle {
            Particle::Group(group) => self.match_group(group, children, start),
            Particle::Element(decl) => {
                let mut pos = start;
                let mut count = 0u32;
                while decl.max.map_or(true, |max| count < max) {
                    match children.get(pos) {
                        Some(child) if child.name == decl.name => {
                            self.validate_element(self.resolve(decl), child)?;
                            pos += 1;
                            count += 1;
                        }
                        _ => break,
                    }
                }
                if count < decl.min {
                    return Err(format!(
                        "expected at least {} <{}> element(s), found {count}",
                        decl.min, decl.name
                    ));
                }
                Ok(pos)
            }
        }
    }

    fn particle_is_optional(&self, particle: &Particle) -> bool {
        match particle {
            Particle::Element(decl) => decl.min == 0,
            Particle::Group(group) => group.min == 0,
        }
    }

    /// Follow an element `ref` to its global declaration.
    fn resolve<'a>(&'a self, decl: &'a ElementDecl) -> &'a ElementDecl {
        match &decl.ty {
            TypeRef::Named(name) if name.starts_with('@') => {
                self.elements.get(&name[1..]).unwrap_or(decl)
            }
            _ => decl,
        }
    }
}

fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

fn parse_occurs(node: &XmlNode) -> Result<(u32, Option<u32>), String> {
    let min = match node.attributes.get("minOccurs") {
        Some(v) => v.parse().map_err(|_| format!("invalid minOccurs {v}"))?,
        None => 1,
    };
    let max = match node.attributes.get("maxOccurs").map(String::as_str) {
        Some("unbounded") => None,
        Some(v) => Some(v.parse().map_err(|_| format!("invalid maxOccurs {v}"))?),
        None => Some(1),
    };
    Ok((min, max))
}

fn parse_element(node: &XmlNode) -> Result<ElementDecl, String> {
    let (min, max) = parse_occurs(node)?;
    if let Some(reference) = node.attributes.get("ref") {
        let name = local_name(reference).to_string();
        return Ok(ElementDecl {
            ty: TypeRef::Named(format!("@{name}")),
            name,
            min,
            max,
        });
    }
    let name = node
        .attributes
        .get("name")
        .ok_or("element declaration requires a name or ref")?
        .clone();
    let ty = if let Some(ty) = node.attributes.get("type") {
        let local = local_name(ty);
        match SimpleType::from_name(local) {
            Some(simple) => TypeRef::Simple(simple),
            None => TypeRef::Named(local.to_string()),
        }
    } else if let Some(ct) = node.child_elements("complexType").next() {
        TypeRef::Complex(parse_complex_type(ct)?)
    } else if let Some(st) = node.child_elements("simpleType").next() {
        TypeRef::Simple(parse_simple_type(st)?)
    } else {
        TypeRef::AnyType
    };
    Ok(ElementDecl { name, ty, min, max })
}

fn parse_simple_type(node: &XmlNode) -> Result<SimpleType, String> {
    let base = node
        .child_elements("restriction")
        .next()
        .and_then(|r| r.attributes.get("base"))
        .ok_or("simpleType requires a restriction base")?;
    SimpleType::from_name(local_name(base)).ok_or_else(|| format!("unsupported simple type {base}"))
}

fn parse_complex_type(node: &XmlNode) -> Result<ComplexType, String> {
    let mut ct = ComplexType {
        mixed: node.attributes.get("mixed").map(String::as_str) == Some("true"),
        ..ComplexType::default()
    };
    for child in &node.children {
        match child.name.as_str() {
            "sequence" | "all" | "choice" => ct.content = Some(parse_group(child)?),
            "attribute" => ct.attributes.push(parse_attribute(child)?),
            "annotation" => {}
            other => return Err(format!("unsupported complexType content <{other}>")),
        }
    }
    Ok(ct)
}

fn parse_group(node: &XmlNode) -> Result<Group, String> {
    let kind = match node.name.as_str() {
        "sequence" => GroupKind::Sequence,
        "all" => GroupKind::All,
        _ => GroupKind::Choice,
    };
    let (min, max) = parse_occurs(node)?;
    let mut items = Vec::new();
    for child in &node.children {
        match child.name.as_str() {
            "element" => items.push(Particle::Element(parse_element(child)?)),
            "sequence" | "all" | "choice" => items.push(Particle::Group(parse_group(child)?)),
            "annotation" => {}
            other => return Err(format!("unsupported group content <{other}>")),
        }
    }
    Ok(Group { kind, items, min, max })
}

fn parse_attribute(node: &XmlNode) -> Result<AttributeDecl, String> {
    let name = node
        .attributes
        .get("name")
        .ok_or("attribute declaration requires a name")?
        .clone();
    let ty = match node.attributes.get("type") {
        Some(ty) => SimpleType::from_name(local_name(ty))
            .ok_or_else(|| format!("unsupported attribute type {ty}"))?,
        None => SimpleType::String,
    };
    Ok(AttributeDecl {
        name,
        required: node.attributes.get("use").map(String::as_str) == Some("required"),
        ty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_XSD: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="order">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="id" type="xs:int"/>
        <xs:element name="placed" type="xs:date" minOccurs="0"/>
        <xs:element ref="item" maxOccurs="unbounded"/>
        <xs:choice>
          <xs:element name="card" type="xs:string"/>
          <xs:element name="cash" type="xs:boolean"/>
        </xs:choice>
      </xs:sequence>
      <xs:attribute name="priority" type="xs:integer" use="required"/>
    </xs:complexType>
  </xs:element>
  <xs:element name="item" type="itemType"/>
  <xs:complexType name="itemType">
    <xs:all>
      <xs:element name="sku" type="xs:string"/>
      <xs:element name="price" type="xs:decimal"/>
    </xs:all>
  </xs:complexType>
</xs:schema>"#;

    fn schema() -> XmlSchema {
        XmlSchema::parse(ORDER_XSD).unwrap()
    }

    #[test]
    fn test_valid_document() {
        let xml = r#"<order priority="2"><id>7</id><placed>2024-01-31</placed>
            <item><price>1.50</price><sku>a</sku></item>
            <item><sku>b</sku><price>2</price></item>
            <cash>true</cash></order>"#;
        assert_eq!(schema().validate(xml), Ok(()));
    }

    #[test]
    fn test_optional_element_may_be_absent() {
        let xml = r#"<order priority="1"><id>7</id><item><sku>a</sku><price>1</price></item><card>visa</card></order>"#;
        assert!(schema().validate(xml).is_ok());
    }

    #[test]
    fn test_invalid_documents() {
        let s = schema();
        // missing required attribute
        assert!(s
            .validate("<order><id>7</id><item><sku>a</sku><price>1</price></item><card>x</card></order>")
            .is_err());
        // wrong simple type
        assert!(s
            .validate(r#"<order priority="1"><id>seven</id><item><sku>a</sku><price>1</price></item><card>x</card></order>"#)
            .is_err());
        // missing unbounded item
        assert!(s.validate(r#"<order priority="1"><id>7</id><card>x</card></order>"#).is_err());
        // missing choice
        assert!(s
            .validate(r#"<order priority="1"><id>7</id><item><sku>a</sku><price>1</price></item></order>"#)
            .is_err());
        // unknown trailing element
        assert!(s
            .validate(r#"<order priority="1"><id>7</id><item><sku>a</sku><price>1</price></item><card>x</card><extra/></order>"#)
            .is_err());
        // unknown root
        assert!(s.validate("<invoice/>").is_err());
        // malformed
        assert!(s.validate("<order>").is_err());
    }

    #[test]
    fn test_simple_types() {
        assert!(SimpleType::Decimal.accepts("-1.5"));
        assert!(!SimpleType::Decimal.accepts("1e3"));
        assert!(SimpleType::Double.accepts("1e3"));
        assert!(SimpleType::Integer.accepts("+123456789012345678901234567890"));
        assert!(!SimpleType::Int.accepts("123456789012345"));
        assert!(SimpleType::Long.accepts("123456789012345"));
        assert!(SimpleType::Boolean.accepts("0"));
        assert!(!SimpleType::Date.accepts("2024-02-30"));
    }

    #[test]
    fn test_rejects_non_schema() {
        assert!(XmlSchema::parse("<root/>").is_err());
        assert!(XmlSchema::parse("not xml").is_err());
    }
}
