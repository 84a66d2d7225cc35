//! Validation of review documents against the schema shipped in
//! `schema/review.xsd`.
//!
//! Only the subset of XML Schema that the review schema uses is understood:
//! top-level and named types, `xs:sequence` with occurrence bounds,
//! attributes with `use="required"`, enumeration restrictions and a handful
//! of built-in simple types. Anything else makes compilation fail, which
//! callers treat as the validator being unavailable.

use chrono::{DateTime, NaiveDateTime};
use roxmltree::{Document, Node};
use std::collections::HashMap;
use thiserror::Error;

/// The review document schema, embedded at build time.
pub const REVIEW_SCHEMA: &str = include_str!("../../schema/review.xsd");

const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
const MAX_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema is not well-formed: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("schema has no targetNamespace")]
    MissingNamespace,
    #[error("schema declares no top-level element")]
    MissingRootElement,
    #[error("schema references unknown type {0}")]
    UnknownType(String),
    #[error("unsupported schema construct: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;

/// A compiled schema, ready to validate documents.
#[derive(Debug, Clone)]
pub struct Schema {
    namespace: String,
    root: ElementDecl,
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    min_occurs: usize,
    max_occurs: Option<usize>,
    content: Content,
}

#[derive(Debug, Clone)]
enum Content {
    Simple(SimpleType),
    Complex(ComplexType),
}

#[derive(Debug, Clone, Default)]
struct ComplexType {
    attributes: Vec<AttributeDecl>,
    sequence: Vec<ElementDecl>,
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    ty: SimpleType,
    required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimpleType {
    String,
    Boolean,
    DateTime,
    NonNegativeInteger,
    PositiveInteger,
    Enumeration(Vec<String>),
}

impl SimpleType {
    fn builtin(local: &str) -> Result<Self> {
        match local {
            "string" | "normalizedString" | "token" | "anyURI" => Ok(SimpleType::String),
            "boolean" => Ok(SimpleType::Boolean),
            "dateTime" => Ok(SimpleType::DateTime),
            "nonNegativeInteger" => Ok(SimpleType::NonNegativeInteger),
            "positiveInteger" => Ok(SimpleType::PositiveInteger),
            other => Err(SchemaError::UnknownType(format!("xs:{other}"))),
        }
    }

    fn check(&self, value: &str) -> std::result::Result<(), String> {
        let valid = match self {
            SimpleType::String => true,
            SimpleType::Boolean => matches!(value, "true" | "false" | "1" | "0"),
            SimpleType::DateTime => {
                DateTime::parse_from_rfc3339(value).is_ok()
                    || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            }
            SimpleType::NonNegativeInteger => value.parse::<u64>().is_ok(),
            SimpleType::PositiveInteger => value.parse::<u64>().is_ok_and(|n| n > 0),
            SimpleType::Enumeration(values) => values.iter().any(|v| v == value),
        };
        if valid {
            Ok(())
        } else {
            Err(format!("'{value}' is not a valid {}", self.name()))
        }
    }

    fn name(&self) -> String {
        match self {
            SimpleType::String => "xs:string".to_string(),
            SimpleType::Boolean => "xs:boolean".to_string(),
            SimpleType::DateTime => "xs:dateTime".to_string(),
            SimpleType::NonNegativeInteger => "xs:nonNegativeInteger".to_string(),
            SimpleType::PositiveInteger => "xs:positiveInteger".to_string(),
            SimpleType::Enumeration(values) => format!("value (one of {})", values.join(", ")),
        }
    }
}

impl Schema {
    /// Compile the schema embedded in the binary.
    pub fn embedded() -> Result<Self> {
        Self::compile(REVIEW_SCHEMA)
    }

    pub fn compile(source: &str) -> Result<Self> {
        let doc = Document::parse(source)?;
        let schema = doc.root_element();
        if !is_xs(schema, "schema") {
            return Err(SchemaError::Unsupported(format!(
                "document element <{}> is not xs:schema",
                schema.tag_name().name()
            )));
        }

        let namespace = schema
            .attribute("targetNamespace")
            .ok_or(SchemaError::MissingNamespace)?
            .to_string();
        let element = schema
            .children()
            .find(|node| is_xs(*node, "element"))
            .ok_or(SchemaError::MissingRootElement)?;

        let root = Compiler::new(schema).element(element, 0)?;
        Ok(Self { namespace, root })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Check `text` against the schema, returning every violation found.
    pub fn validate(&self, text: &str) -> std::result::Result<(), Vec<String>> {
        let doc = Document::parse(text)
            .map_err(|err| vec![format!("document is not well-formed: {err}")])?;

        let mut errors = Vec::new();
        let root = doc.root_element();
        if self.matches(root, &self.root) {
            self.check_element(root, &self.root, &mut errors);
        } else {
            errors.push(format!(
                "expected root element <{}> in namespace {}, found <{}>",
                self.root.name,
                self.namespace,
                root.tag_name().name()
            ));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn matches(&self, node: Node, decl: &ElementDecl) -> bool {
        node.tag_name().name() == decl.name
            && node.tag_name().namespace() == Some(self.namespace.as_str())
    }

    fn check_element(&self, node: Node, decl: &ElementDecl, errors: &mut Vec<String>) {
        let pos = node.document().text_pos_at(node.range().start);
        let at = format!("line {}: <{}>", pos.row, decl.name);

        match &decl.content {
            Content::Simple(ty) => {
                if let Some(attr) = node.attributes().next() {
                    errors.push(format!("{at} has unexpected attribute '{}'", attr.name()));
                }
                if node.children().any(|child| child.is_element()) {
                    errors.push(format!("{at} must contain only text"));
                }
                let text: String = node
                    .children()
                    .filter(|child| child.is_text())
                    .filter_map(|child| child.text())
                    .collect();
                if let Err(msg) = ty.check(&text) {
                    errors.push(format!("{at}: {msg}"));
                }
            }
            Content::Complex(ty) => {
                self.check_attributes(node, ty, &at, errors);
                if node
                    .children()
                    .any(|child| child.is_text() && child.text().is_some_and(|t| !t.trim().is_empty()))
                {
                    errors.push(format!("{at} must not contain text"));
                }
                self.check_sequence(node, ty, &at, errors);
            }
        }
    }

    fn check_attributes(&self, node: Node, ty: &ComplexType, at: &str, errors: &mut Vec<String>) {
        for attr in node.attributes() {
            match ty.attributes.iter().find(|decl| decl.name == attr.name()) {
                Some(decl) if attr.namespace().is_none() => {
                    if let Err(msg) = decl.ty.check(attr.value()) {
                        errors.push(format!("{at} attribute '{}': {msg}", attr.name()));
                    }
                }
                _ => errors.push(format!("{at} has unexpected attribute '{}'", attr.name())),
            }
        }

        for decl in ty.attributes.iter().filter(|decl| decl.required) {
            if node.attribute(decl.name.as_str()).is_none() {
                errors.push(format!("{at} is missing required attribute '{}'", decl.name));
            }
        }
    }

    fn check_sequence(&self, node: Node, ty: &ComplexType, at: &str, errors: &mut Vec<String>) {
        let children: Vec<Node> = node.children().filter(|child| child.is_element()).collect();
        let mut index = 0;

        for particle in &ty.sequence {
            let mut count = 0;
            while index < children.len()
                && self.matches(children[index], particle)
                && particle.max_occurs.is_none_or(|max| count < max)
            {
                self.check_element(children[index], particle, errors);
                index += 1;
                count += 1;
            }
            if count < particle.min_occurs {
                errors.push(format!("{at} is missing child <{}>", particle.name));
            }
        }

        if let Some(extra) = children.get(index) {
            errors.push(format!(
                "{at} has unexpected child <{}>",
                extra.tag_name().name()
            ));
        }
    }
}

/// Resolves named types while compiling element declarations.
struct Compiler<'a, 'input> {
    simple_types: HashMap<&'a str, Node<'a, 'input>>,
    complex_types: HashMap<&'a str, Node<'a, 'input>>,
}

impl<'a, 'input> Compiler<'a, 'input> {
    fn new(schema: Node<'a, 'input>) -> Self {
        let mut simple_types = HashMap::new();
        let mut complex_types = HashMap::new();
        for child in schema.children().filter(|node| node.is_element()) {
            let Some(name) = child.attribute("name") else {
                continue;
            };
            if is_xs(child, "simpleType") {
                simple_types.insert(name, child);
            } else if is_xs(child, "complexType") {
                complex_types.insert(name, child);
            }
        }
        Self {
            simple_types,
            complex_types,
        }
    }

    fn element(&self, node: Node<'a, 'input>, depth: usize) -> Result<ElementDecl> {
        if depth > MAX_DEPTH {
            return Err(SchemaError::Unsupported("element nesting too deep".to_string()));
        }

        let name = node
            .attribute("name")
            .ok_or_else(|| SchemaError::Unsupported("xs:element without a name".to_string()))?;
        let min_occurs = parse_occurs(node.attribute("minOccurs"))?;
        let max_occurs = match node.attribute("maxOccurs") {
            Some("unbounded") => None,
            other => Some(parse_occurs(other)?),
        };

        let content = if let Some(ty) = node.attribute("type") {
            self.resolve(node, ty, depth)?
        } else if let Some(complex) = xs_child(node, "complexType") {
            Content::Complex(self.complex_type(complex, depth)?)
        } else if let Some(simple) = xs_child(node, "simpleType") {
            Content::Simple(self.simple_type(simple)?)
        } else {
            Content::Simple(SimpleType::String)
        };

        Ok(ElementDecl {
            name: name.to_string(),
            min_occurs,
            max_occurs,
            content,
        })
    }

    fn resolve(&self, context: Node<'a, 'input>, qname: &str, depth: usize) -> Result<Content> {
        let (prefix, local) = match qname.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, qname),
        };

        if context.lookup_namespace_uri(prefix) == Some(XS_NAMESPACE) {
            return SimpleType::builtin(local).map(Content::Simple);
        }
        if let Some(node) = self.simple_types.get(local) {
            return self.simple_type(*node).map(Content::Simple);
        }
        if let Some(node) = self.complex_types.get(local) {
            return self.complex_type(*node, depth).map(Content::Complex);
        }
        Err(SchemaError::UnknownType(qname.to_string()))
    }

    fn simple_type(&self, node: Node<'a, 'input>) -> Result<SimpleType> {
        let restriction = xs_child(node, "restriction").ok_or_else(|| {
            SchemaError::Unsupported("xs:simpleType without xs:restriction".to_string())
        })?;

        let values: Vec<String> = restriction
            .children()
            .filter(|child| is_xs(*child, "enumeration"))
            .filter_map(|child| child.attribute("value"))
            .map(str::to_string)
            .collect();
        if !values.is_empty() {
            return Ok(SimpleType::Enumeration(values));
        }

        let base = restriction.attribute("base").unwrap_or("xs:string");
        match self.resolve(restriction, base, 0)? {
            Content::Simple(ty) => Ok(ty),
            Content::Complex(_) => Err(SchemaError::Unsupported(format!(
                "simple type restricting complex type {base}"
            ))),
        }
    }

    fn complex_type(&self, node: Node<'a, 'input>, depth: usize) -> Result<ComplexType> {
        let mut ty = ComplexType::default();

        for child in node.children().filter(|child| child.is_element()) {
            if is_xs(child, "attribute") {
                ty.attributes.push(self.attribute(child)?);
            } else if is_xs(child, "sequence") {
                for particle in child.children().filter(|p| p.is_element()) {
                    if !is_xs(particle, "element") {
                        return Err(SchemaError::Unsupported(format!(
                            "xs:{} inside xs:sequence",
                            particle.tag_name().name()
                        )));
                    }
                    ty.sequence.push(self.element(particle, depth + 1)?);
                }
            } else if !is_xs(child, "annotation") {
                return Err(SchemaError::Unsupported(format!(
                    "xs:{} in xs:complexType",
                    child.tag_name().name()
                )));
            }
        }

        Ok(ty)
    }

    fn attribute(&self, node: Node<'a, 'input>) -> Result<AttributeDecl> {
        let name = node
            .attribute("name")
            .ok_or_else(|| SchemaError::Unsupported("xs:attribute without a name".to_string()))?;
        let ty = match node.attribute("type") {
            Some(qname) => match self.resolve(node, qname, 0)? {
                Content::Simple(ty) => ty,
                Content::Complex(_) => {
                    return Err(SchemaError::Unsupported(format!(
                        "attribute '{name}' with complex type"
                    )));
                }
            },
            None => SimpleType::String,
        };

        Ok(AttributeDecl {
            name: name.to_string(),
            ty,
            required: node.attribute("use") == Some("required"),
        })
    }
}

fn is_xs(node: Node, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace() == Some(XS_NAMESPACE)
}

fn xs_child<'a, 'input>(node: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|child| is_xs(*child, local))
}

fn parse_occurs(value: Option<&str>) -> Result<usize> {
    match value {
        None => Ok(1),
        Some(v) => v
            .parse()
            .map_err(|_| SchemaError::Unsupported(format!("occurrence bound '{v}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "urn:git-annotate:review:1";

    fn doc(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<review xmlns="{NS}" timestamp="2024-05-01T10:00:00Z" source-path="/tmp/x">{body}</review>"#
        )
    }

    #[test]
    fn embedded_schema_compiles() {
        let schema = Schema::embedded().unwrap();
        assert_eq!(schema.namespace(), NS);
    }

    #[test]
    fn accepts_minimal_document() {
        let schema = Schema::embedded().unwrap();
        assert_eq!(schema.validate(&doc("")), Ok(()));
    }

    #[test]
    fn accepts_full_comment() {
        let schema = Schema::embedded().unwrap();
        let text = doc(r#"
  <file path="a.rs" change-type="modified" viewed="true">
    <comment new-line-start="3" new-line-end="4">
      <body>x &amp; y</body>
      <category>style</category>
      <suggestion>
        <original-code>a</original-code>
        <proposed-code>b</proposed-code>
      </suggestion>
      <attachment path=".git-annotate-assets/c-0.png" media-type="image/png"/>
      <attachment path=".git-annotate-assets/c-1.png" media-type="image/png"/>
    </comment>
  </file>"#);
        assert_eq!(schema.validate(&text), Ok(()));
    }

    #[test]
    fn reports_bad_attribute_values() {
        let schema = Schema::embedded().unwrap();
        let text = doc(r#"<file path="a.rs" change-type="copied" viewed="maybe"/>"#);
        let errors = schema.validate(&text).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("copied")));
        assert!(errors.iter().any(|e| e.contains("xs:boolean")));
    }

    #[test]
    fn reports_missing_body_and_unknown_children() {
        let schema = Schema::embedded().unwrap();
        let text = doc(r#"<file path="a.rs" change-type="added" viewed="false"><comment><note/></comment></file>"#);
        let errors = schema.validate(&text).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("missing child <body>")));
        assert!(errors.iter().any(|e| e.contains("unexpected child <note>")));
    }

    #[test]
    fn reports_missing_timestamp_and_wrong_root() {
        let schema = Schema::embedded().unwrap();
        let errors = schema
            .validate(&format!(r#"<review xmlns="{NS}"/>"#))
            .unwrap_err();
        assert!(errors[0].contains("timestamp"));

        let errors = schema.validate("<other/>").unwrap_err();
        assert!(errors[0].contains("expected root element <review>"));
    }

    #[test]
    fn reports_malformed_text() {
        let schema = Schema::embedded().unwrap();
        let errors = schema.validate("<review").unwrap_err();
        assert!(errors[0].starts_with("document is not well-formed"));
    }

    #[test]
    fn broken_schema_fails_to_compile() {
        assert!(matches!(Schema::compile("<xs:schema"), Err(SchemaError::Xml(_))));
        let no_ns = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"/>"#;
        assert!(matches!(Schema::compile(no_ns), Err(SchemaError::MissingNamespace)));
        let unknown = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:x">
  <xs:element name="r" type="xs:duration"/>
</xs:schema>"#;
        assert!(matches!(Schema::compile(unknown), Err(SchemaError::UnknownType(_))));
    }
}
