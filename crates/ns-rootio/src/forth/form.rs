//! Awkward-style array schemas ("forms") and their derivation from a node tree.
//!
//! A [`Form`] describes the columnar layout a generated program fills: a
//! composition of primitive leaves, variable-length lists, fixed-size lists
//! and records. Its JSON is the Awkward form JSON, with `"NULL"` standing for
//! a list content that was declared but never observed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RootError};
use crate::forth::node::{Node, NodeKind};
use crate::model::Primitive;

/// Free-form `parameters` of a form node.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Integer type of list offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFormat {
    /// Signed 32-bit offsets.
    I32,
    /// Unsigned 32-bit offsets.
    U32,
    /// Signed 64-bit offsets.
    #[default]
    I64,
}

impl IndexFormat {
    /// Element type name of the offsets buffer.
    pub fn output_type(self) -> &'static str {
        match self {
            IndexFormat::I32 => "int32",
            IndexFormat::U32 => "uint32",
            IndexFormat::I64 => "int64",
        }
    }
}

/// A nested array schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Form {
    /// Primitive leaf.
    NumpyArray(NumpyForm),
    /// Variable-length list.
    ListOffsetArray(ListOffsetForm),
    /// Fixed-length list.
    RegularArray(RegularForm),
    /// Record (named fields) or tuple (`fields: null`).
    RecordArray(RecordForm),
}

/// `NumpyArray`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumpyForm {
    /// Element type.
    pub primitive: Primitive,
    /// Trailing fixed dimensions.
    #[serde(default)]
    pub inner_shape: Vec<usize>,
    /// Form parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Buffer-name prefix.
    #[serde(default)]
    pub form_key: Option<String>,
}

/// `ListOffsetArray`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOffsetForm {
    /// Offsets type.
    pub offsets: IndexFormat,
    /// Element form.
    pub content: Content,
    /// Form parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Buffer-name prefix.
    #[serde(default)]
    pub form_key: Option<String>,
}

/// `RegularArray`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularForm {
    /// Elements per list.
    pub size: usize,
    /// Element form.
    pub content: Content,
    /// Form parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Buffer-name prefix.
    #[serde(default)]
    pub form_key: Option<String>,
}

/// `RecordArray`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordForm {
    /// Field names, or `None` for a tuple.
    pub fields: Option<Vec<String>>,
    /// One form per field.
    pub contents: Vec<Form>,
    /// Form parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Buffer-name prefix.
    #[serde(default)]
    pub form_key: Option<String>,
}

/// The content slot of a list form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// A nested form.
    Form(Box<Form>),
    /// The `"NULL"` sentinel.
    Null(NullContent),
}

/// Serializes as the string `"NULL"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullContent {
    /// `"NULL"`
    #[serde(rename = "NULL")]
    Null,
}

impl Content {
    /// The `"NULL"` sentinel.
    pub fn null() -> Self {
        Content::Null(NullContent::Null)
    }

    /// Whether this is the `"NULL"` sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, Content::Null(_))
    }

    /// The nested form, if any.
    pub fn as_form(&self) -> Option<&Form> {
        match self {
            Content::Form(f) => Some(f),
            Content::Null(_) => None,
        }
    }
}

impl From<Form> for Content {
    fn from(form: Form) -> Self {
        Content::Form(Box::new(form))
    }
}

impl Form {
    /// Primitive leaf with no parameters.
    pub fn numpy(primitive: Primitive) -> Self {
        Form::NumpyArray(NumpyForm {
            primitive,
            inner_shape: Vec::new(),
            parameters: Parameters::new(),
            form_key: None,
        })
    }

    /// Variable-length list of `content`.
    pub fn list_offset(offsets: IndexFormat, content: impl Into<Content>) -> Self {
        Form::ListOffsetArray(ListOffsetForm {
            offsets,
            content: content.into(),
            parameters: Parameters::new(),
            form_key: None,
        })
    }

    /// Fixed-length list of `content`.
    pub fn regular(size: usize, content: impl Into<Content>) -> Self {
        Form::RegularArray(RegularForm {
            size,
            content: content.into(),
            parameters: Parameters::new(),
            form_key: None,
        })
    }

    /// Record with the given fields (or a tuple when `fields` is `None`).
    pub fn record(fields: Option<Vec<String>>, contents: Vec<Form>) -> Self {
        Form::RecordArray(RecordForm {
            fields,
            contents,
            parameters: Parameters::new(),
            form_key: None,
        })
    }

    /// A string: list of `uint8` tagged `char`, itself tagged `string`.
    pub fn string(offsets: IndexFormat, offsets_key: String, chars_key: String) -> Self {
        let chars = Form::numpy(Primitive::Uint8).with_parameter("__array__", "char").with_form_key(chars_key);
        Form::list_offset(offsets, chars).with_parameter("__array__", "string").with_form_key(offsets_key)
    }

    /// Set one parameter.
    pub fn with_parameter(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters_mut().insert(key.to_string(), value.into());
        self
    }

    /// Set the form key.
    pub fn with_form_key(mut self, key: impl Into<String>) -> Self {
        *self.form_key_mut() = Some(key.into());
        self
    }

    /// Awkward class name.
    pub fn class(&self) -> &'static str {
        match self {
            Form::NumpyArray(_) => "NumpyArray",
            Form::ListOffsetArray(_) => "ListOffsetArray",
            Form::RegularArray(_) => "RegularArray",
            Form::RecordArray(_) => "RecordArray",
        }
    }

    /// Form parameters.
    pub fn parameters(&self) -> &Parameters {
        match self {
            Form::NumpyArray(f) => &f.parameters,
            Form::ListOffsetArray(f) => &f.parameters,
            Form::RegularArray(f) => &f.parameters,
            Form::RecordArray(f) => &f.parameters,
        }
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        match self {
            Form::NumpyArray(f) => &mut f.parameters,
            Form::ListOffsetArray(f) => &mut f.parameters,
            Form::RegularArray(f) => &mut f.parameters,
            Form::RecordArray(f) => &mut f.parameters,
        }
    }

    /// A string-valued parameter.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters().get(key).and_then(serde_json::Value::as_str)
    }

    /// The form key, if set.
    pub fn form_key(&self) -> Option<&str> {
        match self {
            Form::NumpyArray(f) => f.form_key.as_deref(),
            Form::ListOffsetArray(f) => f.form_key.as_deref(),
            Form::RegularArray(f) => f.form_key.as_deref(),
            Form::RecordArray(f) => f.form_key.as_deref(),
        }
    }

    fn form_key_mut(&mut self) -> &mut Option<String> {
        match self {
            Form::NumpyArray(f) => &mut f.form_key,
            Form::ListOffsetArray(f) => &mut f.form_key,
            Form::RegularArray(f) => &mut f.form_key,
            Form::RecordArray(f) => &mut f.form_key,
        }
    }

    /// Whether this is a `ListOffsetArray` or `RegularArray`.
    pub fn is_list_like(&self) -> bool {
        matches!(self, Form::ListOffsetArray(_) | Form::RegularArray(_))
    }

    /// Content of a list form.
    pub fn content(&self) -> Option<&Content> {
        match self {
            Form::ListOffsetArray(f) => Some(&f.content),
            Form::RegularArray(f) => Some(&f.content),
            _ => None,
        }
    }

    fn content_mut(&mut self) -> Option<&mut Content> {
        match self {
            Form::ListOffsetArray(f) => Some(&mut f.content),
            Form::RegularArray(f) => Some(&mut f.content),
            _ => None,
        }
    }

    /// Every form key in pre-order.
    pub fn form_keys(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_form_keys(&mut out);
        out
    }

    fn collect_form_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(key) = self.form_key() {
            out.push(key);
        }
        match self {
            Form::RecordArray(r) => r.contents.iter().for_each(|c| c.collect_form_keys(out)),
            _ => {
                if let Some(inner) = self.content().and_then(Content::as_form) {
                    inner.collect_form_keys(out);
                }
            }
        }
    }

    /// Compact JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse form JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn is_string_leaf(&self) -> bool {
        matches!(self.parameter_str("__array__"), Some("string" | "bytestring"))
            && matches!(self.content().and_then(Content::as_form), Some(Form::NumpyArray(_)))
    }

    fn is_sorted_map(&self) -> bool {
        matches!(
            self.content().and_then(Content::as_form),
            Some(inner @ Form::RecordArray(_)) if inner.parameter_str("__array__") == Some("sorted_map")
        )
    }
}

/// The innermost content slot below a chain of list forms.
fn innermost_content(form: &mut Form) -> Option<&mut Content> {
    let descend = matches!(form.content(), Some(Content::Form(inner)) if inner.is_list_like());
    let content = form.content_mut()?;
    if !descend {
        return Some(content);
    }
    match content {
        Content::Form(inner) => innermost_content(inner),
        Content::Null(_) => None,
    }
}

impl Node {
    /// Derive the output schema of this subtree.
    ///
    /// Prebuilt nodes return their hand-written form; list nodes graft their
    /// single child's form into their innermost content; wrapper nodes pass
    /// through; anything else becomes a record of its children, with base
    /// classes flattened into the record.
    pub fn derive_form(&self) -> Result<Form> {
        if let NodeKind::Prebuilt(_) = self.kind {
            return self
                .form_details
                .clone()
                .ok_or_else(|| self.derivation_error("prebuilt node carries no form".into()));
        }

        match &self.form_details {
            Some(form @ Form::NumpyArray(_)) => {
                if !self.children.is_empty() {
                    return Err(self.derivation_error(format!(
                        "NumpyArray node has {} children",
                        self.children.len()
                    )));
                }
                return Ok(form.clone());
            }
            Some(form) if form.is_list_like() => return self.derive_list(form),
            _ => {}
        }

        if self.kind.is_pass_through() {
            return self.only_child()?.derive_form();
        }

        self.derive_record()
    }

    fn derive_list(&self, form: &Form) -> Result<Form> {
        let mut out = form.clone();

        if form.is_string_leaf() {
            return Ok(out);
        }

        if self.children.is_empty() {
            if let Some(content) = out.content_mut() {
                if !matches!(content, Content::Form(inner) if matches!(**inner, Form::NumpyArray(_))) {
                    *content = Content::null();
                }
            }
            return Ok(out);
        }

        if self.children.len() == 2 && form.is_sorted_map() {
            let contents = self.children.iter().map(Node::derive_form).collect::<Result<Vec<_>>>()?;
            if let Some(Content::Form(inner)) = out.content_mut() {
                if let Form::RecordArray(record) = inner.as_mut() {
                    record.fields = None;
                    record.contents = contents;
                }
            }
            return Ok(out);
        }

        let child = self.only_child()?.derive_form()?;
        let slot = innermost_content(&mut out)
            .ok_or_else(|| self.derivation_error("list form has no content slot".into()))?;
        *slot = child.into();
        Ok(out)
    }

    fn derive_record(&self) -> Result<Form> {
        let (parameters, form_key) = match &self.form_details {
            Some(Form::RecordArray(r)) => (r.parameters.clone(), r.form_key.clone()),
            _ => (Parameters::new(), None),
        };
        let mut fields = Vec::with_capacity(self.children.len());
        let mut contents = Vec::with_capacity(self.children.len());

        for child in &self.children {
            if let NodeKind::BaseClass(_) = child.kind {
                let base = child.base_record()?;
                let Some(base_fields) = base.fields else {
                    return Err(child.derivation_error("base class derived a tuple".into()));
                };
                fields.extend(base_fields);
                contents.extend(base.contents);
            } else {
                fields.push(child.named_descendant()?.to_string());
                contents.push(child.derive_form()?);
            }
        }

        Ok(Form::RecordArray(RecordForm { fields: Some(fields), contents, parameters, form_key }))
    }

    /// Walk `base-class -> [dispatch] -> [wrong version] -> start-of-model ->
    /// record` and derive the record.
    fn base_record(&self) -> Result<RecordForm> {
        let mut node = self.only_child()?;
        if let NodeKind::DispatchByVersion(_) = node.kind {
            node = node.only_child()?;
        }
        if let NodeKind::WrongInstanceVersion(_) = node.kind {
            node = node.only_child()?;
        }
        if !matches!(node.kind, NodeKind::StartOfModel(_)) {
            return Err(node.derivation_error("expected start-of-model below a base class".into()));
        }
        match node.only_child()?.derive_form()? {
            Form::RecordArray(record) => Ok(record),
            other => Err(node.derivation_error(format!(
                "base class derived a {} instead of a record",
                other.class()
            ))),
        }
    }

    /// Field name of this node, looking through unnamed list wrappers.
    fn named_descendant(&self) -> Result<&str> {
        let mut node = self;
        loop {
            if let Some(name) = &node.field_name {
                return Ok(name);
            }
            if !node.form_details.as_ref().is_some_and(Form::is_list_like) {
                return Err(node.derivation_error("unnamed field is not a list wrapper".into()));
            }
            node = node.only_child()?;
        }
    }

    fn only_child(&self) -> Result<&Node> {
        match self.children.as_slice() {
            [child] => Ok(child),
            other => Err(self.derivation_error(format!("expected one child, found {}", other.len()))),
        }
    }

    fn derivation_error(&self, reason: String) -> RootError {
        RootError::FormDerivation { node: self.kind.to_string(), reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, field: &str, p: Primitive) -> Node {
        Node::new(NodeKind::Field(name.into()))
            .with_form(Form::numpy(p).with_form_key(name))
            .with_field_name(field)
    }

    fn class_subtree(class: &str, record: Node) -> Node {
        Node::new(NodeKind::DispatchByVersion(class.into()))
            .with_child(Node::new(NodeKind::StartOfModel(class.into())).with_child(record))
    }

    #[test]
    fn record_of_two_leaves() {
        let record = Node::new(NodeKind::Field("node1".into()))
            .with_child(leaf("node2", "a", Primitive::Int32))
            .with_child(leaf("node3", "b", Primitive::Float64));
        let top = Node::new(NodeKind::Top).with_child(class_subtree("Point", record));

        let form = top.derive_form().unwrap();
        let expected = Form::record(
            Some(vec!["a".into(), "b".into()]),
            vec![
                Form::numpy(Primitive::Int32).with_form_key("node2"),
                Form::numpy(Primitive::Float64).with_form_key("node3"),
            ],
        );
        assert_eq!(form, expected);
    }

    #[test]
    fn prebuilt_returns_form_verbatim() {
        let details = Form::record(Some(vec!["fDatime".into()]), vec![Form::numpy(Primitive::Uint32)])
            .with_parameter("__record__", "TDatime");
        let node = Node::new(NodeKind::Prebuilt("node9".into()))
            .with_form(details.clone())
            .with_child(leaf("node10", "ignored", Primitive::Int8));
        assert_eq!(node.derive_form().unwrap(), details);
    }

    #[test]
    fn prebuilt_without_form_is_an_error() {
        let err = Node::new(NodeKind::Prebuilt("node9".into())).derive_form().unwrap_err();
        assert!(matches!(err, RootError::FormDerivation { ref node, .. } if node == "node9:prebuilt"));
    }

    #[test]
    fn numpy_with_children_is_an_error() {
        let node = leaf("node1", "x", Primitive::Int32).with_child(leaf("node2", "y", Primitive::Int32));
        assert!(matches!(node.derive_form(), Err(RootError::FormDerivation { .. })));
    }

    #[test]
    fn unobserved_list_content_becomes_null() {
        let declared = Form::list_offset(IndexFormat::I64, Form::record(Some(vec![]), vec![]));
        let node = Node::new(NodeKind::Field("node1".into())).with_form(declared).with_field_name("v");
        let form = node.derive_form().unwrap();
        assert!(form.content().unwrap().is_null());
        assert!(form.to_json().unwrap().contains("\"content\":\"NULL\""));

        let numeric = Form::list_offset(IndexFormat::I64, Form::numpy(Primitive::Float32));
        let node = Node::new(NodeKind::Field("node2".into())).with_form(numeric.clone());
        assert_eq!(node.derive_form().unwrap(), numeric);
    }

    #[test]
    fn sorted_map_becomes_tuple_of_key_and_value() {
        let entry = Form::record(None, vec![]).with_parameter("__array__", "sorted_map");
        let map = Node::new(NodeKind::Field("node1".into()))
            .with_form(Form::list_offset(IndexFormat::I64, entry))
            .with_field_name("m")
            .with_child(leaf("node2", "keys", Primitive::Int32))
            .with_child(leaf("node3", "values", Primitive::Float64));
        let form = map.derive_form().unwrap();
        let Some(Form::RecordArray(record)) = form.content().and_then(Content::as_form) else {
            panic!("expected record content, got {form:?}");
        };
        assert!(record.fields.is_none());
        assert_eq!(
            record.contents,
            vec![
                Form::numpy(Primitive::Int32).with_form_key("node2"),
                Form::numpy(Primitive::Float64).with_form_key("node3"),
            ]
        );
        assert_eq!(record.parameters["__array__"], "sorted_map");
    }

    #[test]
    fn nested_list_keeps_shape_and_borrows_inner_name() {
        let inner = Node::new(NodeKind::Field("node2".into()))
            .with_form(Form::list_offset(IndexFormat::I64, Form::numpy(Primitive::Float32)))
            .with_field_name("hits");
        let outer = Node::new(NodeKind::Field("node1".into()))
            .with_form(Form::regular(3, Content::null()))
            .with_child(inner);
        let record = Node::new(NodeKind::Field("node0".into())).with_child(outer);

        let Form::RecordArray(r) = record.derive_form().unwrap() else { panic!("not a record") };
        assert_eq!(r.fields, Some(vec!["hits".to_string()]));
        let Form::RegularArray(reg) = &r.contents[0] else { panic!("lost the outer list") };
        assert_eq!(reg.size, 3);
        let Some(Form::ListOffsetArray(list)) = reg.content.as_form() else {
            panic!("lost the inner list")
        };
        assert!(matches!(list.content.as_form(), Some(Form::NumpyArray(_))));
    }

    #[test]
    fn list_child_replaces_innermost_content() {
        let outer = Node::new(NodeKind::Field("node1".into()))
            .with_form(Form::regular(2, Form::list_offset(IndexFormat::I32, Content::null())))
            .with_child(leaf("node2", "x", Primitive::Int16));
        let form = outer.derive_form().unwrap();
        let inner = form.content().and_then(Content::as_form).unwrap();
        assert_eq!(
            inner.content().and_then(Content::as_form),
            Some(&Form::numpy(Primitive::Int16).with_form_key("node2"))
        );
    }

    #[test]
    fn base_class_fields_are_spliced() {
        let base_record = Node::new(NodeKind::Field("node5".into()))
            .with_child(leaf("node6", "fX", Primitive::Float64));
        let base = Node::new(NodeKind::BaseClass("Base".into())).with_child(class_subtree("Base", base_record));
        let derived = Node::new(NodeKind::Field("node1".into()))
            .with_form(Form::record(Some(vec![]), vec![]).with_parameter("__record__", "Derived"))
            .with_child(base)
            .with_child(leaf("node7", "fY", Primitive::Int32));

        let Form::RecordArray(r) = derived.derive_form().unwrap() else { panic!("not a record") };
        assert_eq!(r.fields, Some(vec!["fX".to_string(), "fY".to_string()]));
        assert_eq!(r.parameters["__record__"], "Derived");
    }

    #[test]
    fn base_class_without_model_boundary_is_an_error() {
        let base = Node::new(NodeKind::BaseClass("Base".into())).with_child(leaf("node2", "x", Primitive::Int8));
        let record = Node::new(NodeKind::Field("node1".into())).with_child(base);
        assert!(matches!(record.derive_form(), Err(RootError::FormDerivation { .. })));
    }

    #[test]
    fn pass_through_needs_exactly_one_child() {
        let top = Node::new(NodeKind::Top)
            .with_child(leaf("node1", "a", Primitive::Int8))
            .with_child(leaf("node2", "b", Primitive::Int8));
        let err = top.derive_form().unwrap_err();
        assert!(matches!(err, RootError::FormDerivation { ref node, .. } if node == "TOP"));
    }

    #[test]
    fn unnamed_non_list_field_is_an_error() {
        let unnamed = Node::new(NodeKind::Field("node2".into())).with_form(Form::numpy(Primitive::Int8));
        let record = Node::new(NodeKind::Field("node1".into())).with_child(unnamed);
        assert!(record.derive_form().is_err());
    }

    #[test]
    fn json_matches_awkward_layout() {
        let form = Form::string(IndexFormat::I64, "node1".into(), "node2".into());
        let json: serde_json::Value = serde_json::from_str(&form.to_json().unwrap()).unwrap();
        assert_eq!(json["class"], "ListOffsetArray");
        assert_eq!(json["offsets"], "i64");
        assert_eq!(json["parameters"]["__array__"], "string");
        assert_eq!(json["content"]["primitive"], "uint8");
        assert_eq!(json["content"]["form_key"], "node2");

        let tuple = Form::record(None, vec![Form::numpy(Primitive::Bool)]);
        let json = tuple.to_json().unwrap();
        assert!(json.contains("\"fields\":null"));
        assert_eq!(Form::from_json(&json).unwrap(), tuple);
    }

    #[test]
    fn form_keys_in_preorder() {
        let form = Form::record(
            Some(vec!["s".into()]),
            vec![Form::string(IndexFormat::I64, "node2".into(), "node3".into())],
        )
        .with_form_key("node1");
        assert_eq!(form.form_keys(), vec!["node1", "node2", "node3"]);
    }
}
