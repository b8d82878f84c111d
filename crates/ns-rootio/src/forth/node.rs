//! Parsing-instruction nodes.

use std::fmt;

use crate::forth::form::Form;

/// Structural role of a node.
///
/// Two nodes are the same registration when their kinds are equal; the tree
/// builder uses this for idempotent insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The root.
    Top,
    /// Reads a class's version header and selects a layout.
    DispatchByVersion(String),
    /// Boundary where a class's members begin.
    StartOfModel(String),
    /// The instance was written with a different class version than requested.
    WrongInstanceVersion(String),
    /// Contribution of an inherited base class.
    BaseClass(String),
    /// A leaf with a hand-written form.
    Prebuilt(String),
    /// An ordinary output column (leaf, list or record).
    Field(String),
}

impl NodeKind {
    /// Whether the node is a wrapper that contributes no column of its own.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            NodeKind::Top
                | NodeKind::DispatchByVersion(_)
                | NodeKind::WrongInstanceVersion(_)
                | NodeKind::StartOfModel(_)
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Top => f.write_str("TOP"),
            NodeKind::DispatchByVersion(n) => write!(f, "dispatch-by-version {n}"),
            NodeKind::StartOfModel(n) => write!(f, "start-of-model {n}"),
            NodeKind::WrongInstanceVersion(n) => write!(f, "wrong-instance-version {n}"),
            NodeKind::BaseClass(n) => write!(f, "base-class {n}"),
            NodeKind::Prebuilt(n) => write!(f, "{n}:prebuilt"),
            NodeKind::Field(n) => f.write_str(n),
        }
    }
}

/// One unit of generated code plus the form fragment it fills.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Structural role.
    pub kind: NodeKind,
    /// Emitted before the children's code.
    pub pre_code: Vec<String>,
    /// Emitted after the children's code.
    pub post_code: Vec<String>,
    /// Run once before the per-entry loop.
    pub init_code: Vec<String>,
    /// Declarations.
    pub header_code: Vec<String>,
    /// Partial form; children fill in its content.
    pub form_details: Option<Form>,
    /// Name of the record field this node produces.
    pub field_name: Option<String>,
    /// Owned children in program order.
    pub children: Vec<Node>,
}

impl Node {
    /// A node with no code, form or children.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            pre_code: Vec::new(),
            post_code: Vec::new(),
            init_code: Vec::new(),
            header_code: Vec::new(),
            form_details: None,
            field_name: None,
            children: Vec::new(),
        }
    }

    /// Append a pre-code fragment.
    pub fn with_pre(mut self, code: impl Into<String>) -> Self {
        self.pre_code.push(code.into());
        self
    }

    /// Append a post-code fragment.
    pub fn with_post(mut self, code: impl Into<String>) -> Self {
        self.post_code.push(code.into());
        self
    }

    /// Append an initializer fragment.
    pub fn with_init(mut self, code: impl Into<String>) -> Self {
        self.init_code.push(code.into());
        self
    }

    /// Append a declaration fragment.
    pub fn with_header(mut self, code: impl Into<String>) -> Self {
        self.header_code.push(code.into());
        self
    }

    /// Set the form fragment.
    pub fn with_form(mut self, form: Form) -> Self {
        self.form_details = Some(form);
        self
    }

    /// Set the field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Append a child.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this subtree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Node::size).sum::<usize>()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        write!(f, "{pad}{}", self.kind)?;
        if let Some(name) = &self.field_name {
            write!(f, " ({name})")?;
        }
        if let Some(form) = &self.form_details {
            write!(f, " [{}]", form.class())?;
        }
        writeln!(f)?;
        for (label, code) in [
            ("header", &self.header_code),
            ("init", &self.init_code),
            ("pre", &self.pre_code),
            ("post", &self.post_code),
        ] {
            if !code.is_empty() {
                writeln!(f, "{pad}  {label}={:?}", code.concat())?;
            }
        }
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
