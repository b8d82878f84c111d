//! Linearization of a node tree into a stack-machine program.

use std::fmt;

use crate::forth::form::Form;
use crate::forth::node::Node;

/// The three text buffers of a generated program.
///
/// Each buffer is the pre-order concatenation of the matching fragments of
/// every node; `code` wraps each node's children between its pre and post
/// fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForthProgram {
    /// `output` declarations.
    pub header: String,
    /// Initializers run once per basket.
    pub init: String,
    /// Instructions run once per entry.
    pub code: String,
}

impl ForthProgram {
    /// Linearize `model`.
    pub fn assemble(model: &Node) -> Self {
        let mut program = Self::default();
        program.visit(model);
        program
    }

    fn visit(&mut self, node: &Node) {
        self.header.extend(node.header_code.iter().map(String::as_str));
        self.init.extend(node.init_code.iter().map(String::as_str));
        self.code.extend(node.pre_code.iter().map(String::as_str));
        for child in &node.children {
            self.visit(child);
        }
        self.code.extend(node.post_code.iter().map(String::as_str));
    }

    /// Complete program: declares the `stream`, `byteoffsets` and
    /// `bytestops` inputs and runs `code` once per entry after seeking to its
    /// start. The entry count is expected on the stack.
    pub fn source(&self) -> String {
        format!(
            "input stream\ninput byteoffsets\ninput bytestops\n{}\n{}\n0 do\nbyteoffsets I-> stack\nstream seek\n{}\nloop\n",
            self.header, self.init, self.code
        )
    }
}

impl fmt::Display for ForthProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source())
    }
}

/// A frozen node tree with its program and form.
///
/// Immutable once built; shared across threads behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModel {
    /// The node tree, rooted at `TOP`.
    pub model: Node,
    /// Linearized program.
    pub program: ForthProgram,
    /// Derived output schema.
    pub form: Form,
}

impl CompiledModel {
    /// Linearize and derive the form of `model`.
    pub fn new(model: Node) -> crate::Result<Self> {
        let program = ForthProgram::assemble(&model);
        let form = model.derive_form()?;
        Ok(Self { model, program, form })
    }

    /// Buffer-name prefixes the program fills, in pre-order of the form.
    pub fn form_keys(&self) -> Vec<&str> {
        self.form.form_keys()
    }
}
