//! Readers for every streamed type.
//!
//! Each reader decodes one value from the cursor. When given a generator it
//! also registers the nodes that reproduce its parse step as generated code,
//! so a single pass over one entry both reads the entry and describes the
//! type. Readers restore the generator's active node before returning.

use crate::context::ReadContext;
use crate::cursor::{Cursor, VersionHeader};
use crate::error::{Result, RootError};
use crate::forth::form::{Content, Form};
use crate::forth::generator::{ForthGenerator, NodeId};
use crate::forth::node::{Node, NodeKind};
use crate::model::{ClassRegistry, Primitive, StringKind, TypeDesc, Value};

/// Reads values of any [`TypeDesc`] against a class registry.
#[derive(Debug, Clone, Copy)]
pub struct Streamer<'a> {
    registry: &'a ClassRegistry,
}

impl<'a> Streamer<'a> {
    /// A streamer resolving classes in `registry`.
    pub fn new(registry: &'a ClassRegistry) -> Self {
        Self { registry }
    }

    /// Read one value of type `ty`.
    ///
    /// `field` names the record field the value fills, if any. With `forth`
    /// set, nodes are contributed under the generator's active node and
    /// types that cannot be generated fail with [`RootError::CannotGenerate`].
    pub fn read(
        &self,
        ty: &TypeDesc,
        field: Option<&str>,
        cursor: &mut Cursor,
        ctx: &ReadContext,
        forth: Option<&mut ForthGenerator>,
    ) -> Result<Value> {
        match ty {
            TypeDesc::Primitive(p) => read_primitive(*p, field, cursor, ctx, forth),
            TypeDesc::String(kind) => read_string(*kind, field, cursor, ctx, forth),
            TypeDesc::TObject => read_tobject(field, cursor, ctx, forth),
            TypeDesc::Datime => read_datime(field, cursor, ctx, forth),
            TypeDesc::Time => read_time(field, cursor, ctx, forth),
            TypeDesc::Ref => read_ref(field, cursor, ctx, forth),
            TypeDesc::RefArray => read_ref_array(field, cursor, ctx, forth),
            TypeDesc::Vector(elem) => self.read_vector(elem, field, cursor, ctx, forth),
            TypeDesc::FixedArray(elem, n) => self.read_fixed_array(elem, *n, field, cursor, ctx, forth),
            TypeDesc::Map(k, v) => self.read_map(k, v, field, cursor, ctx, forth),
            TypeDesc::Class(name) => self.read_class(name, field, cursor, ctx, forth),
        }
    }

    fn read_vector(
        &self,
        elem: &TypeDesc,
        field: Option<&str>,
        cursor: &mut Cursor,
        ctx: &ReadContext,
        mut forth: Option<&mut ForthGenerator>,
    ) -> Result<Value> {
        let start = cursor.pos();
        let header = read_container_header(cursor, ctx, forth.is_some(), "std::vector")?;
        let skipped = cursor.pos() - start;
        let count = cursor.read_u32()? as usize;
        let elem_ctx = ctx.descend_path("@items").with_header(false);

        let mut pushed = None;
        if let Some(generator) = forth.as_deref_mut() {
            let key = ctx.node_name("");
            let mut node = named(Node::new(NodeKind::Field(key.clone())), field)
                .with_header(format!("output {key}-offsets {}\n", ctx.index_format.output_type()))
                .with_init(format!("0 {key}-offsets <- stack\n"));
            if skipped > 0 {
                node = node.with_pre(skip_code(skipped));
            }
            node = node.with_pre(format!("stream !I-> stack\ndup {key}-offsets +<- stack\n"));

            match elem.as_primitive() {
                Some(p) => {
                    let data = elem_ctx.node_name("");
                    let content = Form::numpy(p).with_form_key(data.clone());
                    node = node
                        .with_header(format!("output {data}-data {}\n", p.name()))
                        .with_pre(format!("stream #!{}-> {data}-data\n", p.code()))
                        .with_form(Form::list_offset(ctx.index_format, content).with_form_key(key));
                    generator.add_node(node);
                }
                None => {
                    node = node
                        .with_pre("0 do\n")
                        .with_post("loop\n")
                        .with_form(Form::list_offset(ctx.index_format, Content::null()).with_form_key(key));
                    let id = generator.add_node(node);
                    generator.push_active_node(id);
                    pushed = Some(id);
                    if count == 0 {
                        generator.mark_incomplete();
                    }
                }
            }
        }

        let mut items = Vec::with_capacity(count.min(cursor.remaining()));
        match elem.as_primitive() {
            Some(p) => {
                for _ in 0..count {
                    items.push(p.read(cursor)?);
                }
            }
            None => {
                for _ in 0..count {
                    items.push(self.read(elem, None, cursor, &elem_ctx, forth.as_deref_mut())?);
                }
            }
        }

        if let (Some(generator), Some(_)) = (forth, pushed) {
            generator.pop_active_node()?;
        }
        check_byte_count(start, header.as_ref(), cursor, "std::vector")?;
        Ok(Value::List(items))
    }

    fn read_fixed_array(
        &self,
        elem: &TypeDesc,
        n: usize,
        field: Option<&str>,
        cursor: &mut Cursor,
        ctx: &ReadContext,
        mut forth: Option<&mut ForthGenerator>,
    ) -> Result<Value> {
        let elem_ctx = ctx.descend_path("@elements").with_header(false);
        let primitive = elem.as_primitive();

        let mut pushed = None;
        if let Some(generator) = forth.as_deref_mut() {
            let key = ctx.node_name("");
            match primitive {
                Some(p) => {
                    let data = elem_ctx.node_name("");
                    let content = Form::numpy(p).with_form_key(data.clone());
                    generator.add_node(
                        named(Node::new(NodeKind::Field(key.clone())), field)
                            .with_header(format!("output {data}-data {}\n", p.name()))
                            .with_pre(format!("{n} stream #!{}-> {data}-data\n", p.code()))
                            .with_form(Form::regular(n, content).with_form_key(key)),
                    );
                }
                None => {
                    // Unnamed: the element subtree carries the field name.
                    let id = generator.add_node(
                        Node::new(NodeKind::Field(key.clone()))
                            .with_pre(format!("{n} 0 do\n"))
                            .with_post("loop\n")
                            .with_form(Form::regular(n, Content::null()).with_form_key(key)),
                    );
                    generator.push_active_node(id);
                    pushed = Some(id);
                    if n == 0 {
                        generator.mark_incomplete();
                    }
                }
            }
        }

        let mut items = Vec::with_capacity(n.min(cursor.remaining()));
        match primitive {
            Some(p) => {
                for _ in 0..n {
                    items.push(p.read(cursor)?);
                }
            }
            None => {
                for _ in 0..n {
                    items.push(self.read(elem, field, cursor, &elem_ctx, forth.as_deref_mut())?);
                }
            }
        }

        if let (Some(generator), Some(_)) = (forth, pushed) {
            generator.pop_active_node()?;
        }
        Ok(Value::List(items))
    }

    fn read_map(
        &self,
        key_ty: &TypeDesc,
        value_ty: &TypeDesc,
        field: Option<&str>,
        cursor: &mut Cursor,
        ctx: &ReadContext,
        mut forth: Option<&mut ForthGenerator>,
    ) -> Result<Value> {
        let start = cursor.pos();
        let mut header = None;
        if ctx.header {
            let h = cursor.read_version_header()?;
            if !h.is_memberwise {
                return Err(RootError::NotImplemented("std::map streamed object-wise".into()));
            }
            cursor.skip(6)?;
            header = Some(h);
        }
        let skipped = cursor.pos() - start;
        let count = cursor.read_u32()? as usize;
        let keys_ctx = ctx.descend_path("@keys").with_header(false);
        let values_ctx = ctx.descend_path("@values").with_header(false);

        let mut map_id = None;
        if let Some(generator) = forth.as_deref_mut() {
            let key = ctx.node_name("");
            let entry = Form::record(None, Vec::new()).with_parameter("__array__", "sorted_map");
            let mut node = named(Node::new(NodeKind::Field(key.clone())), field)
                .with_header(format!("output {key}-offsets {}\n", ctx.index_format.output_type()))
                .with_init(format!("0 {key}-offsets <- stack\n"));
            if skipped > 0 {
                node = node.with_pre(skip_code(skipped));
            }
            node = node
                .with_pre(format!("stream !I-> stack\ndup {key}-offsets +<- stack\n"))
                .with_form(Form::list_offset(ctx.index_format, entry).with_form_key(key));
            let id = generator.add_node(node);
            generator.push_active_node(id);
            map_id = Some(id);
            if count == 0 {
                generator.mark_incomplete();
            }
        }

        // Keys are streamed first, then values.
        let before = children_of(forth.as_deref(), map_id);
        let mut keys = Vec::with_capacity(count.min(cursor.remaining()));
        for _ in 0..count {
            keys.push(self.read(key_ty, None, cursor, &keys_ctx, forth.as_deref_mut())?);
        }
        wrap_new_child(forth.as_deref_mut(), map_id, before, 0, "dup 0 do\n");

        let before = children_of(forth.as_deref(), map_id);
        let mut values = Vec::with_capacity(keys.len());
        for _ in 0..count {
            values.push(self.read(value_ty, None, cursor, &values_ctx, forth.as_deref_mut())?);
        }
        wrap_new_child(forth.as_deref_mut(), map_id, before, 1, "0 do\n");

        if let (Some(generator), Some(_)) = (forth, map_id) {
            generator.pop_active_node()?;
        }
        check_byte_count(start, header.as_ref(), cursor, "std::map")?;
        Ok(Value::Map(keys.into_iter().zip(values).collect()))
    }

    fn read_class(
        &self,
        name: &str,
        field: Option<&str>,
        cursor: &mut Cursor,
        ctx: &ReadContext,
        mut forth: Option<&mut ForthGenerator>,
    ) -> Result<Value> {
        if forth.is_some() && ctx.contains_class(name) {
            return Err(RootError::CannotGenerate(format!(
                "{name} can contain itself, so its depth is unbounded"
            )));
        }
        let requested = self
            .registry
            .latest(name)
            .ok_or_else(|| RootError::UnknownClass(name.to_string()))?;

        let start = cursor.pos();
        let header = cursor.read_version_header()?;
        let header_len = cursor.pos() - start;
        if header.is_memberwise {
            return Err(memberwise_error(forth.is_some(), name));
        }

        let instance = self.registry.get(name, header.version);
        if instance.is_none() {
            log::debug!(
                "{name}: no layout for version {}, reading as version {}",
                header.version,
                requested.version
            );
        }
        let layout = instance.unwrap_or(requested);
        let wrong_version = layout.version != requested.version;

        let ctx = ctx.descend_class(name);
        if let Some(generator) = forth.as_deref_mut() {
            let dispatch = generator.add_node(
                named(Node::new(NodeKind::DispatchByVersion(label(name, &ctx, "dispatch"))), field)
                    .with_pre(skip_code(header_len)),
            );
            generator.push_active_node(dispatch);
            if wrong_version {
                let wrong = generator
                    .add_node(Node::new(NodeKind::WrongInstanceVersion(label(name, &ctx, "wrong"))));
                generator.set_active_node(wrong);
            }
            let model = generator.add_node(Node::new(NodeKind::StartOfModel(label(name, &ctx, "model"))));
            generator.set_active_node(model);

            let key = ctx.node_name("");
            let record = Form::record(Some(Vec::new()), Vec::new())
                .with_parameter("__record__", name)
                .with_form_key(key.clone());
            let record = generator.add_node(Node::new(NodeKind::Field(key)).with_form(record));
            generator.set_active_node(record);
        }

        let mut fields = Vec::with_capacity(layout.members.len());
        for base in &layout.bases {
            let base_ctx = ctx.descend_path(format!("@base {base}")).with_header(true);
            if let Some(generator) = forth.as_deref_mut() {
                let id = generator.add_node(Node::new(NodeKind::BaseClass(label(base, &base_ctx, "base"))));
                generator.push_active_node(id);
            }
            let value = self.read(&TypeDesc::class(base), None, cursor, &base_ctx, forth.as_deref_mut())?;
            if let Some(generator) = forth.as_deref_mut() {
                generator.pop_active_node()?;
            }
            match value {
                Value::Record(base_fields) => fields.extend(base_fields),
                other => fields.push((base.clone(), other)),
            }
        }

        for member in &layout.members {
            let member_ctx = ctx.descend_path(member.name.as_str()).with_header(true);
            let value = self.read(&member.ty, Some(&member.name), cursor, &member_ctx, forth.as_deref_mut())?;
            fields.push((member.name.clone(), value));
        }

        if let Some(generator) = forth {
            generator.pop_active_node()?;
        }
        check_byte_count(start, Some(&header), cursor, name)?;
        Ok(Value::Record(fields))
    }
}

fn read_primitive(
    p: Primitive,
    field: Option<&str>,
    cursor: &mut Cursor,
    ctx: &ReadContext,
    forth: Option<&mut ForthGenerator>,
) -> Result<Value> {
    if let Some(generator) = forth {
        let key = ctx.node_name("");
        generator.add_node(
            named(Node::new(NodeKind::Field(key.clone())), field)
                .with_header(format!("output {key}-data {}\n", p.name()))
                .with_pre(format!("stream !{}-> {key}-data\n", p.code()))
                .with_form(Form::numpy(p).with_form_key(key)),
        );
    }
    p.read(cursor)
}

fn read_string(
    kind: StringKind,
    field: Option<&str>,
    cursor: &mut Cursor,
    ctx: &ReadContext,
    forth: Option<&mut ForthGenerator>,
) -> Result<Value> {
    let start = cursor.pos();
    let header = match kind {
        StringKind::StdString => read_container_header(cursor, ctx, forth.is_some(), "std::string")?,
        StringKind::TString => None,
    };
    let skipped = cursor.pos() - start;

    if let Some(generator) = forth {
        let offsets = ctx.node_name("");
        let chars = ctx.node_name("chars");
        let mut node = named(Node::new(NodeKind::Field(offsets.clone())), field)
            .with_header(format!(
                "output {offsets}-offsets {}\noutput {chars}-data uint8\n",
                ctx.index_format.output_type()
            ))
            .with_init(format!("0 {offsets}-offsets <- stack\n"));
        if skipped > 0 {
            node = node.with_pre(skip_code(skipped));
        }
        node = node
            .with_pre(string_code(&offsets, &chars))
            .with_form(Form::string(ctx.index_format, offsets, chars));
        generator.add_node(node);
    }

    let value = cursor.read_string()?;
    check_byte_count(start, header.as_ref(), cursor, "std::string")?;
    Ok(Value::Str(value))
}

fn read_tobject(
    field: Option<&str>,
    cursor: &mut Cursor,
    ctx: &ReadContext,
    forth: Option<&mut ForthGenerator>,
) -> Result<Value> {
    let start = cursor.pos();
    let (unique_id, bits) = if ctx.tobject_header { cursor.read_tobject()? } else { (0, 0) };
    let skipped = cursor.pos() - start;

    if let Some(generator) = forth {
        let mut model = named(Node::new(NodeKind::StartOfModel(label("TObject", ctx, "model"))), field);
        if skipped > 0 {
            model = model.with_pre(skip_code(skipped));
        }
        let model = generator.add_node(model);
        generator.push_active_node(model);
        let key = ctx.node_name("");
        let record = Form::record(Some(Vec::new()), Vec::new())
            .with_parameter("__record__", "TObject")
            .with_form_key(key.clone());
        generator.add_node(Node::new(NodeKind::Field(key)).with_form(record));
        generator.pop_active_node()?;
    }

    Ok(Value::Record(vec![
        ("@fUniqueID".into(), Value::UInt(u64::from(unique_id))),
        ("@fBits".into(), Value::UInt(u64::from(bits))),
    ]))
}

/// Register a prebuilt record of primitive columns.
///
/// `columns` pairs each field name with its type; `pre` is the code that
/// fills them, given their buffer names in the same order.
fn add_prebuilt_record(
    generator: &mut ForthGenerator,
    class: &str,
    field: Option<&str>,
    ctx: &ReadContext,
    columns: &[(&str, Primitive)],
    pre: impl FnOnce(&[String]) -> Vec<String>,
) {
    let key = ctx.node_name("");
    let buffers: Vec<String> = columns.iter().map(|(name, _)| ctx.node_name(name)).collect();
    let form = Form::record(
        Some(columns.iter().map(|(name, _)| name.to_string()).collect()),
        columns
            .iter()
            .zip(&buffers)
            .map(|((_, p), buffer)| Form::numpy(*p).with_form_key(buffer.clone()))
            .collect(),
    )
    .with_parameter("__record__", class)
    .with_form_key(key.clone());

    let mut node = named(Node::new(NodeKind::Prebuilt(key)), field).with_form(form);
    for ((_, p), buffer) in columns.iter().zip(&buffers) {
        node = node.with_header(format!("output {buffer}-data {}\n", p.name()));
    }
    for code in pre(&buffers) {
        node = node.with_pre(code);
    }
    generator.add_node(node);
}

fn read_datime(
    field: Option<&str>,
    cursor: &mut Cursor,
    ctx: &ReadContext,
    forth: Option<&mut ForthGenerator>,
) -> Result<Value> {
    if let Some(generator) = forth {
        add_prebuilt_record(generator, "TDatime", field, ctx, &[("fDatime", Primitive::Uint32)], |b| {
            vec![format!("stream !I-> {}-data\n", b[0])]
        });
    }
    let packed = cursor.read_u32()?;
    Ok(Value::Record(vec![("fDatime".into(), Value::UInt(u64::from(packed)))]))
}

fn read_time(
    field: Option<&str>,
    cursor: &mut Cursor,
    ctx: &ReadContext,
    forth: Option<&mut ForthGenerator>,
) -> Result<Value> {
    let start = cursor.pos();
    let header = read_container_header(cursor, ctx, forth.is_some(), "TTime")?;
    let skipped = cursor.pos() - start;
    if let Some(generator) = forth {
        add_prebuilt_record(generator, "TTime", field, ctx, &[("fMilliSec", Primitive::Int64)], |b| {
            let mut code = Vec::new();
            if skipped > 0 {
                code.push(skip_code(skipped));
            }
            code.push(format!("stream !q-> {}-data\n", b[0]));
            code
        });
    }
    let millis = cursor.read_i64()?;
    check_byte_count(start, header.as_ref(), cursor, "TTime")?;
    Ok(Value::Record(vec![("fMilliSec".into(), Value::Int(millis))]))
}

fn read_ref(
    field: Option<&str>,
    cursor: &mut Cursor,
    ctx: &ReadContext,
    forth: Option<&mut ForthGenerator>,
) -> Result<Value> {
    if let Some(generator) = forth {
        add_prebuilt_record(generator, "TRef", field, ctx, &[("ref", Primitive::Uint32)], |b| {
            vec![format!("2 stream skip\nstream !I-> {}-data\n6 stream skip\n", b[0])]
        });
    }
    cursor.skip(2)?;
    let reference = cursor.read_u32()?;
    cursor.skip(6)?;
    Ok(Value::Record(vec![("ref".into(), Value::UInt(u64::from(reference)))]))
}

fn read_ref_array(
    field: Option<&str>,
    cursor: &mut Cursor,
    ctx: &ReadContext,
    forth: Option<&mut ForthGenerator>,
) -> Result<Value> {
    let start = cursor.pos();
    let header = read_container_header(cursor, ctx, forth.is_some(), "TRefArray")?;
    let skipped = cursor.pos() - start;

    if let Some(generator) = forth {
        let key = ctx.node_name("");
        let name_offsets = ctx.node_name("fName");
        let name_chars = ctx.node_name("fName chars");
        let size = ctx.node_name("fSize");
        let refs = ctx.node_name("refs");
        let refs_data = ctx.node_name("refs data");
        let index = ctx.index_format;

        let form = Form::record(
            Some(vec!["fName".into(), "fSize".into(), "refs".into()]),
            vec![
                Form::string(index, name_offsets.clone(), name_chars.clone()),
                Form::numpy(Primitive::Int32).with_form_key(size.clone()),
                Form::list_offset(index, Form::numpy(Primitive::Int32).with_form_key(refs_data.clone()))
                    .with_form_key(refs.clone()),
            ],
        )
        .with_parameter("__record__", "TRefArray")
        .with_form_key(key.clone());

        let mut node = named(Node::new(NodeKind::Prebuilt(key)), field)
            .with_form(form)
            .with_header(format!(
                "output {name_offsets}-offsets {t}\noutput {name_chars}-data uint8\n\
                 output {size}-data int32\noutput {refs}-offsets {t}\noutput {refs_data}-data int32\n",
                t = index.output_type()
            ))
            .with_init(format!("0 {name_offsets}-offsets <- stack\n0 {refs}-offsets <- stack\n"));
        if skipped > 0 {
            node = node.with_pre(skip_code(skipped));
        }
        node = node
            .with_pre(skip_code(10))
            .with_pre(string_code(&name_offsets, &name_chars))
            .with_pre(format!("stream !i-> stack dup {size}-data <- stack\n"))
            .with_pre(skip_code(6))
            .with_pre(format!("dup {refs}-offsets +<- stack stream #!i-> {refs_data}-data\n"));
        generator.add_node(node);
    }

    cursor.skip(10)?;
    let name = cursor.read_string()?;
    let size = cursor.read_i32()?;
    cursor.skip(6)?;
    let n = usize::try_from(size)
        .map_err(|_| RootError::Deserialization(format!("TRefArray has negative size {size}")))?;
    let mut refs = Vec::with_capacity(n.min(cursor.remaining() / 4));
    for _ in 0..n {
        refs.push(Value::Int(i64::from(cursor.read_i32()?)));
    }
    check_byte_count(start, header.as_ref(), cursor, "TRefArray")?;
    Ok(Value::Record(vec![
        ("fName".into(), Value::Str(name)),
        ("fSize".into(), Value::Int(i64::from(size))),
        ("refs".into(), Value::List(refs)),
    ]))
}

/// Read the optional version header of a container-like value.
fn read_container_header(
    cursor: &mut Cursor,
    ctx: &ReadContext,
    generating: bool,
    what: &str,
) -> Result<Option<VersionHeader>> {
    if !ctx.header {
        return Ok(None);
    }
    let header = cursor.read_version_header()?;
    if header.is_memberwise {
        return Err(memberwise_error(generating, what));
    }
    Ok(Some(header))
}

fn memberwise_error(generating: bool, what: &str) -> RootError {
    let msg = format!("member-wise serialization of {what}");
    if generating { RootError::CannotGenerate(msg) } else { RootError::NotImplemented(msg) }
}

fn check_byte_count(
    start: usize,
    header: Option<&VersionHeader>,
    cursor: &Cursor,
    what: &str,
) -> Result<()> {
    let Some(num_bytes) = header.and_then(|h| h.num_bytes) else {
        return Ok(());
    };
    let expected = start + 4 + num_bytes as usize;
    if cursor.pos() != expected {
        return Err(RootError::Deserialization(format!(
            "{what}: expected to end at byte {expected}, ended at {}",
            cursor.pos()
        )));
    }
    Ok(())
}

fn named(node: Node, field: Option<&str>) -> Node {
    match field {
        Some(name) => node.with_field_name(name),
        None => node,
    }
}

/// Name of a structural wrapper: the class plus a key unique to its position.
fn label(class: &str, ctx: &ReadContext, role: &str) -> String {
    format!("{class} {}", ctx.node_name(role))
}

fn skip_code(n: usize) -> String {
    format!("{n} stream skip\n")
}

fn string_code(offsets: &str, chars: &str) -> String {
    format!(
        "stream !B-> stack dup 255 = if drop stream !I-> stack then dup {offsets}-offsets +<- stack stream #!B-> {chars}-data\n"
    )
}

fn children_of(forth: Option<&ForthGenerator>, id: Option<NodeId>) -> usize {
    match (forth, id) {
        (Some(generator), Some(id)) => generator.children(id).len(),
        _ => 0,
    }
}

/// Wrap child `slot` of a map node in a per-entry loop, the first time it
/// appears.
fn wrap_new_child(
    forth: Option<&mut ForthGenerator>,
    id: Option<NodeId>,
    before: usize,
    slot: usize,
    loop_start: &str,
) {
    let (Some(generator), Some(id)) = (forth, id) else {
        return;
    };
    let children = generator.children(id);
    if before != slot || children.len() != slot + 1 {
        return;
    }
    let child = children[slot];
    let node = generator.node_mut(child);
    node.pre_code.insert(0, loop_start.to_string());
    node.post_code.push("loop\n".to_string());
}
