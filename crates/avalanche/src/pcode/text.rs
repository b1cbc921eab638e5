//! The textual P-Code format.
//!
//! An object is a list of lists in the value syntax of [`crate::value`]:
//! each global record is a head-keyed list, and each instruction inside a
//! `fun` body is likewise. Reading and printing round-trip: parsing the
//! printed form of an object yields a structurally equal object (integers
//! normalise to decimal and booleans to their keywords along the way).

use std::sync::Arc;

use super::{
    FieldKind, FunGlobal, Global, Instr, MemoryOrder, PcodeObject, Prototype, RegKind, Register,
    RmwOp, SrcPos, StructDef, StructField,
};
use crate::exception;
use crate::mangle::{Demangled, MangleScheme};
use crate::value::{self, Value, escape_list_element};

/// Parses the textual form of a whole object.
pub fn parse_object(text: &str) -> Result<PcodeObject, String> {
    let list = value::parse_list(text)?;
    let mut globals = Vec::with_capacity(list.len());
    for (ix, record) in list.iter().enumerate() {
        let global =
            parse_global(&record).map_err(|e| format!("global {ix} ({}): {e}", brief(&record)))?;
        globals.push(global);
    }
    Ok(PcodeObject { globals })
}

fn brief(value: &Value) -> String {
    let mut text = value.stringify();
    if text.len() > 32 {
        text.truncate(32);
        text.push_str("...");
    }
    text
}

/// Prints a whole object, one global per line.
#[must_use]
pub fn emit_object(object: &PcodeObject) -> String {
    let mut out = String::new();
    for global in &object.globals {
        out.push_str(&emit_node(&global_node(global)));
        out.push('\n');
    }
    out
}

/// Output tree for the printer.
#[derive(Debug, Clone)]
pub(crate) enum Out {
    Atom(String),
    List(Vec<Out>),
}

impl Out {
    fn atom(text: impl Into<String>) -> Self {
        Self::Atom(text.into())
    }

    fn int(value: i64) -> Self {
        Self::Atom(value.to_string())
    }

    fn boolean(value: bool) -> Self {
        Self::Atom(if value { "true" } else { "false" }.to_owned())
    }

    fn reg(register: Register) -> Self {
        Self::Atom(register.to_string())
    }
}

pub(crate) fn emit_node(node: &Out) -> String {
    match node {
        Out::Atom(text) => escape_list_element(text),
        Out::List(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&emit_node(item));
            }
            out.push(']');
            out
        }
    }
}

fn value_node(value: &Value) -> Out {
    match value {
        Value::List(list) => Out::List(list.iter().map(|v| value_node(&v)).collect()),
        other => Out::atom(other.stringify()),
    }
}

fn name_node(name: &Demangled) -> Out {
    let scheme = match name.scheme {
        MangleScheme::None => "none",
        MangleScheme::Ava => "ava",
    };
    Out::List(vec![Out::atom(scheme), Out::atom(name.name.clone())])
}

fn proto_node(proto: &Prototype) -> Out {
    let mut items = vec![Out::atom(proto.calling_convention.clone())];
    items.extend(proto.args.iter().map(|a| Out::atom(a.clone())));
    Out::List(items)
}

pub(crate) fn struct_def_node(def: &StructDef) -> Out {
    let head = Out::List(vec![
        Out::atom(if def.is_union { "union" } else { "struct" }),
        Out::atom(def.name.clone()),
    ]);
    let mut items = vec![head];
    for field in &def.fields {
        items.push(field_node(field));
    }
    Out::List(items)
}

fn field_node(field: &StructField) -> Out {
    let name = Out::atom(field.name.clone());
    match &field.kind {
        FieldKind::Value => Out::List(vec![Out::atom("value"), name]),
        FieldKind::Int {
            size,
            signed,
            atomic,
            alignment,
            byte_order,
        } => Out::List(vec![
            Out::atom("int"),
            Out::atom(size.clone()),
            Out::boolean(*signed),
            Out::boolean(*atomic),
            Out::int(*alignment),
            Out::atom(byte_order.clone()),
            name,
        ]),
        FieldKind::Real { size } => Out::List(vec![Out::atom("real"), Out::atom(size.clone()), name]),
        FieldKind::Ptr { prot, atomic } => Out::List(vec![
            Out::atom("ptr"),
            Out::atom(prot.clone()),
            Out::boolean(*atomic),
            name,
        ]),
        FieldKind::Hybrid { prot } => {
            Out::List(vec![Out::atom("hybrid"), Out::atom(prot.clone()), name])
        }
        FieldKind::Compose { def } => Out::List(vec![Out::atom("compose"), struct_def_node(def), name]),
        FieldKind::Array { def, count } => Out::List(vec![
            Out::atom("array"),
            struct_def_node(def),
            Out::int(*count),
            name,
        ]),
        FieldKind::Tail { def } => Out::List(vec![Out::atom("tail"), struct_def_node(def), name]),
    }
}

fn global_node(global: &Global) -> Out {
    let mut items = vec![Out::atom(global.head())];
    match global {
        Global::SrcPos(pos) => {
            items.push(Out::atom(pos.filename.clone()));
            items.push(Out::int(pos.line_offset));
            items.push(Out::int(pos.start_line));
            items.push(Out::int(pos.end_line));
            items.push(Out::int(pos.start_column));
            items.push(Out::int(pos.end_column));
        }
        Global::Init { fun } => items.push(Out::int(*fun)),
        Global::Macro {
            publish,
            name,
            precedence,
            macro_type,
            definition,
        } => {
            items.push(Out::boolean(*publish));
            items.push(Out::atom(name.clone()));
            items.push(Out::int(*precedence));
            items.push(Out::int(*macro_type));
            items.push(value_node(definition));
        }
        Global::Export {
            global,
            reexport,
            name,
        } => {
            items.push(Out::int(*global));
            items.push(Out::boolean(*reexport));
            items.push(Out::atom(name.clone()));
        }
        Global::LoadPkg { name } | Global::LoadMod { name } => items.push(Out::atom(name.clone())),
        Global::Fun(fun) => {
            items.push(Out::boolean(fun.publish));
            items.push(name_node(&fun.name));
            items.push(proto_node(&fun.prototype));
            items.push(Out::List(fun.vars.iter().map(|v| Out::atom(v.clone())).collect()));
            items.push(Out::List(fun.body.iter().map(instr_node).collect()));
        }
        Global::Var { publish, name } => {
            items.push(Out::boolean(*publish));
            items.push(name_node(name));
        }
        Global::ExtFun { name, prototype } => {
            items.push(name_node(name));
            items.push(proto_node(prototype));
        }
        Global::ExtVar { name } => items.push(name_node(name)),
        Global::DeclSxt { publish, def } => {
            items.push(Out::boolean(*publish));
            items.push(struct_def_node(def));
        }
    }
    Out::List(items)
}

fn instr_node(instr: &Instr) -> Out {
    let mut items = vec![Out::atom(instr.head())];
    match instr {
        Instr::SrcPos(pos) => {
            items.push(Out::atom(pos.filename.clone()));
            items.push(Out::int(pos.line_offset));
            items.push(Out::int(pos.start_line));
            items.push(Out::int(pos.end_line));
            items.push(Out::int(pos.start_column));
            items.push(Out::int(pos.end_column));
        }
        Instr::Push { kind, count } | Instr::Pop { kind, count } => {
            items.push(Out::atom(kind.letter().to_string()));
            items.push(Out::int(i64::from(*count)));
        }
        Instr::LdImmVd { dst, value } => {
            items.push(Out::reg(*dst));
            items.push(Out::atom(value.clone()));
        }
        Instr::LdImmI { dst, value } => {
            items.push(Out::reg(*dst));
            items.push(Out::int(*value));
        }
        Instr::LdGlob { dst, global } => {
            items.push(Out::reg(*dst));
            items.push(Out::int(*global));
        }
        Instr::SetGlob { global, src } => {
            items.push(Out::int(*global));
            items.push(Out::reg(*src));
        }
        Instr::LdRegS { dst, src } | Instr::LdRegD { dst, src } | Instr::LdRegU { dst, src } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
        }
        Instr::LdParm { dst, src, spread } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
            items.push(Out::boolean(*spread));
        }
        Instr::Label { id } => items.push(Out::int(*id)),
        Instr::Goto { target } => items.push(Out::int(*target)),
        Instr::Branch {
            key,
            value,
            invert,
            target,
        } => {
            items.push(Out::reg(*key));
            items.push(Out::int(*value));
            items.push(Out::boolean(*invert));
            items.push(Out::int(*target));
        }
        Instr::Ret { value } => items.push(Out::reg(*value)),
        Instr::InvokeSs { dst, fun, base, count } | Instr::InvokeSd { dst, fun, base, count } => {
            items.push(Out::reg(*dst));
            items.push(Out::int(*fun));
            items.push(Out::int(i64::from(*base)));
            items.push(Out::int(i64::from(*count)));
        }
        Instr::InvokeDd { dst, fun, base, count } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*fun));
            items.push(Out::int(i64::from(*base)));
            items.push(Out::int(i64::from(*count)));
        }
        Instr::Try { cleanup, landing_pad } => {
            items.push(Out::boolean(*cleanup));
            items.push(Out::int(*landing_pad));
        }
        Instr::Yrt | Instr::Rethrow => {}
        Instr::SNewS { dst, sxt, zero } => {
            items.push(Out::reg(*dst));
            items.push(Out::int(*sxt));
            items.push(Out::boolean(*zero));
        }
        Instr::SNewSt { dst, sxt, length, zero } => {
            items.push(Out::reg(*dst));
            items.push(Out::int(*sxt));
            items.push(Out::reg(*length));
            items.push(Out::boolean(*zero));
        }
        Instr::SCpy { dst, src, sxt } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
            items.push(Out::int(*sxt));
        }
        Instr::SCpyT { dst, src, sxt, length } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
            items.push(Out::int(*sxt));
            items.push(Out::reg(*length));
        }
        Instr::SILd { dst, src, sxt, field, volatile_access }
        | Instr::SPLd { dst, src, sxt, field, volatile_access }
        | Instr::SRLd { dst, src, sxt, field, volatile_access }
        | Instr::SVLd { dst, src, sxt, field, volatile_access }
        | Instr::SHiLd { dst, src, sxt, field, volatile_access }
        | Instr::SHyIntp { dst, src, sxt, field, volatile_access } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
            items.push(Out::boolean(*volatile_access));
        }
        Instr::SISt { dst, sxt, field, src, volatile_access }
        | Instr::SPSt { dst, sxt, field, src, volatile_access }
        | Instr::SRSt { dst, sxt, field, src, volatile_access }
        | Instr::SVSt { dst, sxt, field, src, volatile_access }
        | Instr::SHiSt { dst, sxt, field, src, volatile_access } => {
            items.push(Out::reg(*dst));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
            items.push(Out::reg(*src));
            items.push(Out::boolean(*volatile_access));
        }
        Instr::SIaLd { dst, src, sxt, field, volatile_access, order }
        | Instr::SPaLd { dst, src, sxt, field, volatile_access, order } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
            items.push(Out::boolean(*volatile_access));
            items.push(Out::atom(order.to_string()));
        }
        Instr::SIaSt { dst, sxt, field, src, volatile_access, order }
        | Instr::SPaSt { dst, sxt, field, src, volatile_access, order } => {
            items.push(Out::reg(*dst));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
            items.push(Out::reg(*src));
            items.push(Out::boolean(*volatile_access));
            items.push(Out::atom(order.to_string()));
        }
        Instr::SIaCas {
            success,
            actual,
            target,
            sxt,
            field,
            expected,
            replacement,
            weak,
            volatile_access,
            success_order,
            failure_order,
        }
        | Instr::SPaCas {
            success,
            actual,
            target,
            sxt,
            field,
            expected,
            replacement,
            weak,
            volatile_access,
            success_order,
            failure_order,
        } => {
            items.push(Out::reg(*success));
            items.push(Out::reg(*actual));
            items.push(Out::reg(*target));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
            items.push(Out::reg(*expected));
            items.push(Out::reg(*replacement));
            items.push(Out::boolean(*weak));
            items.push(Out::boolean(*volatile_access));
            items.push(Out::atom(success_order.to_string()));
            items.push(Out::atom(failure_order.to_string()));
        }
        Instr::SIaRmw {
            dst,
            target,
            sxt,
            field,
            op,
            src,
            volatile_access,
            order,
        } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*target));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
            items.push(Out::atom(op.to_string()));
            items.push(Out::reg(*src));
            items.push(Out::boolean(*volatile_access));
            items.push(Out::atom(order.to_string()));
        }
        Instr::SPaXch {
            dst,
            target,
            sxt,
            field,
            src,
            volatile_access,
            order,
        } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*target));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
            items.push(Out::reg(*src));
            items.push(Out::boolean(*volatile_access));
            items.push(Out::atom(order.to_string()));
        }
        Instr::SGfp { dst, src, sxt, field } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
        }
        Instr::SGap { dst, src, index, sxt, field } => {
            items.push(Out::reg(*dst));
            items.push(Out::reg(*src));
            items.push(Out::reg(*index));
            items.push(Out::int(*sxt));
            items.push(Out::int(*field));
        }
    }
    Out::List(items)
}

/// Positional-argument cursor over one record's elements.
struct Args {
    head: String,
    items: Vec<Value>,
    pos: usize,
}

impl Args {
    fn of(value: &Value) -> Result<Self, String> {
        let list = value.to_list()?;
        let items: Vec<Value> = list.iter().collect();
        let head = items
            .first()
            .ok_or_else(|| "empty record".to_owned())?
            .stringify();
        Ok(Self { head, items, pos: 1 })
    }

    fn next(&mut self, what: &str) -> Result<Value, String> {
        let item = self
            .items
            .get(self.pos)
            .ok_or_else(|| format!("{}: missing {what}", self.head))?;
        self.pos += 1;
        Ok(item.clone())
    }

    fn finish(self) -> Result<(), String> {
        if self.pos == self.items.len() {
            Ok(())
        } else {
            Err(format!("{}: trailing elements", self.head))
        }
    }

    fn str_(&mut self, what: &str) -> Result<String, String> {
        Ok(self.next(what)?.stringify())
    }

    fn int(&mut self, what: &str) -> Result<i64, String> {
        let text = self.str_(what)?;
        text.trim()
            .parse::<i64>()
            .map_err(|_| format!("{}: {what} is not an integer: {text}", self.head))
    }

    fn uint(&mut self, what: &str) -> Result<u32, String> {
        let value = self.int(what)?;
        u32::try_from(value).map_err(|_| format!("{}: {what} out of range: {value}", self.head))
    }

    fn boolean(&mut self, what: &str) -> Result<bool, String> {
        let text = self.str_(what)?;
        value::parse_boolean(&text).map_err(|e| format!("{}: {what}: {e}", self.head))
    }

    fn reg(&mut self, what: &str) -> Result<Register, String> {
        let text = self.str_(what)?;
        Register::parse(&text).ok_or_else(|| format!("{}: {what} is not a register: {text}", self.head))
    }

    fn reg_kind(&mut self, what: &str) -> Result<RegKind, String> {
        let text = self.str_(what)?;
        let mut chars = text.chars();
        match (chars.next().and_then(RegKind::from_letter), chars.next()) {
            (Some(kind), None) => Ok(kind),
            _ => Err(format!("{}: {what} is not a register kind: {text}", self.head)),
        }
    }

    fn name(&mut self, what: &str) -> Result<Demangled, String> {
        let node = self.next(what)?;
        parse_name(&node).map_err(|e| format!("{}: {what}: {e}", self.head))
    }

    fn proto(&mut self, what: &str) -> Result<Prototype, String> {
        let node = self.next(what)?;
        parse_proto(&node).map_err(|e| format!("{}: {what}: {e}", self.head))
    }

    fn order(&mut self, what: &str) -> Result<MemoryOrder, String> {
        let text = self.str_(what)?;
        // The reflective parser interrupts on failure; recover it locally.
        exception::catch(|| MemoryOrder::parse_reflective(&text))
            .map_err(|e| format!("{}: {what}: {e}", self.head))
    }

    fn rmw(&mut self, what: &str) -> Result<RmwOp, String> {
        let text = self.str_(what)?;
        text.parse()
            .map_err(|_| format!("{}: {what} is not an rmw op: {text}", self.head))
    }
}

fn parse_name(node: &Value) -> Result<Demangled, String> {
    let list = node.to_list()?;
    if list.len() != 2 {
        return Err(format!("malformed name: {node}"));
    }
    let scheme = match list.get(0).expect("length checked").stringify().as_str() {
        "ava" => MangleScheme::Ava,
        "none" => MangleScheme::None,
        other => return Err(format!("unknown mangling scheme: {other}")),
    };
    Ok(Demangled {
        scheme,
        name: list.get(1).expect("length checked").stringify(),
    })
}

fn parse_proto(node: &Value) -> Result<Prototype, String> {
    let list = node.to_list()?;
    if list.is_empty() {
        return Err("empty prototype".to_owned());
    }
    Ok(Prototype {
        calling_convention: list.get(0).expect("non-empty").stringify(),
        args: list.iter().skip(1).map(|v| v.stringify()).collect(),
    })
}

fn parse_string_items(node: &Value) -> Result<Vec<String>, String> {
    Ok(node.to_list()?.iter().map(|v| v.stringify()).collect())
}

pub(crate) fn parse_struct_def(node: &Value) -> Result<Arc<StructDef>, String> {
    let list = node.to_list()?;
    let header = list.get(0).ok_or_else(|| "empty struct definition".to_owned())?;
    let header_items = header.to_list()?;
    if header_items.len() != 2 {
        return Err(format!("malformed struct header: {header}"));
    }
    let is_union = match header_items.get(0).expect("length checked").stringify().as_str() {
        "struct" => false,
        "union" => true,
        other => return Err(format!("unknown struct kind: {other}")),
    };
    let name = header_items.get(1).expect("length checked").stringify();

    let mut fields = Vec::new();
    for field in list.iter().skip(1) {
        fields.push(parse_field(&field)?);
    }
    Ok(Arc::new(StructDef { is_union, name, fields }))
}

fn parse_field(node: &Value) -> Result<StructField, String> {
    let mut args = Args::of(node)?;
    let kind = match args.head.as_str() {
        "value" => FieldKind::Value,
        "int" => FieldKind::Int {
            size: args.str_("size")?,
            signed: args.boolean("signed")?,
            atomic: args.boolean("atomic")?,
            alignment: args.int("alignment")?,
            byte_order: args.str_("byte order")?,
        },
        "real" => FieldKind::Real {
            size: args.str_("size")?,
        },
        "ptr" => FieldKind::Ptr {
            prot: args.str_("prot")?,
            atomic: args.boolean("atomic")?,
        },
        "hybrid" => FieldKind::Hybrid {
            prot: args.str_("prot")?,
        },
        "compose" => FieldKind::Compose {
            def: parse_struct_def(&args.next("definition")?)?,
        },
        "array" => {
            let def = parse_struct_def(&args.next("definition")?)?;
            let count = args.int("count")?;
            FieldKind::Array { def, count }
        }
        "tail" => FieldKind::Tail {
            def: parse_struct_def(&args.next("definition")?)?,
        },
        other => return Err(format!("unknown struct field kind: {other}")),
    };
    let name = args.str_("field name")?;
    args.finish()?;
    Ok(StructField { name, kind })
}

fn parse_global(node: &Value) -> Result<Global, String> {
    let mut args = Args::of(node)?;
    let global = match args.head.as_str() {
        "src-pos" => Global::SrcPos(SrcPos {
            filename: args.str_("filename")?,
            line_offset: args.int("line offset")?,
            start_line: args.int("start line")?,
            end_line: args.int("end line")?,
            start_column: args.int("start column")?,
            end_column: args.int("end column")?,
        }),
        "init" => Global::Init {
            fun: args.int("function reference")?,
        },
        "macro" => Global::Macro {
            publish: args.boolean("publish")?,
            name: args.str_("name")?,
            precedence: args.int("precedence")?,
            macro_type: args.int("macro type")?,
            definition: args.next("definition")?,
        },
        "export" => Global::Export {
            global: args.int("global reference")?,
            reexport: args.boolean("reexport")?,
            name: args.str_("name")?,
        },
        "load-pkg" => Global::LoadPkg {
            name: args.str_("package name")?,
        },
        "load-mod" => Global::LoadMod {
            name: args.str_("module name")?,
        },
        "fun" => {
            let publish = args.boolean("publish")?;
            let name = args.name("name")?;
            let prototype = args.proto("prototype")?;
            let vars = parse_string_items(&args.next("variables")?)?;
            let body_node = args.next("body")?;
            let body_list = body_node.to_list()?;
            let mut body = Vec::with_capacity(body_list.len());
            for (ix, instr) in body_list.iter().enumerate() {
                body.push(parse_instr(&instr).map_err(|e| format!("instruction {ix}: {e}"))?);
            }
            Global::Fun(Box::new(FunGlobal {
                publish,
                name,
                prototype,
                vars,
                body,
            }))
        }
        "var" => Global::Var {
            publish: args.boolean("publish")?,
            name: args.name("name")?,
        },
        "ext-fun" => Global::ExtFun {
            name: args.name("name")?,
            prototype: args.proto("prototype")?,
        },
        "ext-var" => Global::ExtVar {
            name: args.name("name")?,
        },
        "decl-sxt" => Global::DeclSxt {
            publish: args.boolean("publish")?,
            def: parse_struct_def(&args.next("definition")?)?,
        },
        other => return Err(format!("unknown global record: {other}")),
    };
    args.finish()?;
    Ok(global)
}

#[expect(clippy::too_many_lines, reason = "one arm per instruction schema")]
fn parse_instr(node: &Value) -> Result<Instr, String> {
    let mut args = Args::of(node)?;
    let instr = match args.head.as_str() {
        "src-pos" => Instr::SrcPos(SrcPos {
            filename: args.str_("filename")?,
            line_offset: args.int("line offset")?,
            start_line: args.int("start line")?,
            end_line: args.int("end line")?,
            start_column: args.int("start column")?,
            end_column: args.int("end column")?,
        }),
        "push" => Instr::Push {
            kind: args.reg_kind("register kind")?,
            count: args.uint("count")?,
        },
        "pop" => Instr::Pop {
            kind: args.reg_kind("register kind")?,
            count: args.uint("count")?,
        },
        "ld-imm-vd" => Instr::LdImmVd {
            dst: args.reg("dst")?,
            value: args.str_("value")?,
        },
        "ld-imm-i" => Instr::LdImmI {
            dst: args.reg("dst")?,
            value: args.int("value")?,
        },
        "ld-glob" => Instr::LdGlob {
            dst: args.reg("dst")?,
            global: args.int("global reference")?,
        },
        "set-glob" => Instr::SetGlob {
            global: args.int("global reference")?,
            src: args.reg("src")?,
        },
        "ld-reg-s" => Instr::LdRegS {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
        },
        "ld-reg-d" => Instr::LdRegD {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
        },
        "ld-reg-u" => Instr::LdRegU {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
        },
        "ld-parm" => Instr::LdParm {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
            spread: args.boolean("spread")?,
        },
        "label" => Instr::Label {
            id: args.int("label id")?,
        },
        "goto" => Instr::Goto {
            target: args.int("target")?,
        },
        "branch" => Instr::Branch {
            key: args.reg("key")?,
            value: args.int("value")?,
            invert: args.boolean("invert")?,
            target: args.int("target")?,
        },
        "ret" => Instr::Ret {
            value: args.reg("value")?,
        },
        "invoke-ss" => Instr::InvokeSs {
            dst: args.reg("dst")?,
            fun: args.int("function reference")?,
            base: args.uint("base")?,
            count: args.uint("count")?,
        },
        "invoke-sd" => Instr::InvokeSd {
            dst: args.reg("dst")?,
            fun: args.int("function reference")?,
            base: args.uint("base")?,
            count: args.uint("count")?,
        },
        "invoke-dd" => Instr::InvokeDd {
            dst: args.reg("dst")?,
            fun: args.reg("function")?,
            base: args.uint("base")?,
            count: args.uint("count")?,
        },
        "try" => Instr::Try {
            cleanup: args.boolean("cleanup")?,
            landing_pad: args.int("landing pad")?,
        },
        "yrt" => Instr::Yrt,
        "rethrow" => Instr::Rethrow,
        "S-new-s" => Instr::SNewS {
            dst: args.reg("dst")?,
            sxt: args.int("struct reference")?,
            zero: args.boolean("zero")?,
        },
        "S-new-st" => Instr::SNewSt {
            dst: args.reg("dst")?,
            sxt: args.int("struct reference")?,
            length: args.reg("length")?,
            zero: args.boolean("zero")?,
        },
        "S-cpy" => Instr::SCpy {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
            sxt: args.int("struct reference")?,
        },
        "S-cpy-t" => Instr::SCpyT {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
            sxt: args.int("struct reference")?,
            length: args.reg("length")?,
        },
        "S-i-ld" | "S-p-ld" | "S-r-ld" | "S-v-ld" | "S-hi-ld" | "S-hy-intp" => {
            let dst = args.reg("dst")?;
            let src = args.reg("src")?;
            let sxt = args.int("struct reference")?;
            let field = args.int("field")?;
            let volatile_access = args.boolean("volatile")?;
            match args.head.as_str() {
                "S-i-ld" => Instr::SILd { dst, src, sxt, field, volatile_access },
                "S-p-ld" => Instr::SPLd { dst, src, sxt, field, volatile_access },
                "S-r-ld" => Instr::SRLd { dst, src, sxt, field, volatile_access },
                "S-v-ld" => Instr::SVLd { dst, src, sxt, field, volatile_access },
                "S-hi-ld" => Instr::SHiLd { dst, src, sxt, field, volatile_access },
                _ => Instr::SHyIntp { dst, src, sxt, field, volatile_access },
            }
        }
        "S-i-st" | "S-p-st" | "S-r-st" | "S-v-st" | "S-hi-st" => {
            let dst = args.reg("dst")?;
            let sxt = args.int("struct reference")?;
            let field = args.int("field")?;
            let src = args.reg("src")?;
            let volatile_access = args.boolean("volatile")?;
            match args.head.as_str() {
                "S-i-st" => Instr::SISt { dst, sxt, field, src, volatile_access },
                "S-p-st" => Instr::SPSt { dst, sxt, field, src, volatile_access },
                "S-r-st" => Instr::SRSt { dst, sxt, field, src, volatile_access },
                "S-v-st" => Instr::SVSt { dst, sxt, field, src, volatile_access },
                _ => Instr::SHiSt { dst, sxt, field, src, volatile_access },
            }
        }
        "S-ia-ld" | "S-pa-ld" => {
            let dst = args.reg("dst")?;
            let src = args.reg("src")?;
            let sxt = args.int("struct reference")?;
            let field = args.int("field")?;
            let volatile_access = args.boolean("volatile")?;
            let order = args.order("memory order")?;
            if args.head == "S-ia-ld" {
                Instr::SIaLd { dst, src, sxt, field, volatile_access, order }
            } else {
                Instr::SPaLd { dst, src, sxt, field, volatile_access, order }
            }
        }
        "S-ia-st" | "S-pa-st" => {
            let dst = args.reg("dst")?;
            let sxt = args.int("struct reference")?;
            let field = args.int("field")?;
            let src = args.reg("src")?;
            let volatile_access = args.boolean("volatile")?;
            let order = args.order("memory order")?;
            if args.head == "S-ia-st" {
                Instr::SIaSt { dst, sxt, field, src, volatile_access, order }
            } else {
                Instr::SPaSt { dst, sxt, field, src, volatile_access, order }
            }
        }
        "S-ia-cas" | "S-pa-cas" => {
            let success = args.reg("success")?;
            let actual = args.reg("actual")?;
            let target = args.reg("target")?;
            let sxt = args.int("struct reference")?;
            let field = args.int("field")?;
            let expected = args.reg("expected")?;
            let replacement = args.reg("replacement")?;
            let weak = args.boolean("weak")?;
            let volatile_access = args.boolean("volatile")?;
            let success_order = args.order("success order")?;
            let failure_order = args.order("failure order")?;
            if args.head == "S-ia-cas" {
                Instr::SIaCas {
                    success,
                    actual,
                    target,
                    sxt,
                    field,
                    expected,
                    replacement,
                    weak,
                    volatile_access,
                    success_order,
                    failure_order,
                }
            } else {
                Instr::SPaCas {
                    success,
                    actual,
                    target,
                    sxt,
                    field,
                    expected,
                    replacement,
                    weak,
                    volatile_access,
                    success_order,
                    failure_order,
                }
            }
        }
        "S-ia-rmw" => Instr::SIaRmw {
            dst: args.reg("dst")?,
            target: args.reg("target")?,
            sxt: args.int("struct reference")?,
            field: args.int("field")?,
            op: args.rmw("operation")?,
            src: args.reg("src")?,
            volatile_access: args.boolean("volatile")?,
            order: args.order("memory order")?,
        },
        "S-pa-xch" => Instr::SPaXch {
            dst: args.reg("dst")?,
            target: args.reg("target")?,
            sxt: args.int("struct reference")?,
            field: args.int("field")?,
            src: args.reg("src")?,
            volatile_access: args.boolean("volatile")?,
            order: args.order("memory order")?,
        },
        "S-gfp" => Instr::SGfp {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
            sxt: args.int("struct reference")?,
            field: args.int("field")?,
        },
        "S-gap" => Instr::SGap {
            dst: args.reg("dst")?,
            src: args.reg("src")?,
            index: args.reg("index")?,
            sxt: args.int("struct reference")?,
            field: args.int("field")?,
        },
        other => return Err(format!("unknown instruction: {other}")),
    };
    args.finish()?;
    Ok(instr)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_object_round_trips() {
        let object = parse_object("").unwrap();
        assert!(object.is_empty());
        assert_eq!(emit_object(&object), "");
    }

    #[test]
    fn simple_module_round_trips() {
        let text = "\
[src-pos source.ava 0 1 1 1 1]
[ext-var [ava some-var]]
[export 1 true some-var]
[fun false [ava init] [ava pos] [\"\"] [
  [push d 1]
  [ld-imm-vd d0 hello]
  [set-glob 1 v0]
  [pop d 1]
  [ret v0]
]]
[init 3]
";
        let object = parse_object(text).unwrap();
        assert_eq!(object.len(), 5);

        let emitted = emit_object(&object);
        let reparsed = parse_object(&emitted).unwrap();
        assert_eq!(object, reparsed);
    }

    #[test]
    fn verbatim_brace_syntax_is_accepted() {
        let object = parse_object(
            " \\{fun false \"ava foo\" \"ava pos\" \\{x\\} \\{ \\{ret v0\\} \\} \\} ",
        )
        .unwrap();
        assert_eq!(object.len(), 1);
        let Global::Fun(fun) = &object.globals[0] else {
            panic!("expected fun");
        };
        assert_eq!(fun.vars, ["x"]);
        assert_eq!(fun.body, [Instr::Ret { value: Register::parse("v0").unwrap() }]);
    }

    #[test]
    fn integer_normalisation_survives_round_trip() {
        let object = parse_object("[init 0]\n[fun false [ava f] [ava pos] [x] [[ld-imm-i i0 +0x10]]]")
            .err();
        // +0x10 is not decimal ASCII, so the reader rejects it.
        assert!(object.is_some());
    }

    #[test]
    fn struct_definitions_round_trip() {
        let text = "[decl-sxt true [[struct foo] [int word true true 15 native v] \
                    [ptr FILE* true p] [tail [[struct bar]] t]]]\n";
        let object = parse_object(text).unwrap();
        let emitted = emit_object(&object);
        assert_eq!(parse_object(&emitted).unwrap(), object);

        let Global::DeclSxt { def, .. } = &object.globals[0] else {
            panic!("expected decl-sxt");
        };
        assert!(def.has_tail());
    }

    #[test]
    fn bad_memory_order_is_a_local_error_not_an_abort() {
        let err = parse_object(
            "[fun false [ava f] [ava pos] [x] [[S-ia-ld i0 v0 0 0 true sideways]]]",
        )
        .unwrap_err();
        assert!(err.contains("bad memory order"), "{err}");
    }
}
