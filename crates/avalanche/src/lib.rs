#![doc = include_str!("../../../README.md")]

mod ast;
mod codegen;
mod compenv;
mod diag;
mod exception;
mod funmac;
mod lexer;
mod linker;
mod macro_args;
mod macsub;
mod module_cache;
mod parse;
mod pcode;
mod symbol;
mod symtab;
mod treelist;
mod value;
mod varscope;
mod xcode;

mod mangle;

pub use crate::{
    ast::{AstNode, AstRef, ConcatNode, EmptyNode, ErrorNode, InvocationNode, LiteralNode, SeqNode, VarReadNode},
    codegen::{
        CodegenContext, GlobalBuilder, INIT_FUNCTION_NAME, JprotExit, NameKey, SharedErrors,
        codegen_run,
    },
    compenv::{
        CompEnv, NewMacsubFn, ReadSourceFn, SourceMap, compile_module, link_application,
        make_interface, make_package,
    },
    diag::{CompileError, ErrorList, Location},
    exception::{Exception, ExceptionKind, catch, throw, throw_str},
    funmac::{FunMacro, FunmacAccept, FunmacArg, FunmacCg, ParamSpec, funmac_symbol},
    lexer::{LexError, Lexer, Token, TokenKind},
    linker::{Linker, to_interface},
    macro_args::{ArgError, Cursor, MacroArgs, literal_value},
    macsub::{MacroExpander, MacroInvocation, MacroResult, MacsubContext},
    mangle::{Demangled, MangleScheme, demangle},
    module_cache::{CacheStack, MemoryCache, ModuleCache},
    parse::{ParseUnit, ParseUnitKind, Statement, parse},
    pcode::{
        FieldKind, FunGlobal, Global, Instr, LinkageName, MemoryOrder, NUM_REG_KINDS, PcodeObject,
        Prototype, RegKind, Register, RmwOp, SrcPos, StructDef, StructField,
        text::{emit_object, parse_object},
    },
    symbol::{MacroData, Symbol, SymbolKind, Visibility},
    symtab::{Absolutisation, Import, SymTab},
    treelist::TreeList,
    value::{List, Map, Value, escape_list_element, parse_integer, parse_list},
    varscope::VarScope,
    xcode::{PhiBits, XcodeBlock, XcodeFun, XcodeGlobal, XcodeObject, xcode_from_pcode},
};
