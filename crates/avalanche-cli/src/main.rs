use std::env;
use std::fs;
use std::process::ExitCode;

use avalanche::{
    CompEnv, ErrorList, Linker, compile_module, emit_object, make_interface, parse_object,
};

const DIAGNOSTIC_LINES: usize = 50;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        return usage(&args);
    };

    match command.as_str() {
        "compile-module" => compile_module_cmd(&args[2..]),
        "make-interface" => make_interface_cmd(&args[2..], ".avam", ".avami"),
        "make-package" => link_cmd(&args[2..], ".avam", ".avap", false),
        "make-package-interface" => make_interface_cmd(&args[2..], ".avap", ".avapi"),
        "link" => link_cmd(&args[2..], ".avap", ".avax", true),
        _ => usage(&args),
    }
}

fn usage(args: &[String]) -> ExitCode {
    let program = args.first().map_or("avalanche", String::as_str);
    eprintln!(
        "Usage: {program} <compile-module|make-interface|make-package|make-package-interface|link> <file>..."
    );
    ExitCode::FAILURE
}

/// `compile-module dir/foo.ava` writes `dir/foo.avam`. The leading
/// directory doubles as the package prefix.
fn compile_module_cmd(args: &[String]) -> ExitCode {
    let [input] = args else {
        eprintln!("compile-module takes exactly one filename");
        return ExitCode::FAILURE;
    };
    let Some((package, filename)) = input.split_once('/') else {
        eprintln!("input must be <package-dir>/<module>.ava: {input}");
        return ExitCode::FAILURE;
    };
    let Some(stem) = filename.strip_suffix(".ava") else {
        eprintln!("input must end in .ava: {input}");
        return ExitCode::FAILURE;
    };

    let mut env = CompEnv::new(format!("{package}:"));
    env.use_simple_source_reader(format!("{package}/"));

    let mut errors = ErrorList::new();
    let Some(pcode) = compile_module(&env, filename, &mut errors) else {
        eprintln!("compilation failed:");
        eprint!("{}", errors.to_diagnostic_string(DIAGNOSTIC_LINES, false));
        return ExitCode::from(65); // data error
    };

    write_object(&format!("{package}/{stem}.avam"), &pcode)
}

/// Reduces one object file to its interface.
fn make_interface_cmd(args: &[String], from_ext: &str, to_ext: &str) -> ExitCode {
    let [input] = args else {
        eprintln!("make-interface takes exactly one filename");
        return ExitCode::FAILURE;
    };
    let Some(stem) = input.strip_suffix(from_ext) else {
        eprintln!("input must end in {from_ext}: {input}");
        return ExitCode::FAILURE;
    };

    let Some(pcode) = read_object(input) else {
        return ExitCode::from(65);
    };
    write_object(&format!("{stem}{to_ext}"), &make_interface(&pcode))
}

/// Links inputs into one object: modules into a package, or packages into
/// an application.
fn link_cmd(args: &[String], from_ext: &str, to_ext: &str, as_packages: bool) -> ExitCode {
    let [output_stem, inputs @ ..] = args else {
        eprintln!("link takes an output name and at least one input");
        return ExitCode::FAILURE;
    };
    if inputs.is_empty() {
        eprintln!("link takes an output name and at least one input");
        return ExitCode::FAILURE;
    }

    let mut linker = Linker::new();
    for input in inputs {
        let Some(stem) = input.strip_suffix(from_ext) else {
            eprintln!("input must end in {from_ext}: {input}");
            return ExitCode::FAILURE;
        };
        let Some(pcode) = read_object(input) else {
            return ExitCode::from(65);
        };
        if as_packages {
            linker.add_package(stem, pcode);
        } else {
            linker.add_module(stem, pcode);
        }
    }

    let mut errors = ErrorList::new();
    let Some(linked) = linker.link(&mut errors) else {
        eprintln!("link failed:");
        eprint!("{}", errors.to_diagnostic_string(DIAGNOSTIC_LINES, false));
        return ExitCode::from(65);
    };

    write_object(&format!("{output_stem}{to_ext}"), &linked)
}

fn read_object(path: &str) -> Option<avalanche::PcodeObject> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read {path}: {err}");
            return None;
        }
    };
    match parse_object(&text) {
        Ok(pcode) => Some(pcode),
        Err(err) => {
            eprintln!("malformed P-Code in {path}: {err}");
            None
        }
    }
}

fn write_object(path: &str, pcode: &avalanche::PcodeObject) -> ExitCode {
    match fs::write(path, emit_object(pcode)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cannot write {path}: {err}");
            ExitCode::from(74) // I/O error
        }
    }
}
