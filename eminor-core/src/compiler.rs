//! Pipeline orchestration: source text in, linked artifact out.
//!
//! Each stage runs to completion on the previous stage's artifact and owns
//! its working state while it runs; the byte buffer is handed from the
//! emitter to the optimizer to the linker, never shared.

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::diagnostic::Diagnostic;
use crate::disasm::disassemble;
use crate::emitter::{emit, PoolEntry};
use crate::error::CoreError;
use crate::linker::link;
use crate::parser::parse;
use crate::peephole::optimize;
use crate::starcheck::validate;

#[derive(Debug)]
pub struct CompilationArtifact {
    /// The linked byte image.
    pub image: Vec<u8>,
    /// String-pool bytes, NUL-terminated entries in intern order.
    pub rodata: Vec<u8>,
    /// Function symbols in declaration order, by unsigilled name.
    pub functions: IndexMap<String, u32>,
    /// The constant pool, in kidx order.
    pub constants: Vec<PoolEntry>,
    /// Star-Code warnings (errors abort compilation instead).
    pub issues: Vec<Diagnostic>,
}

/// `symbols.json` payload: `{"functions": {"$name": offset, ...}}`.
#[derive(Debug, Serialize)]
pub struct SymbolsFile {
    pub functions: IndexMap<String, u32>,
}

/// `a.star.json` payload: `{"issues": [...]}`.
#[derive(Debug, Serialize)]
pub struct StarFile<'a> {
    pub issues: &'a [Diagnostic],
}

impl CompilationArtifact {
    pub fn symbols_file(&self) -> SymbolsFile {
        SymbolsFile {
            functions: self
                .functions
                .iter()
                .map(|(name, offset)| (format!("${name}"), *offset))
                .collect(),
        }
    }

    /// Space-separated uppercase hex dump of the image.
    pub fn hex_dump(&self) -> String {
        self.image
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn disassembly(&self) -> String {
        disassemble(&self.image)
    }
}

/// A pipeline abort plus every diagnostic accumulated before it, so the
/// caller can still flush pending warnings.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CompileFailure {
    pub error: CoreError,
    pub issues: Vec<Diagnostic>,
}

impl From<CoreError> for CompileFailure {
    fn from(error: CoreError) -> Self {
        CompileFailure {
            error,
            issues: Vec::new(),
        }
    }
}

/// Run the whole pipeline. Aborts on the first fatal error of any kind;
/// accumulated warnings ride along in the artifact or in the failure.
pub fn compile(source: &str) -> Result<CompilationArtifact, CompileFailure> {
    let program = parse(source)?;
    debug!(items = program.items.len(), "parsed program");

    let issues = validate(&program);
    let errors = issues.iter().filter(|issue| issue.is_error()).count();
    if errors > 0 {
        return Err(CompileFailure {
            error: CoreError::StarCode { errors },
            issues,
        });
    }
    debug!(warnings = issues.len(), "star-code validation passed");

    let mut unit = emit(&program).map_err(|error| CompileFailure {
        error,
        issues: issues.clone(),
    })?;
    debug!(bytes = unit.text.len(), relocs = unit.relocs.len(), "emitted");

    optimize(&mut unit);
    debug!(bytes = unit.text.len(), "optimized");

    let linked = link(unit).map_err(|error| CompileFailure {
        error,
        issues: issues.clone(),
    })?;
    debug!(functions = linked.functions.len(), "linked");

    Ok(CompilationArtifact {
        image: linked.text,
        constants: linked.pool.entries().to_vec(),
        rodata: linked.pool.into_rodata(),
        functions: linked.functions,
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::*;

    const RENDER_DEF: &str = " function $render($cap: capsule<u8>) { #render $cap }";

    #[test]
    fn compiles_init_load_call_exit_byte_layout() {
        let src = format!(
            "@main {{ #init $A0 #load $A0, 0xFF #call $render, $A0 #exit }}{RENDER_DEF}"
        );
        let artifact = compile(&src).expect("compile should succeed");
        let image = &artifact.image;
        assert_eq!(image[0], OP_INIT);
        assert_eq!(read_u32le(image, 1), 0xA0);
        assert_eq!(image[5], OP_PUSHK);
        assert_eq!(read_u32le(image, 6), 0, "0xFF interns as kidx 0");
        assert_eq!(artifact.constants[0], PoolEntry::Hex(0xFF));
        assert_eq!(image[10], OP_LOAD);
        assert_eq!(read_u32le(image, 11), 0xA0);
        assert_eq!(image[15], OP_CALL);
        assert_eq!(read_u32le(image, 16), artifact.functions["render"]);
        assert_eq!(image[20], OP_EXIT);
    }

    #[test]
    fn undefined_call_target_is_a_link_error() {
        let err = compile("@main { #call $render #exit }").unwrap_err();
        assert!(matches!(
            err.error,
            CoreError::UnresolvedSymbol { symbol, .. } if symbol == "render"
        ));
        assert!(err.issues.is_empty());
    }

    #[test]
    fn shortcode_and_long_form_compile_to_identical_artifacts() {
        let short = format!(
            "@main {{ #init $A0 #load $A0, 0xFF #call $render, $A0 #exit }}{RENDER_DEF}"
        );
        let long = format!(
            "@entry_point {{ initialize capsule $A0 \
             assign value 0xFF to capsule $A0 \
             invoke function $render with capsule $A0 \
             terminate execution }}{RENDER_DEF}"
        );
        let a = compile(&short).expect("short form");
        let b = compile(&long).expect("long form");
        assert_eq!(a.image, b.image);
        assert_eq!(a.rodata, b.rodata);
        assert_eq!(a.functions, b.functions);
        assert_eq!(a.constants, b.constants);
    }

    #[test]
    fn session_key_scenario_populates_rodata_and_pool() {
        let artifact = compile(
            "@main { #init $K0 #load $K0, \"session-key\" #stamp $K0, true #expire $K0, 5m #exit }",
        )
        .expect("compile");
        assert_eq!(&artifact.rodata[..12], b"session-key\0");
        assert!(artifact
            .constants
            .contains(&PoolEntry::Duration(300_000_000_000)));
    }

    #[test]
    fn goto_to_missing_label_aborts_with_sc040() {
        let err = compile("@main { goto :missing #exit }").unwrap_err();
        assert!(matches!(err.error, CoreError::StarCode { errors: 1 }));
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].code, "SC040");
    }

    #[test]
    fn non_bool_condition_warns_but_compiles() {
        let artifact = compile("@main { #if (1) { #exit } #endif }").expect("compile");
        let codes: Vec<_> = artifact.issues.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["SC030"]);
        // PUSHK@0, JZ@5: the resolved target is the offset just past the
        // then-block's EXIT.
        assert_eq!(artifact.image[5], OP_JZ);
        assert_eq!(read_u32le(&artifact.image, 6), 11);
    }

    #[test]
    fn double_lease_aborts_with_one_sc010() {
        let err = compile("@main { #init $A0 #lease $A0 #lease $A0 #exit }").unwrap_err();
        let errors: Vec<_> = err.issues.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "SC010");
    }

    #[test]
    fn negative_sleep_warns_and_still_compiles() {
        let artifact = compile("@main { #sleep -5s #exit }").expect("compile");
        let codes: Vec<_> = artifact.issues.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["SC020"]);
        assert_eq!(artifact.image[0], OP_SLEEP);
    }

    #[test]
    fn constant_expressions_fold_in_the_final_image() {
        let artifact = compile("@main { #load $A0, 2 + 3 * 4 #exit }").expect("compile");
        assert_eq!(artifact.image[0], OP_PUSHK);
        let kidx = read_u32le(&artifact.image, 1) as usize;
        assert_eq!(artifact.constants[kidx], PoolEntry::Int(14));
        assert_eq!(artifact.image[5], OP_LOAD);
    }

    #[test]
    fn compilation_is_deterministic() {
        let src = "@main { #init $A0 #loop ($A0 < 3) { #load $A0, 1 + 2 #send $C0, $P0 } \
                   #call $f #exit } function $f() { print 1, \"x\" ; } let $C0 : u32 ; let $P0 : u32 ;";
        let a = compile(src).expect("first compile");
        let b = compile(src).expect("second compile");
        assert_eq!(a.image, b.image);
        assert_eq!(a.rodata, b.rodata);
        assert_eq!(a.constants, b.constants);
        assert_eq!(a.functions, b.functions);
    }

    #[test]
    fn linked_images_contain_no_orphan_sentinels() {
        let src = "@main { #loop (1 == 1) { #break } #if (true) { #call $f } #else { #yield } #endif \
                   goto :end :end #exit } function $f() { #yield }";
        let artifact = compile(src).expect("compile");
        assert!(
            !artifact.image.windows(4).any(|w| w == [0xFF; 4]),
            "sentinel word survived linking"
        );
    }

    #[test]
    fn symbols_file_carries_sigilled_names_in_declaration_order() {
        let artifact = compile("@main { #exit } function $b() { #yield } function $a() { #yield }")
            .expect("compile");
        let symbols = artifact.symbols_file();
        let names: Vec<_> = symbols.functions.keys().cloned().collect();
        assert_eq!(names, vec!["$b", "$a"]);
        let json = serde_json::to_value(&symbols).expect("serialize");
        assert!(json["functions"]["$b"].is_number());
    }

    #[test]
    fn hex_dump_is_uppercase_and_space_separated() {
        let artifact = compile("@main { #exit }").expect("compile");
        // EXIT, safety EXIT, END
        assert_eq!(artifact.hex_dump(), "07 07 FF");
    }

    #[test]
    fn disassembly_round_trips_equal_images() {
        let src = "@main { #init $A0 #load $A0, 1 #exit }";
        let a = compile(src).expect("compile");
        let b = compile(src).expect("compile");
        assert_eq!(a.disassembly(), b.disassembly());
        assert!(a.disassembly().contains("INIT 160"));
    }
}
