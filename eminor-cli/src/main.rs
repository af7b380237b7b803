use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use eminor_core::{compile, CompilationArtifact, Diagnostic, StarFile};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eminorc", version, about = "E-Minor compiler")]
struct Cli {
    /// Source file (.eminor)
    input: PathBuf,

    /// Output directory for the artifact set
    #[arg(short = 'o', long = "out-dir", default_value = "out")]
    out_dir: PathBuf,

    /// Skip writing the disassembly listing
    #[arg(long = "no-disasm")]
    no_disasm: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read input file {}", cli.input.display()))?;

    match compile(&source) {
        Ok(artifact) => {
            flush_diagnostics(&artifact.issues);
            write_artifacts(&cli, &artifact)
        }
        Err(failure) => {
            flush_diagnostics(&failure.issues);
            if !failure.issues.is_empty() {
                write_star_json(&cli.out_dir, &failure.issues)?;
            }
            Err(failure.into())
        }
    }
}

fn flush_diagnostics(issues: &[Diagnostic]) {
    for issue in issues {
        eprintln!("{}", issue.render());
    }
}

fn write_star_json(out_dir: &PathBuf, issues: &[Diagnostic]) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;
    let json = serde_json::to_string_pretty(&StarFile { issues })
        .context("failed to serialize star-code issues")?;
    let path = out_dir.join("a.star.json");
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_artifacts(cli: &Cli, artifact: &CompilationArtifact) -> Result<()> {
    fs::create_dir_all(&cli.out_dir).with_context(|| {
        format!("failed to create output directory {}", cli.out_dir.display())
    })?;

    write_file(&cli.out_dir.join("a.ir.bin"), &artifact.image)?;
    write_file(
        &cli.out_dir.join("a.text.hex"),
        format!("{}\n", artifact.hex_dump()).as_bytes(),
    )?;
    write_file(&cli.out_dir.join("a.rodata.bin"), &artifact.rodata)?;

    let symbols = serde_json::to_string_pretty(&artifact.symbols_file())
        .context("failed to serialize symbol table")?;
    write_file(&cli.out_dir.join("symbols.json"), symbols.as_bytes())?;

    if !artifact.issues.is_empty() {
        write_star_json(&cli.out_dir, &artifact.issues)?;
    }
    if !cli.no_disasm {
        write_file(
            &cli.out_dir.join("a.dis.txt"),
            artifact.disassembly().as_bytes(),
        )?;
    }

    info!("wrote {}", cli.out_dir.display());
    Ok(())
}

fn write_file(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run(source: &str, no_disasm: bool) -> (tempfile::TempDir, Result<()>) {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("input.eminor");
        fs::write(&input, source).expect("write input");
        let cli = Cli {
            input,
            out_dir: dir.path().join("out"),
            no_disasm,
        };
        let result = execute(cli);
        (dir, result)
    }

    #[test]
    fn writes_the_full_artifact_set() {
        let (dir, result) = run(
            "@main { #init $A0 #load $A0, 0xFF #call $render, $A0 #exit } \
             function $render($cap: capsule<u8>) { #render $cap }",
            false,
        );
        result.expect("cli should succeed");
        let out = dir.path().join("out");

        let image = fs::read(out.join("a.ir.bin")).expect("image readable");
        assert!(!image.is_empty());

        let hex = fs::read_to_string(out.join("a.text.hex")).expect("hex readable");
        let expected: Vec<String> = image.iter().map(|b| format!("{b:02X}")).collect();
        assert_eq!(hex.trim_end(), expected.join(" "));

        let symbols: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("symbols.json")).expect("symbols"))
                .expect("valid json");
        assert!(symbols["functions"]["$render"].is_number());

        let listing = fs::read_to_string(out.join("a.dis.txt")).expect("listing readable");
        assert!(listing.contains("CALL"));

        assert!(out.join("a.rodata.bin").exists());
        // No diagnostics, so no star report.
        assert!(!out.join("a.star.json").exists());
    }

    #[test]
    fn no_disasm_skips_the_listing() {
        let (dir, result) = run("@main { #exit }", true);
        result.expect("cli should succeed");
        let out = dir.path().join("out");
        assert!(out.join("a.ir.bin").exists());
        assert!(!out.join("a.dis.txt").exists());
    }

    #[test]
    fn warnings_still_compile_and_write_the_star_report() {
        let (dir, result) = run("@main { #sleep -5s #exit }", false);
        result.expect("cli should succeed");
        let out = dir.path().join("out");
        assert!(out.join("a.ir.bin").exists());
        let star: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("a.star.json")).expect("star"))
                .expect("valid json");
        assert_eq!(star["issues"][0]["code"], "SC020");
        assert_eq!(star["issues"][0]["severity"], "warning");
    }

    #[test]
    fn star_code_errors_fail_without_an_image() {
        let (dir, result) = run("@main { goto :missing #exit }", false);
        let err = result.expect_err("cli should fail");
        assert!(err.to_string().contains("star-code validation failed"));
        let out = dir.path().join("out");
        assert!(!out.join("a.ir.bin").exists());
        let star: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("a.star.json")).expect("star"))
                .expect("valid json");
        assert_eq!(star["issues"][0]["code"], "SC040");
    }

    #[test]
    fn unresolved_symbols_fail_with_the_symbol_name() {
        let (_dir, result) = run("@main { #call $render #exit }", false);
        let err = result.expect_err("cli should fail");
        assert!(err.to_string().contains("render"));
    }

    #[test]
    fn missing_input_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        let cli = Cli {
            input: dir.path().join("absent.eminor"),
            out_dir: dir.path().join("out"),
            no_disasm: false,
        };
        let err = execute(cli).expect_err("cli should fail");
        assert!(err.to_string().contains("failed to read input file"));
    }
}
