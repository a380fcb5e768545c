use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use pl0_core::codegen_wat::ENTRY_EXPORT;
use pl0_core::host::{HostKind, host_function};
use pl0_core::sources::load_sources;
use pl0_core::{
    CompileOptions, DebugConfig, DebugEvent, DebugSession, StageSet, TargetKind, compile, emit,
};
use wasmi::{Caller, Engine, Linker, Module, Store};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(version, about = "PL/0 compiler and debugger", long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        help = "Source file, or a directory whose .pl0 files are checked (stdin when absent)"
    )]
    input: Option<PathBuf>,

    #[arg(short, long, help = "Output file (stdout when absent)")]
    output: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "wat",
        help = "Output format: wat, script, report"
    )]
    emit: String,

    #[arg(
        long,
        value_name = "LIST",
        help = "Stages to include in a report, comma separated (default: all)"
    )]
    stages: Option<String>,

    #[arg(
        long,
        value_name = "KIND",
        default_value = "wat",
        help = "Target lowered to by the report's target stage: wat, script"
    )]
    target: TargetKind,

    #[arg(long, help = "Run the program if the output format is wat")]
    run: bool,

    #[arg(
        long,
        value_name = "VALUE",
        default_value_t = 1,
        allow_hyphen_values = true,
        help = "Value returned by every read"
    )]
    read_value: i32,

    #[arg(long, help = "Start a debug session and print each pause as JSON")]
    debug: bool,

    #[arg(long = "break", value_name = "LINE", help = "Breakpoint line (repeatable)")]
    breakpoints: Vec<usize>,

    #[arg(long, help = "Step line by line instead of running to breakpoints")]
    step: bool,

    #[arg(short, long, help = "Trace pipeline stages on stderr")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    pl0_core::log::set_verbose(cli.verbose);

    if let Some(path) = cli.input.as_deref().filter(|p| p.is_dir()) {
        return check_tree(path);
    }

    let source = match &cli.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    if cli.debug {
        return debug(&source, &cli);
    }

    match cli.emit.as_str() {
        "wat" => {
            let wat = emit(&source, TargetKind::StackModule)?;
            write_output(cli.output.as_deref(), wat.as_bytes())?;
            if cli.run {
                for value in run_wat(&wat, cli.read_value)? {
                    println!("{value}");
                }
            }
        }
        "script" => {
            let script = emit(&source, TargetKind::Script)?;
            write_output(cli.output.as_deref(), script.as_bytes())?;
            if cli.run {
                eprintln!("--run is ignored for non-wat outputs");
            }
        }
        "report" => {
            let stages = match &cli.stages {
                Some(list) => StageSet::parse(list).map_err(anyhow::Error::msg)?,
                None => StageSet::all(),
            };
            let options = CompileOptions {
                stages,
                target: cli.target,
            };
            let report = compile(&source, &options);
            let json = serde_json::to_string_pretty(&report)?;
            write_output(cli.output.as_deref(), json.as_bytes())?;
            if !report.succeeded() {
                bail!("one or more stages failed");
            }
        }
        other => bail!("unsupported emit format: {other}"),
    }

    Ok(())
}

/// Compiles every `.pl0` file under `root` and lists the failures.
fn check_tree(root: &Path) -> Result<()> {
    let files = load_sources(root)?;
    let mut failed = 0;
    for file in &files {
        let report = compile(&file.contents, &CompileOptions::default());
        if report.succeeded() {
            println!("{}: ok", file.path.display());
        } else {
            failed += 1;
            for (stage, diagnostic) in report.diagnostics() {
                println!("{}: {stage}: {diagnostic}", file.path.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} files failed to compile", files.len());
    }
    Ok(())
}

fn debug(source: &str, cli: &Cli) -> Result<()> {
    let config = DebugConfig {
        read_value: cli.read_value,
        ..DebugConfig::default()
    };
    let mut session = DebugSession::start(source, &cli.breakpoints, config)?;
    let mut lines = Vec::new();
    loop {
        let event = if cli.step {
            session.step_over()?
        } else {
            session.r#continue()?
        };
        lines.push(serde_json::to_string(&event)?);
        if matches!(event, DebugEvent::Finished(_)) {
            break;
        }
    }
    let mut text = lines.join("\n");
    text.push('\n');
    write_output(cli.output.as_deref(), text.as_bytes())
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    let Some(path) = path else {
        print!("{}", String::from_utf8_lossy(bytes));
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

struct HostState {
    read_value: i32,
    written: Vec<i32>,
}

/// Executes a stack module, returning the values it wrote.
fn run_wat(wat: &str, read_value: i32) -> Result<Vec<i32>> {
    let engine = Engine::default();
    let module = Module::new(&engine, wat.as_bytes()).context("failed to compile stack module")?;
    let mut linker = Linker::new(&engine);
    let read = host_function(HostKind::Read);
    let write = host_function(HostKind::Write);
    linker
        .func_wrap(read.module, read.name, |caller: Caller<'_, HostState>| -> i32 {
            caller.data().read_value
        })
        .context("failed to link read")?;
    linker
        .func_wrap(
            write.module,
            write.name,
            |mut caller: Caller<'_, HostState>, value: i32| {
                caller.data_mut().written.push(value);
            },
        )
        .context("failed to link write")?;
    let mut store = Store::new(
        &engine,
        HostState {
            read_value,
            written: Vec::new(),
        },
    );
    let instance = linker
        .instantiate_and_start(&mut store, &module)
        .context("failed to instantiate module")?;
    let main = instance
        .get_typed_func::<(), ()>(&store, ENTRY_EXPORT)
        .context("exported main function missing or has wrong type")?;
    main.call(&mut store, ()).context("failed to execute main")?;
    Ok(store.into_data().written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn compiles_and_runs_wat() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.pl0");
        fs::write(&input_path, "var x;\nx := 6 * 7;\nwrite x;").expect("write input");
        let output_path = dir.path().join("out.wat");

        Command::cargo_bin("pl0-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--run")
            .assert()
            .success()
            .stdout(predicate::str::contains("42"));

        let wat = fs::read_to_string(&output_path).expect("read wat");
        assert!(wat.contains("(func $__main (export \"main\")"));
    }

    #[test]
    fn feeds_read_value_to_the_program() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.pl0");
        fs::write(&input_path, "var a;\nread a;\nwrite a * 2;").expect("write input");

        Command::cargo_bin("pl0-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(dir.path().join("out.wat"))
            .arg("--run")
            .arg("--read-value")
            .arg("21")
            .assert()
            .success()
            .stdout(predicate::str::contains("42"));
    }

    #[test]
    fn emits_script_to_stdout() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.pl0");
        fs::write(&input_path, "var x;\nx := 1;").expect("write input");

        Command::cargo_bin("pl0-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--emit")
            .arg("script")
            .assert()
            .success()
            .stdout(predicate::str::contains("function main() {"))
            .stdout(predicate::str::contains("x = 1; // 2"));
    }

    #[test]
    fn report_surfaces_stage_diagnostics() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.pl0");
        fs::write(&input_path, "const a = 1;\nconst a = 2;").expect("write input");

        Command::cargo_bin("pl0-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--emit")
            .arg("report")
            .arg("--stages")
            .arg("syntax,semantic")
            .assert()
            .failure()
            .stdout(predicate::str::contains("\"status\": \"failed\""))
            .stdout(predicate::str::contains("already declared"));
    }

    #[test]
    fn debug_session_prints_pauses() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.pl0");
        fs::write(&input_path, "var x;\nx := 0;\nx := x + 1;\nx := x + 1;").expect("write input");

        Command::cargo_bin("pl0-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--debug")
            .arg("--break")
            .arg("4")
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#"{"event":"paused","variables":[{"name":"x","value":1,"type":"variable","scope":"global"}],"sourceLine":4,"output":[]}"#,
            ))
            .stdout(predicate::str::contains(r#""event":"finished""#));
    }

    #[test]
    fn checks_every_file_in_a_directory() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("good.pl0"), "var x; x := 1;").expect("write good");
        fs::write(dir.path().join("bad.pl0"), "x := 1;").expect("write bad");

        Command::cargo_bin("pl0-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(dir.path())
            .assert()
            .failure()
            .stdout(predicate::str::contains("good.pl0: ok"))
            .stdout(predicate::str::contains("bad.pl0: semantic:"))
            .stderr(predicate::str::contains("1 of 2 files failed"));
    }

    #[test]
    fn reports_missing_input_file() {
        Command::cargo_bin("pl0-cli")
            .expect("binary exists")
            .arg("--input")
            .arg("./path/that/does/not/exist.pl0")
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to read input file"));
    }
}
