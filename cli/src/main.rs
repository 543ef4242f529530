//! The `waypoint` command line: run a script with handlers attached to its routines.
//!
//! ```text
//! waypoint run demo.wp --call f --arg 2 --at 'f:return' --inject 'x = 1'
//! waypoint run demo.wp --call f --arg 2 --triggers triggers.json
//! waypoint run demo.wp --call f --arg 2 --at 'f:<start>' --break
//! waypoint hash demo.wp f
//! ```
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod debug;
mod triggers;

use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use colored::Colorize;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use triggers::{Location, TriggerSpec};
use waypoint_engine::{Instrumenter, Value};
use waypoint_script::{Interpreter, Module};

use crate::debug::ConsoleDebugger;

/// Environment variable selecting the log level when no `-v` is given.
const LOG_ENV: &str = "WAYPOINT_LOG";

#[derive(Debug, Parser)]
#[command(author, version, about, name = "waypoint")]
struct Opt {
    /// Log more; repeat for more detail.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a script, attach handlers and call one of its routines.
    Run(RunArgs),
    /// Print the source digest of a routine, for use with `--source-hash`.
    Hash {
        /// The script file.
        script: PathBuf,
        /// Routine to digest; the module name digests the whole file.
        routine: String,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// The script file.
    script: PathBuf,

    /// Routine to call once the script is loaded.
    #[arg(long, value_name = "ROUTINE")]
    call: Option<String>,

    /// Argument passed to the called routine, as JSON.
    #[arg(long = "arg", value_name = "JSON")]
    args: Vec<String>,

    /// Where to attach: `routine:identifier`. `*` stands for every routine.
    #[arg(long, value_name = "ROUTINE:IDENTIFIER")]
    at: Vec<String>,

    /// Only fire when this expression is truthy in the frame.
    #[arg(long, requires = "at")]
    condition: Option<String>,

    /// Refuse to attach if the anchor's source digest differs.
    #[arg(long, requires = "at", value_name = "HEX")]
    source_hash: Option<String>,

    #[command(flatten)]
    action: ActionArgs,

    /// JSON file with more triggers.
    #[arg(long, value_name = "FILE")]
    triggers: Option<PathBuf>,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct ActionArgs {
    /// Run these statements in the frame.
    #[arg(long, requires = "at")]
    inject: Option<String>,

    /// Jump to this identifier.
    #[arg(long, requires = "at", value_name = "IDENTIFIER")]
    jump: Option<String>,

    /// Open the console debugger.
    #[arg(long = "break", requires = "at")]
    breakpoint: bool,
}

fn level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => env::var(LOG_ENV)
            .ok()
            .and_then(|level| level.parse().ok())
            .unwrap_or(LevelFilter::Warn),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn value_from_json(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN)), Value::Int),
        Json::String(s) => Value::from(s),
        Json::Array(items) => Value::List(items.into_iter().map(value_from_json).collect()),
        Json::Object(map) => Value::map(map.into_iter().map(|(k, v)| (k, value_from_json(v)))),
    }
}

fn load(interp: &Interpreter, path: &Path) -> Result<Arc<Module>> {
    let source = fs::read_to_string(path).wrap_err_with(|| format!("cannot read {}", path.display()))?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| eyre!("{} is not a valid module name", path.display()))?;
    Ok(interp.load(name, &source)?)
}

fn specs(args: &RunArgs) -> Result<Vec<TriggerSpec>> {
    let mut specs = Vec::new();
    for at in &args.at {
        let mut spec = TriggerSpec::from_flag(at)?;
        spec.condition.clone_from(&args.condition);
        spec.source_hash.clone_from(&args.source_hash);
        spec.inject.clone_from(&args.action.inject);
        spec.jump = args.action.jump.as_deref().map(Location::parse);
        spec.breakpoint = args.action.breakpoint;
        specs.push(spec);
    }
    if let Some(path) = &args.triggers {
        specs.extend(triggers::load(path)?);
    }
    Ok(specs)
}

fn run(args: &RunArgs) -> Result<()> {
    let interp = Interpreter::new();
    let module = load(&interp, &args.script)?;

    let call_args = args
        .args
        .iter()
        .map(|arg| {
            serde_json::from_str(arg)
                .map(value_from_json)
                .wrap_err_with(|| format!("argument `{arg}` is not valid JSON"))
        })
        .collect::<Result<Vec<_>>>()?;

    let specs = specs(args)?;
    let instrumenter = Instrumenter::builder()
        .debugger(Arc::new(ConsoleDebugger::default()))
        .build(interp.monitoring().clone())?;
    for spec in &specs {
        spec.attach(&instrumenter, &module)?;
    }

    let Some(routine) = &args.call else {
        if !specs.is_empty() {
            bail!("triggers were given but no routine to --call");
        }
        return Ok(());
    };

    let result = interp.call(&module, routine, call_args);
    instrumenter.clear_all()?;
    let value = result?;
    println!("{} {}", format!("{routine} returned").dimmed(), value.to_string().green());
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    SimpleLogger::new()
        .with_level(level(opt.verbose))
        .init()
        .wrap_err("cannot install the logger")?;

    match opt.command {
        Command::Run(args) => run(&args),
        Command::Hash { script, routine } => {
            let interp = Interpreter::new();
            let module = load(&interp, &script)?;
            println!("{}", triggers::digest(&module, &routine)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_arguments() {
        let value = value_from_json(serde_json::json!([1, 2.5, "a", null, { "k": true }]));
        assert_eq!(
            value,
            Value::List(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::from("a"),
                Value::None,
                Value::map([("k", Value::Bool(true))]),
            ])
        );
    }

    #[test]
    fn flags_build_one_spec_per_location() {
        let opt = Opt::parse_from([
            "waypoint", "run", "s.wp", "--call", "f", "--at", "f:return", "--at", "g:3", "--jump",
            "+2",
        ]);
        let Command::Run(args) = opt.command else {
            panic!("expected the run command");
        };
        let specs = specs(&args).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].routine, "g");
        assert!(specs.iter().all(|spec| spec.jump.is_some() && spec.inject.is_none()));
    }

    #[test]
    fn actions_are_exclusive() {
        let result = Opt::try_parse_from([
            "waypoint", "run", "s.wp", "--at", "f:1", "--inject", "x = 1", "--break",
        ]);
        assert!(result.is_err());
    }
}
