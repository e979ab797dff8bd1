//! CLI: stdin JSON -> stdout JSON.
//!
//! Usage:
//!   echo '{"features":[[...],[...],[...]]}' | levelcast predict
//!   echo '{"windows":[[[...],[...],[...]], ...]}' | levelcast batch
//!   levelcast verify [--tolerance 1.0]
//!   levelcast convert model_state.json best_lstm_model.lcw
//!   levelcast features [name]
//!
//! `--config <path>` selects the TOML file (default ./levelcast.toml).
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::{env, process};

use levelcast_service::config::{DEFAULT_CONFIG_PATH, ServiceConfig};
use levelcast_service::logging::{self, Component};
use levelcast_service::{api, artifact, features, verify, InferenceEngine};

type CliResult = Result<(), Box<dyn std::error::Error>>;

struct Args {
    command: String,
    config: PathBuf,
    tolerance: f64,
    positional: Vec<String>,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut args = Args {
        command: "predict".to_string(),
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        tolerance: verify::DEFAULT_TOLERANCE,
        positional: Vec::new(),
    };
    let mut command = None;
    let mut iter = raw.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().ok_or("--config needs a path")?;
                args.config = PathBuf::from(value);
            }
            "--tolerance" => {
                let value = iter.next().ok_or("--tolerance needs a value")?;
                args.tolerance = value
                    .parse()
                    .map_err(|_| format!("invalid tolerance '{}'", value))?;
            }
            other if command.is_none() => command = Some(other.to_string()),
            other => args.positional.push(other.to_string()),
        }
    }

    if let Some(c) = command {
        args.command = c;
    }
    Ok(args)
}

fn load_engine(config: &ServiceConfig) -> InferenceEngine {
    match InferenceEngine::load(config) {
        Ok(engine) => engine,
        Err(e) => {
            logging::error(
                Component::System,
                None,
                &format!("refusing to serve without artifacts: {}", e),
            );
            process::exit(1);
        }
    }
}

fn read_stdin() -> io::Result<String> {
    let mut body = String::new();
    io::stdin().read_to_string(&mut body)?;
    Ok(body)
}

fn write_line(text: &str) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", text)
}

fn run_convert(config: &ServiceConfig, positional: &[String]) -> CliResult {
    let [source, target] = positional else {
        return Err("usage: levelcast convert <state_dict.json> <weights.lcw>".into());
    };
    let model = artifact::load_weights(Path::new(source), &config.architecture())?;
    artifact::write_native(&model, Path::new(target))?;
    logging::info(
        Component::Artifact,
        None,
        &format!("wrote {} ({} parameters)", target, config.architecture().parameter_count()),
    );
    Ok(())
}

fn print_feature(f: &features::FeatureSpec) {
    println!(
        "{}  {:<26} {:<9} {:<5} {}",
        f.index, f.name, f.station, f.unit, f.description
    );
}

fn run_features(positional: &[String]) -> CliResult {
    match positional {
        [] => features::FEATURE_LAYOUT.iter().for_each(print_feature),
        [name] => match features::find_feature(name) {
            Some(f) => print_feature(f),
            None => return Err(format!("unknown feature '{}'", name).into()),
        },
        _ => return Err("usage: levelcast features [name]".into()),
    }
    Ok(())
}

fn run(args: Args) -> CliResult {
    let config = ServiceConfig::load_with_env(&args.config)?;
    logging::init_logger(
        config.log_level()?,
        config.logging.file.as_deref(),
        config.logging.timestamps,
    );
    logging::info(
        Component::Config,
        Some(&args.config.display().to_string()),
        &format!(
            "weights {}, scalers {} / {}",
            config.artifacts.weights.display(),
            config.artifacts.feature_scaler.display(),
            config.artifacts.target_scaler.display()
        ),
    );
    logging::debug(Component::System, None, &format!("running '{}'", args.command));

    match args.command.as_str() {
        "predict" => {
            let engine = load_engine(&config);
            write_line(&api::respond_json(&engine, &read_stdin()?)?)?;
        }
        "batch" => {
            let engine = load_engine(&config);
            write_line(&api::respond_batch_json(&engine, &read_stdin()?)?)?;
        }
        "verify" => {
            let engine = load_engine(&config);
            let report = verify::run_reference_check(&engine, args.tolerance);
            verify::print_summary(&report);
            if !report.all_passed() {
                process::exit(2);
            }
        }
        "convert" => run_convert(&config, &args.positional)?,
        "features" => run_features(&args.positional)?,
        other => return Err(format!("unknown command '{}'", other).into()),
    }
    Ok(())
}

fn main() {
    let raw: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(64);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
