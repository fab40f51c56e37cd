use clap::{Arg, ArgAction, Command};
use std::fs;
use std::path::Path;
use std::time::Instant;
use template_compiler::{
    CodegenBackend, MarkupCompiler, ScriptIdentity, SourceIdentifier, TemplateCompiler,
    UnitSourceBackend,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "template_compiler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let phase_start = Instant::now();
    let exit_code = run();
    info!(
        "template-compiler finished in {} ms",
        phase_start.elapsed().as_millis()
    );
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let matches = Command::new("template-compiler")
        .about("Compiles a template into unit source")
        .arg(
            Arg::new("source")
                .help("Template file to compile")
                .required(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .help("Script name used for diagnostics and unit naming (default: the file path)")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .help("Package prefix for generated units")
                .default_value("render_units")
                .value_name("PREFIX"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("out")
                .help("Write unit source to this file instead of stdout")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress warnings")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let source_path = match matches.get_one::<String>("source") {
        Some(path) => path.clone(),
        None => return 1,
    };
    let script_name = matches
        .get_one::<String>("name")
        .cloned()
        .unwrap_or_else(|| source_path.clone());
    let prefix = matches
        .get_one::<String>("prefix")
        .cloned()
        .unwrap_or_default();

    let mut file = match fs::File::open(&source_path) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to read {}: {}", source_path, e);
            return 1;
        }
    };

    let identity = ScriptIdentity::new(script_name);
    let mut backend = UnitSourceBackend::default();
    let result = MarkupCompiler::new().compile(&identity, &mut file, &mut backend);

    if !matches.get_flag("quiet") {
        for warning in &result.warnings {
            warn!("Script {}", warning);
        }
    }
    if !result.is_success() {
        for diagnostic in &result.errors {
            error!("Script {}", diagnostic);
        }
        return 1;
    }

    let source_id = SourceIdentifier::new(&prefix, &identity);
    let unit_source = match backend.build(&source_id) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to build unit source: {}", e);
            return 1;
        }
    };

    match matches.get_one::<String>("output") {
        Some(out) => {
            if let Some(parent) = Path::new(out).parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    error!("Failed to create output directory: {}", e);
                    return 1;
                }
            }
            if let Err(e) = fs::write(out, unit_source) {
                error!("Failed to write output: {}", e);
                return 1;
            }
            info!("Emitted unit {} -> {}", source_id.fully_qualified_name(), out);
        }
        None => println!("{}", unit_source),
    }
    0
}
