use clap::{Arg, ArgAction, ArgMatches, Command};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use render_bridge::{
    Bindings, EngineConfig, EngineError, EngineParts, RenderContext, RenderError,
    RequestAttributes, ScriptContext, ScriptEngine, ScriptSource, Value,
};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "render_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let matches = cli().get_matches();
    let phase_start = Instant::now();
    let exit_code = match matches.subcommand() {
        Some(("render", args)) => run(args, Mode::Render),
        Some(("inspect", args)) => run(args, Mode::Inspect),
        _ => 1,
    };
    info!(
        "render-bridge finished in {} ms",
        phase_start.elapsed().as_millis()
    );
    std::process::exit(exit_code);
}

#[derive(Clone, Copy)]
enum Mode {
    Render,
    Inspect,
}

fn script_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("template")
                .help("Template file")
                .required(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Engine configuration (JSON)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("bindings")
                .long("bindings")
                .help("Bindings for the render (JSON object)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("search-path")
                .long("search-path")
                .help("Script search path; replaces the configured ones")
                .value_name("PATH")
                .action(ArgAction::Append),
        )
}

fn cli() -> Command {
    Command::new("render-bridge")
        .about("Compiles and renders templates")
        .subcommand_required(true)
        .subcommand(script_args(
            Command::new("render").about("Render a template to stdout"),
        ))
        .subcommand(script_args(
            Command::new("inspect").about("Print the unit source generated for a template"),
        ))
}

fn run(args: &ArgMatches, mode: Mode) -> i32 {
    match execute(args, mode) {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            for diagnostic in e.diagnostics() {
                error!("Script {}", diagnostic);
            }
            error!("{}", e);
            1
        }
    }
}

fn execute(args: &ArgMatches, mode: Mode) -> render_bridge::Result<String> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(paths) = args.get_many::<String>("search-path") {
        config.search_paths = paths.cloned().collect();
    }

    let template_path = args
        .get_one::<String>("template")
        .ok_or_else(|| EngineError::Config("missing template".to_string()))?;
    let template = fs::read_to_string(template_path)?;

    let bindings = match args.get_one::<String>("bindings") {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| EngineError::Config(format!("{}: {}", path, e)))?;
            Bindings::from_json(json)?
        }
        None => Bindings::new(),
    };

    let engine = ScriptEngine::new(EngineParts::new(config));
    register_cli_extensions(&engine);

    let source = ScriptSource::named(template_path, &template);
    let context = ScriptContext::new(bindings).with_request(Arc::new(RequestAttributes::new()));
    match mode {
        Mode::Render => engine.eval(&source, &context),
        Mode::Inspect => engine.generate(&source, Some(&context)),
    }
}

fn register_cli_extensions(engine: &ScriptEngine) {
    let extensions = engine.extensions();
    extensions.register(
        "upper",
        |_: &RenderContext, args: &[Value]| -> Result<Value, RenderError> {
            Ok(Value::Str(first_arg(args).to_uppercase()))
        },
    );
    extensions.register(
        "lower",
        |_: &RenderContext, args: &[Value]| -> Result<Value, RenderError> {
            Ok(Value::Str(first_arg(args).to_lowercase()))
        },
    );
    extensions.register(
        "join",
        |ctx: &RenderContext, args: &[Value]| -> Result<Value, RenderError> {
            let om = ctx.object_model();
            let items = args.first().map(|v| om.to_collection(v)).unwrap_or_default();
            let separator = args.get(1).map(|v| om.to_string(v)).unwrap_or_default();
            let parts: Vec<String> = items.iter().map(|v| om.to_string(v)).collect();
            Ok(Value::Str(parts.join(&separator)))
        },
    );
}

fn first_arg(args: &[Value]) -> String {
    args.first().map(|v| v.to_string()).unwrap_or_default()
}
