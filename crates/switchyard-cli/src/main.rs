//! `switchyard` – run a bridge from a configuration file.
//!
//! ```text
//! switchyard [CONFIG] [--print-schema]
//! ```
//!
//! 1. Initialises logging (and OTLP span export when configured).
//! 2. Loads `CONFIG`, or `$SWITCHYARD_CONFIG` when no path is given.
//! 3. Builds every system from the plugin registry and wires all routes;
//!    on failure every setup error is printed and the process exits non-zero.
//! 4. Runs the scheduler until Ctrl-C or until every system has stopped,
//!    then prints per-route traffic counters.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use switchyard_kernel::Bridge;
use switchyard_middleware::{LoopbackBus, LoopbackSystem, PluginRegistry};
use switchyard_types::BridgeError;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return ExitCode::SUCCESS;
    }
    if args.iter().any(|a| a == "--print-schema") {
        return match config::schema_json() {
            Ok(schema) => {
                println!("{schema}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {e}", "Schema error".red());
                ExitCode::FAILURE
            }
        };
    }

    let _telemetry = telemetry::init_tracing("switchyard");
    print_banner();

    let positional = args.iter().find(|a| !a.starts_with("--")).map(String::as_str);
    let Some(path) = config::resolve_path(positional) else {
        eprintln!(
            "{} no configuration given (pass a path or set {})",
            "error:".red().bold(),
            config::CONFIG_ENV
        );
        print_usage();
        return ExitCode::from(2);
    };

    let cfg = match config::load_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };
    println!("  Config loaded from {}", path.display().to_string().bold());

    let plugins = match plugin_registry() {
        Ok(plugins) => plugins,
        Err(e) => {
            eprintln!("{}: {e}", "Plugin error".red());
            return ExitCode::FAILURE;
        }
    };

    let mut bridge = match Bridge::build(&cfg, &plugins) {
        Ok(bridge) => bridge,
        Err(e) => {
            report_setup_failure(e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  {} {} system(s), {} topic(s), {} service(s)\n",
        "✓".green().bold(),
        cfg.systems.len(),
        cfg.topics.len(),
        cfg.services.len()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the bridge …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process another way");
    }

    bridge.run(&shutdown);
    info!("bridge stopped");
    print_summary(&bridge);
    println!("{}", "  ✓ Bridge stopped.".green());
    ExitCode::SUCCESS
}

/// Backends compiled into this binary.
fn plugin_registry() -> Result<PluginRegistry, BridgeError> {
    let mut plugins = PluginRegistry::new();
    // Each loopback system gets a private bus; systems sharing one would
    // feed their own publications back into each other.  Traffic comes from
    // the `emit` and `echo` options.
    plugins.register("loopback", || Box::new(LoopbackSystem::new(LoopbackBus::default())))?;
    Ok(plugins)
}

fn report_setup_failure(err: BridgeError) {
    let errors = err.into_errors();
    eprintln!(
        "\n  {} bridge setup failed with {} error(s):",
        "✗".red().bold(),
        errors.len()
    );
    for e in &errors {
        error!(error = %e, "bridge setup failed");
        eprintln!("    {} {e}", "•".red());
    }
    eprintln!();
}

fn print_summary(bridge: &Bridge) {
    println!();
    for (label, stats) in bridge.topic_routes() {
        println!(
            "  {} {}  forwarded {}  failed {}  dropped {}",
            "•".cyan(),
            label.bold(),
            stats.forwarded(),
            stats.failed(),
            stats.dropped()
        );
    }
    for (label, stats) in bridge.service_routes() {
        println!(
            "  {} {}  requests {}  responses {}  rejected {}  unknown {}",
            "•".cyan(),
            label.bold(),
            stats.requests(),
            stats.responses(),
            stats.rejected(),
            stats.unknown()
        );
    }
}

fn print_usage() {
    println!("Usage: switchyard [CONFIG] [--print-schema]");
    println!();
    println!("  CONFIG          bridge configuration (TOML); defaults to ${}", config::CONFIG_ENV);
    println!("  --print-schema  print the configuration JSON Schema and exit");
}

fn print_banner() {
    println!();
    println!("{}", r#"  ____          _ _       _                       _ "#.bold().cyan());
    println!("{}", r#" / ___|_      _(_) |_ ___| |__  _   _  __ _ _ __ __| |"#.bold().cyan());
    println!("{}", r#" \___ \ \ /\ / / | __/ __| '_ \| | | |/ _` | '__/ _` |"#.bold().cyan());
    println!("{}", r#"  ___) \ V  V /| | || (__| | | | |_| | (_| | | | (_| |"#.bold().cyan());
    println!("{}", r#" |____/ \_/\_/ |_|\__\___|_| |_|\__, |\__,_|_|  \__,_|"#.bold().cyan());
    println!("{}", r#"                                |___/                 "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Switchyard".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Middleware bridge");
    println!();
}
