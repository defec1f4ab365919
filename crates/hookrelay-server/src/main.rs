use std::env;
use std::fmt;
use std::process::ExitCode;

use hookrelay_server::config::loader::load_config;
use hookrelay_server::{ServerBuilder, metrics, observability};

const CONFIG_ENV: &str = "HOOKRELAY_CONFIG";
const DEFAULT_CONFIG: &str = "hookrelay.toml";

/// Where the config path came from, for the startup log line.
#[derive(Debug, Clone, Copy)]
enum ConfigOrigin {
    Flag,
    Env,
    Default,
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flag => "--config",
            Self::Env => CONFIG_ENV,
            Self::Default => "default",
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional; anything else wrong with it is worth a warning.
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: failed to load .env: {e}");
    }

    observability::init_tracing();

    let (path, origin) = config_path(env::args().skip(1));
    let cfg = match load_config(Some(&path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(2);
        }
    };
    observability::apply_logging_level(&cfg.logging.level);
    tracing::info!(
        %path,
        %origin,
        backend = ?cfg.storage.backend,
        workers = cfg.delivery.workers,
        "Configuration loaded"
    );

    metrics::init_metrics();

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Startup failed: {e:#}");
            return ExitCode::from(2);
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `--config <path>` first, then `HOOKRELAY_CONFIG`, then `hookrelay.toml`.
fn config_path(mut args: impl Iterator<Item = String>) -> (String, ConfigOrigin) {
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return (path.to_string(), ConfigOrigin::Flag);
        }
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigOrigin::Flag);
        }
    }

    match env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => (path, ConfigOrigin::Env),
        _ => (DEFAULT_CONFIG.to_string(), ConfigOrigin::Default),
    }
}
