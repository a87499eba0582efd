//! Nodehost command-line entry point.
//!
//! Loads a declaration, optionally dispatches one request and prints the JSON
//! response, optionally keeps watching the declaration until Ctrl-C.

use clap::Parser;
use nodehost_core::kernel::DeclarationWatcher;
use nodehost_core::{CallerContext, Config, Kernel, Request};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "nodehost", version, about = "Load and serve a nodehost declaration")]
struct Args {
    /// Declaration document (JSON).
    #[arg(long, env = "NODEHOST_DECLARATION")]
    declaration: PathBuf,

    /// Kernel configuration (TOML).
    #[arg(long, env = "NODEHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Request path to dispatch after loading.
    #[arg(long)]
    path: Option<String>,

    /// Action to invoke at `--path`.
    #[arg(long, requires = "path")]
    action: Option<String>,

    /// List to fetch at `--path`.
    #[arg(long, requires = "path", conflicts_with = "action")]
    list: Option<String>,

    /// Request parameter, `key=value`. Repeatable.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Caller credential. Repeatable.
    #[arg(long = "credential")]
    credentials: Vec<String>,

    /// Keep running and reload when the declaration changes.
    #[arg(long)]
    watch: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    nodehost_core::observability::init_tracing_with(&config.observability);

    let kernel = Arc::new(Kernel::new(config));
    let report = kernel.load_path(&args.declaration)?;
    for error in &report.errors {
        tracing::error!(node = %error.node, code = %error.code, "{}", error.message);
    }
    tracing::info!(
        declaration = %args.declaration.display(),
        created = report.created.len(),
        errors = report.errors.len(),
        "declaration_loaded"
    );

    if let Some(path) = &args.path {
        let mut request = Request::new(path.clone());
        request.action = args.action.clone();
        request.list = args.list.clone();
        request.query = args.params.clone();

        let mut caller = CallerContext::anonymous().with_principal("cli");
        caller.credentials.grant_many(&args.credentials);

        let response = kernel.handle_async(request, caller).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        if !response.output.is_empty() {
            println!("{}", String::from_utf8_lossy(&response.output));
        }
    }

    if args.watch {
        let mut watcher = DeclarationWatcher::new(kernel.clone(), args.declaration.clone());
        let handle = watcher.start();
        tokio::signal::ctrl_c().await?;
        watcher.stop();
        handle.await?;
    }

    kernel.shutdown();
    Ok(())
}
