//! OData CLI
//!
//! Command-line front end for the request pipeline:
//! - `serve`: HTTP/1 server over an in-memory store
//! - `parse`: resolve a request URI against a model and dump the descriptor
//! - `metadata`: print the CSDL document of a model
//! - `request`: push one request through the pipeline without a socket

use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use odata_edm::{demo_model, EntityDataModel, EntityDataModelBuilder, ModelDocument};
use odata_service::render::metadata::render_metadata;
use odata_service::{Method, ODataRequest, ODataService, ServiceConfig};
use odata_uri::{UriParser, UriParserConfig};
use tracing_subscriber::EnvFilter;

mod server;
mod store;

use store::{seed_demo, MemoryStore};

#[derive(Parser)]
#[command(name = "odata")]
#[command(author, version, about = "OData request pipeline: serve and inspect entity data models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the model over HTTP, backed by an in-memory store.
    Serve(ServeArgs),

    /// Parse a request URI against the model and print the result as JSON.
    Parse {
        /// Request target, e.g. `/odata.svc/Customers?$top=2`.
        uri: String,
        #[command(flatten)]
        service: ServiceArgs,
    },

    /// Print the CSDL metadata document of the model.
    Metadata {
        /// JSON model document; the built-in demo model when omitted.
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Run a single request against the seeded in-memory store and print
    /// the response.
    Request(RequestArgs),
}

/// Model and service settings shared by the commands that build a service.
#[derive(Args, Debug, Clone)]
struct ServiceArgs {
    /// JSON model document; the built-in demo model when omitted.
    #[arg(long)]
    model: Option<PathBuf>,

    /// JSON service configuration file. Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Absolute service root URL.
    #[arg(long)]
    service_root: Option<String>,

    /// Largest `$top` a client may ask for.
    #[arg(long)]
    max_top: Option<u64>,

    /// Stream finite collections as well as lazy ones.
    #[arg(long)]
    stream_collections: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    #[command(flatten)]
    service: ServiceArgs,

    /// Start with an empty store instead of the demo data.
    #[arg(long)]
    no_seed: bool,

    /// Write `{"addr", "pid"}` here once the listener is bound.
    #[arg(long)]
    ready_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// GET, POST, PUT, PATCH or DELETE.
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request target, e.g. `/odata.svc/Customers(1)`.
    target: String,

    #[arg(long)]
    accept: Option<String>,

    #[arg(long)]
    content_type: Option<String>,

    /// Request body; `@path` reads it from a file.
    #[arg(long)]
    data: Option<String>,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => cmd_serve(args),
        Commands::Parse { uri, service } => cmd_parse(&uri, &service),
        Commands::Metadata { model } => cmd_metadata(model.as_deref()),
        Commands::Request(args) => cmd_request(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so command output stays pipeable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

// ============================================================================
// Loading
// ============================================================================

fn load_model(path: Option<&Path>) -> Result<Arc<EntityDataModel>> {
    let model = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read model {}: {e}", path.display()))?;
            let document: ModelDocument = serde_json::from_str(&text)
                .map_err(|e| anyhow!("invalid model document {}: {e}", path.display()))?;
            EntityDataModelBuilder::from_document(document)
                .build()
                .map_err(|e| anyhow!("invalid model {}: {e}", path.display()))?
        }
        None => demo_model().map_err(|e| anyhow!("demo model: {e}"))?,
    };
    Ok(Arc::new(model))
}

fn load_config(args: &ServiceArgs) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read config {}: {e}", path.display()))?;
            serde_json::from_str(&text)
                .map_err(|e| anyhow!("invalid config {}: {e}", path.display()))?
        }
        None => ServiceConfig::default(),
    };
    if let Some(root) = &args.service_root {
        config.service_root = root.clone();
    }
    if args.max_top.is_some() {
        config.max_top = args.max_top;
    }
    if args.stream_collections {
        config.stream_collections = true;
    }
    Ok(config)
}

fn build_service(args: &ServiceArgs, seed: bool) -> Result<ODataService<MemoryStore>> {
    let model = load_model(args.model.as_deref())?;
    let config = load_config(args)?;
    let store = MemoryStore::new(Arc::clone(&model));
    if seed {
        seed_demo(&store).map_err(|e| anyhow!("seeding demo data failed: {e}"))?;
    }
    Ok(ODataService::new(model, store).with_config(config))
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_serve(args: ServeArgs) -> Result<()> {
    let service = build_service(&args.service, !args.no_seed)?;
    server::run_serve(
        server::ServerConfig {
            listen: args.listen,
            ready_file: args.ready_file,
        },
        service,
    )
}

fn cmd_parse(uri: &str, args: &ServiceArgs) -> Result<()> {
    let model = load_model(args.model.as_deref())?;
    let config = load_config(args)?;
    let parser = UriParser::with_config(
        &model,
        UriParserConfig {
            root_path: Some(config.root_path()),
            max_top: config.max_top,
        },
    );
    let parsed = parser.parse(uri)?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

fn cmd_metadata(model: Option<&Path>) -> Result<()> {
    let model = load_model(model)?;
    let document = render_metadata(&model)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&document)?;
    writeln!(stdout)?;
    Ok(())
}

fn cmd_request(args: RequestArgs) -> Result<()> {
    let method =
        Method::parse(&args.method).ok_or_else(|| anyhow!("unsupported method `{}`", args.method))?;
    let service = build_service(&args.service, true)?;

    let mut request = ODataRequest::new(method, args.target);
    if let Some(accept) = args.accept {
        request = request.with_header("Accept", accept);
    }
    if let Some(content_type) = args.content_type {
        request = request.with_header("Content-Type", content_type);
    }
    if let Some(data) = args.data {
        let body = match data.strip_prefix('@') {
            Some(path) => fs::read(path).map_err(|e| anyhow!("failed to read body {path}: {e}"))?,
            None => data.into_bytes(),
        };
        request = request.with_body(body);
    }

    let response = service.handle(&request).buffered()?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", response.status)?;
    for (name, value) in &response.headers {
        writeln!(stdout, "{name}: {value}")?;
    }
    writeln!(stdout)?;
    stdout.write_all(response.body_bytes())?;
    writeln!(stdout)?;
    Ok(())
}
