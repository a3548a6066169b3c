use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::Router;
use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use mountgate::{
    GatewayState, GracefulShutdown, HealthChecker, HttpClientAdapter, ModuleCatalog, Registry,
    adapters::ProbeSettings,
    build_app,
    config::{
        ConfigurationError, GatewayConfig, ValidationError, descriptor_from_entry,
        load_config_or_default, validate_gateway_settings,
    },
    core::{ChildTarget, ConnectionLimits},
    ports::http_client::HttpClient,
    spawn_probe_worker, tracing_setup,
    utils::ShutdownReason,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Port to listen on (overrides the port of `listen_addr`)
    port: Option<u16>,

    /// Gateway configuration file (JSON, YAML or TOML)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[clap(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate the configuration file and report every child entry
    Validate,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let command = args.command.unwrap_or(Commands::Serve);

    let (mut config, config_issue) = match &args.config {
        Some(path) => load_config_or_default(path),
        None => (GatewayConfig::default(), None),
    };
    if let Some(port) = args.port {
        config.override_port(port);
    }
    if args.log_json {
        config.logging.json = true;
    }

    tracing_setup::init_tracing(&config.logging)?;

    match (&args.config, config_issue) {
        (None, _) => {
            tracing::warn!("No configuration file given, starting without child servers")
        }
        (_, Some(e @ ConfigurationError::NotFound(_))) => {
            tracing::warn!("{}, starting without child servers", e)
        }
        (_, Some(e)) => tracing::error!("{}, starting without child servers", e),
        (Some(path), None) => tracing::info!("Loaded configuration from {}", path.display()),
    }

    let problems = validate_gateway_settings(&config);
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("Invalid gateway setting: {}", problem);
        }
        if command == Commands::Validate {
            print_settings_problems(&problems);
        }
        return Err(eyre!(
            "{} invalid gateway setting(s), refusing to start",
            problems.len()
        ));
    }

    let config_dir = args.config.as_deref().and_then(Registry::config_dir_of);
    match command {
        Commands::Validate => validate_command(&config, config_dir),
        Commands::Serve => {
            let state = Arc::new(GatewayState::new(ConnectionLimits::from(
                &config.connections,
            )));
            let client: Arc<dyn HttpClient> = Arc::new(
                HttpClientAdapter::new().wrap_err("Failed to create HTTP client")?,
            );

            export_module_environment(&config);
            let registry = Registry::new(
                state.clone(),
                client.clone(),
                ModuleCatalog::with_builtin_modules(),
                config_dir,
            );
            let (children, _report) = registry.mount_all(&config.child_servers);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .wrap_err("Failed to build tokio runtime")?;
            let result = runtime.block_on(serve(config, state, client, children));

            tracing_setup::shutdown_tracing();
            result
        }
    }
}

/// Copy every valid module child's `module_envvars` into the process
/// environment so code reading it directly sees the configured values.
///
/// Must run before the tokio runtime or any other thread is started.
fn export_module_environment(config: &GatewayConfig) {
    for entry in &config.child_servers {
        let Ok(descriptor) = descriptor_from_entry(entry) else {
            continue;
        };
        let ChildTarget::Module(spec) = descriptor.target() else {
            continue;
        };
        for (key, value) in &spec.envvars {
            if key.contains(['=', '\0']) || value.contains('\0') {
                tracing::warn!("Ignoring invalid variable {:?} for module child '{}'", key, descriptor.name());
                continue;
            }
            tracing::debug!("Setting {} for module child '{}'", key, descriptor.name());
            // SAFETY: called from `main` before the runtime is built, while
            // this is the only thread in the process.
            unsafe { std::env::set_var(key, value) };
        }
    }
}

async fn serve(
    config: GatewayConfig,
    state: Arc<GatewayState>,
    client: Arc<dyn HttpClient>,
    children: Router,
) -> Result<()> {
    let checker = Arc::new(HealthChecker::new(
        state.clone(),
        client,
        ProbeSettings::from(&config.health_check),
    ));
    let shutdown = GracefulShutdown::new();

    let worker = if config.health_check.enabled {
        Some(spawn_probe_worker(
            checker.clone(),
            Duration::from_secs(config.health_check.interval_secs),
            shutdown.token(),
        ))
    } else {
        tracing::info!("Health checking is disabled");
        None
    };

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("Invalid listen address: {}", config.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {addr}"))?;

    let ingress = config.ingress_path.clone();
    let app = build_app(&config, state.clone(), checker, children);

    tracing::info!("mountgate listening on http://{}", addr);
    tracing::info!("Health check at http://{}/health", addr);
    tracing::info!("Status at http://{}/status", addr);
    tracing::info!(
        "Ingress at http://{}{} ({} child servers)",
        addr,
        ingress,
        state.child_count()
    );

    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await })
    };

    let server_shutdown = shutdown.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { server_shutdown.wait().await })
    .await
    .wrap_err("Server error");

    if !shutdown.is_shutdown_initiated() {
        shutdown.trigger_shutdown(ShutdownReason::Requested);
    }
    if let Some(worker) = worker {
        tracing::info!("Shutting down prober worker...");
        worker.shutdown().await;
    }
    signals.abort();

    tracing::info!("Graceful shutdown completed");
    served
}

fn print_settings_problems(problems: &[ValidationError]) {
    eprintln!("❌ Gateway settings are invalid:");
    for problem in problems {
        eprintln!("   • {problem}");
    }
}

/// Run the registry against a scratch state and report what would happen to
/// every child entry.
fn validate_command(config: &GatewayConfig, config_dir: Option<PathBuf>) -> Result<()> {
    println!("🔍 Validating {} child server entries", config.child_servers.len());

    let state = Arc::new(GatewayState::default());
    let client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().wrap_err("Failed to create HTTP client")?);
    let registry = Registry::new(
        state.clone(),
        client,
        ModuleCatalog::with_builtin_modules(),
        config_dir.clone(),
    );
    let (_router, report) = registry.mount_all(&config.child_servers);

    for name in &report.mounted {
        if let Some(d) = state.descriptor(name) {
            println!("✅ {} ({}) at prefix '{}'", name, d.kind(), d.prefix());
        }
    }
    for (name, error) in &report.failed {
        println!("⚠️  {name}: registered but cannot be mounted: {error}");
    }
    for skipped in &report.skipped {
        println!(
            "❌ entry #{} ({}): {}",
            skipped.index,
            skipped.name.as_deref().unwrap_or("<unnamed>"),
            skipped.reason
        );
    }

    println!();
    println!("📋 Configuration Summary:");
    println!("   • Listen Address: {}", config.listen_addr);
    println!("   • Ingress Path: {}", config.ingress_path);
    println!(
        "   • Module Path Base: {}",
        config_dir
            .as_deref()
            .map(Path::display)
            .map(|d| d.to_string())
            .unwrap_or_else(|| ".".to_string())
    );
    println!("   • Health Checks: {}", config.health_check.enabled);
    println!(
        "   • Children: {} mounted, {} failed, {} skipped",
        report.mounted.len(),
        report.failed.len(),
        report.skipped.len()
    );

    if report.skipped.is_empty() && report.failed.is_empty() {
        println!();
        println!("🎉 Configuration is valid and ready to use!");
        Ok(())
    } else {
        Err(eyre!("configuration has problems, see report above"))
    }
}
