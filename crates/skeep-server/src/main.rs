//!
//! # Daemon Operating Model
//!
//! - **Supervisor + worker pool**: the main thread binds the Unix socket,
//!   applies the configured mode, and feeds accepted connections to a
//!   fixed pool of worker threads over a bounded channel. Each worker
//!   handles exactly one request per connection.
//!
//! - **Explicit shared context**: token catalogue, persistent store, and
//!   cache live in one `ServerContext` passed to every worker. The store
//!   is the source of truth; caches are an optimization.
//!
//! - **Signals**: SIGINT stops the accept loop, drains the workers, and
//!   removes the socket and pid files. SIGHUP rebuilds the token
//!   catalogue in place (a failed rebuild keeps the old one).
//!
//! - **Processing pipeline**: Unix socket -> request line parse ->
//!   cache/store -> response bytes
//!

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Release;

use clap::Parser;
use skeep_keys::catalog::TokenCatalog;
use skeep_server::args::Args;
use skeep_server::cache::{InstanceKey, SecretCache, SharedCache};
use skeep_server::config::{
    CacheStrategy, HookContext, HookRegistry, LogTarget, RawConfig, Settings,
};
use skeep_server::context::ServerContext;
use skeep_server::server::{RELOAD_TOKENS, Server};
use skeep_server::store::SecretStore;
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter};

fn main() {
    let args = Args::parse();
    enable_logging(&args);
    debug!("{args:?}");

    let raw = load_config(&args);
    if args.dumpconfig {
        match serde_json::to_string_pretty(&raw) {
            Ok(json) => println!("{json}"),
            Err(e) => fatal(&format!("serializing config: {e}")),
        }
        return;
    }

    let settings = Settings::from_config(&raw, &args.config)
        .unwrap_or_else(|e| fatal(&format!("configuration: {e}")));

    if settings.log == LogTarget::Syslog {
        debug!("log = \"syslog\" accepted; output goes to the console");
    }

    if let Some(mask) = settings.storage_umask {
        apply_umask(mask);
    }

    let catalog = TokenCatalog::load(&settings.tokens)
        .unwrap_or_else(|e| fatal(&format!("loading tokens: {e}")));
    if catalog.is_empty() {
        fatal("no usable tokens configured");
    }

    let store = SecretStore::new(settings.storage_dir.clone());
    let cache = build_cache(&settings);
    if settings.cache_strategy == CacheStrategy::Preload {
        cache.preload(&store, &catalog);
    }

    let ctx = Arc::new(ServerContext::new(settings, catalog, store, cache));
    let server = Server::new(ctx);
    install_signal_handlers(server.shutdown_handle());

    if let Err(e) = server.run() {
        fatal(&format!("server: {e}"));
    }
}

fn load_config(args: &Args) -> RawConfig {
    let mut raw = RawConfig::from_file(&args.config)
        .unwrap_or_else(|e| fatal(&format!("configuration: {e}")));

    let hook_ctx = HookContext {
        config_path: args.config.clone(),
    };
    raw.resolve(&HookRegistry::default(), &hook_ctx)
        .unwrap_or_else(|e| fatal(&format!("configuration: {e}")));
    raw
}

fn build_cache(settings: &Settings) -> SecretCache {
    match settings.cache_strategy {
        CacheStrategy::Preload => SecretCache::local_only(),
        CacheStrategy::Memcache => {
            let shared = SharedCache::connect(
                &settings.memcache_servers,
                &settings.namespace,
                &InstanceKey::generate(),
            )
            .unwrap_or_else(|e| fatal(&format!("shared cache: {e}")));
            info!(
                "shared cache enabled ({} server(s))",
                settings.memcache_servers.len()
            );
            SecretCache::with_shared(shared)
        }
    }
}

fn apply_umask(mask: u32) {
    unsafe {
        libc::umask(mask as libc::mode_t);
    }
    debug!("umask set to {mask:04o}");
}

fn install_signal_handlers(shutdown: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        info!("received shutdown signal, exiting...");
        shutdown.store(false, Release);
    })
    .expect("Error setting Ctrl-C handler");

    let handler = handle_sighup as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGHUP, handler as libc::sighandler_t);
    }
}

extern "C" fn handle_sighup(_signal: libc::c_int) {
    RELOAD_TOKENS.store(true, Release);
}

fn fatal(message: &str) -> ! {
    error!("{message}");
    std::process::exit(1);
}

fn enable_logging(args: &Args) {
    let verbosity = match args.debug {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        2.. => tracing::Level::TRACE,
    };

    let filters = filter::Targets::new().with_default(verbosity);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(filters);

    tracing_subscriber::registry().with(fmt_layer).init();
}
