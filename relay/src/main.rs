use structopt::StructOpt;
use telemetry_relay::core;
use telemetry_relay::server;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const NAME: &str = "Sensor Telemetry Relay";
const ABOUT: &str = "Relays live sensor telemetry from a single active producer \
                     to dashboards and passive, orientation, and bulk subscribers.";

#[derive(StructOpt, Debug)]
#[structopt(name = NAME, version = VERSION, author = AUTHORS, about = ABOUT)]
struct Opts {
    /// Port to listen on. Overrides the `PORT` environment variable when given.
    /// Always binds 0.0.0.0, since this relay is meant to accept connections
    /// directly rather than only from localhost (see DESIGN.md).
    port: Option<u16>,
    /// The desired log level; one of 'error', 'warn', 'info', 'debug' or 'trace'.
    #[structopt(long = "log", default_value = "info")]
    log_level: log::LevelFilter,
}

fn resolve_port(opts: &Opts) -> u16 {
    opts.port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(8080)
}

#[tokio::main]
async fn main() {
    let opts = Opts::from_args();

    simple_logger::SimpleLogger::new()
        .with_level(opts.log_level)
        .init()
        .expect("Must be able to start a logger");

    log::info!("Starting {} version: {}", NAME, VERSION);

    if let Err(e) = start_server(opts).await {
        log::error!("Error starting server: {}", e);
        std::process::exit(1);
    }
}

/// Declare our routes, spawn the core event loop, and serve until an
/// interrupt signal triggers graceful shutdown.
async fn start_server(opts: Opts) -> anyhow::Result<()> {
    let port = resolve_port(&opts);
    let socket = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let (events_tx, events_rx) = flume::unbounded();
    tokio::spawn(core::aggregator::run(events_rx));

    let routes = server::routes(events_tx.clone());

    let (shutdown_signal_tx, shutdown_signal_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("received interrupt signal, shutting down");
        let _ = events_tx
            .send_async(core::aggregator::CoreEvent::Shutdown {
                now: relay_common::time::now(),
            })
            .await;
        let _ = shutdown_signal_tx.send(());
    });

    log::info!("Listening on {}", socket);
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(socket, async {
        shutdown_signal_rx.await.ok();
    });
    server.await;
    Ok(())
}
