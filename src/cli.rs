use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    api,
    config::{ServeArgs, ServerConfig},
    directory::Directory,
    orders::{GeoPoint, OrderId, Role, UserId},
    rider_sim::{self, RideConfig, parse_jitter, parse_point},
    state::AppState,
    transition::permitted_statuses,
    utils::shutdown_token,
    watch::run_watch,
};

/// Order lifecycle and live tracking service
#[derive(Parser)]
#[command(name = "delivery-order-engine", version, about)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and websocket server
    Serve(ServeArgs),

    /// Follow one order's live events
    Watch {
        /// Server websocket base
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        url: String,
        /// Caller's user id
        #[arg(long)]
        token: UserId,
        #[arg(long)]
        order: OrderId,
    },

    /// Drive a rider along a straight line, reporting each step
    Ride {
        /// Server HTTP base
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        /// Rider's user id
        #[arg(long)]
        token: UserId,
        #[arg(long)]
        order: OrderId,
        /// Start as lat,lng
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        from: GeoPoint,
        /// Destination as lat,lng
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        to: GeoPoint,
        #[arg(long, default_value_t = 10)]
        steps: u32,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Max jitter in degrees
        #[arg(long, default_value_t = 0.0001, value_parser = parse_jitter)]
        jitter: f64,
    },

    /// Print which statuses each role may set
    Rules,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(cfg: ServerConfig) -> anyhow::Result<()> {
    let directory = match &cfg.seed {
        Some(path) => Directory::load(path)?,
        None => Directory::demo()?,
    };
    let state = AppState::with_parts(&cfg.data_dir, directory, cfg.pricing, cfg.bus)?;
    let bus = state.bus.clone();
    let app = api::router(state);

    let listener = TcpListener::bind(cfg.addr).await?;
    info!(addr = %cfg.addr, data_dir = %cfg.data_dir.display(), "listening");

    let token = shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            info!("shutting down");
            bus.shutdown();
        })
        .await?;
    info!("server stopped");
    Ok(())
}

fn print_rules() {
    println!("------ Status permissions ------");
    for role in Role::ALL {
        let statuses: Vec<&str> = permitted_statuses(role).iter().map(|s| s.as_str()).collect();
        let list = if statuses.is_empty() {
            "(none)".to_string()
        } else {
            statuses.join(", ")
        };
        println!("{:<11} {}", role.to_string(), list);
    }
    println!("--------------------------------");
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Commands::Serve(args) => serve(args.into()).await,
        Commands::Watch { url, token, order } => {
            run_watch(&url, token, order, shutdown_token()).await?;
            Ok(())
        }
        Commands::Ride {
            url,
            token,
            order,
            from,
            to,
            steps,
            interval_ms,
            jitter,
        } => {
            let cfg = RideConfig {
                api_base: url,
                token,
                order_id: order,
                from,
                to,
                steps,
                interval: Duration::from_millis(interval_ms),
                jitter,
            };
            rider_sim::run_ride(cfg, shutdown_token()).await
        }
        Commands::Rules => {
            print_rules();
            Ok(())
        }
    }
}
