use std::{net::SocketAddr, path::PathBuf};

use clap::Args;

use crate::{bus::BusConfig, orders::Pricing};

/// Options of the `serve` subcommand. Every flag can also come from the
/// environment.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "ORDER_ENGINE_ADDR", default_value = "127.0.0.1:3000")]
    pub addr: SocketAddr,

    /// Directory for the order database
    #[arg(long, env = "ORDER_ENGINE_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// JSON file with users, restaurants and menu items (built-in demo data if omitted)
    #[arg(long, env = "ORDER_ENGINE_SEED")]
    pub seed: Option<PathBuf>,

    /// Flat delivery fee, in cents
    #[arg(long, env = "ORDER_ENGINE_DELIVERY_FEE_CENTS", default_value_t = 399)]
    pub delivery_fee_cents: u64,

    /// Tax rate in basis points (800 = 8%)
    #[arg(long, env = "ORDER_ENGINE_TAX_RATE_BPS", default_value_t = 800)]
    pub tax_rate_bps: u32,

    /// Minutes from placement to estimated delivery
    #[arg(long, env = "ORDER_ENGINE_ETA_MINUTES", default_value_t = 30)]
    pub eta_minutes: u32,

    /// Events buffered per websocket connection before dropping
    #[arg(long, env = "ORDER_ENGINE_SUBSCRIBER_BUFFER", default_value_t = 64)]
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    pub seed: Option<PathBuf>,
    pub pricing: Pricing,
    pub bus: BusConfig,
}

impl From<ServeArgs> for ServerConfig {
    fn from(a: ServeArgs) -> Self {
        ServerConfig {
            addr: a.addr,
            data_dir: a.data_dir,
            seed: a.seed,
            pricing: Pricing {
                delivery_fee_cents: a.delivery_fee_cents,
                tax_rate_bps: a.tax_rate_bps,
                eta_minutes: a.eta_minutes,
            },
            bus: BusConfig {
                subscriber_buffer: a.subscriber_buffer,
            },
        }
    }
}
