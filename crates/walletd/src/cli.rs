use std::path::PathBuf;

use clap::Parser;

use walletd_core::Network;

/// walletd: Bitcoin wallet REST API over public block explorers, with a
/// disk-backed cache for offline use.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Address to bind the web server to.
    #[arg(long, default_value = "127.0.0.1", env = "WALLETD_BIND")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "8000", env = "WALLETD_PORT")]
    pub port: u16,

    /// Network used when a request does not name one (mainnet or testnet).
    #[arg(long, default_value = "testnet", env = "WALLETD_NETWORK")]
    pub network: Network,

    /// Directory holding the persisted explorer cache.
    #[arg(long, default_value = "./cache", env = "WALLETD_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Browser origin allowed by CORS.
    #[arg(long, default_value = "http://localhost:4200", env = "WALLETD_CORS_ORIGIN")]
    pub cors_origin: String,

    /// Global cap on outbound explorer requests per second.
    #[arg(long, env = "WALLETD_REQUESTS_PER_SECOND")]
    pub requests_per_second: Option<u32>,

    /// Pause between failed status sources, in milliseconds.
    #[arg(long, default_value = "1000", env = "WALLETD_STATUS_RETRY_DELAY_MS")]
    pub status_retry_delay_ms: u64,

    /// Serve balance and UTXO lookups from cache unless a request says otherwise.
    #[arg(long, env = "WALLETD_OFFLINE")]
    pub offline: bool,
}
