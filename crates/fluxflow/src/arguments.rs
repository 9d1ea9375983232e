use {
    std::{net::SocketAddr, path::PathBuf, time::Duration},
    url::Url,
};

#[derive(Debug, clap::Parser)]
pub struct Arguments {
    /// Path to the TOML configuration file. Built-in defaults apply when
    /// omitted.
    #[clap(long, env)]
    pub config: Option<PathBuf>,

    /// Path of the SQLite database file.
    #[clap(long, env, default_value = "fluxflow.db")]
    pub db_path: PathBuf,

    /// Static exchange and foundation address book.
    #[clap(long, env, default_value = "addresses.toml")]
    pub address_book: PathBuf,

    /// Node operator registry endpoint.
    #[clap(
        long,
        env,
        default_value = "https://api.runonflux.io/daemon/viewdeterministiczelnodelist"
    )]
    pub node_registry_url: Url,

    /// Base URL of the private local indexer.
    #[clap(long, env, default_value = "http://127.0.0.1:3000")]
    pub primary_indexer_url: Url,

    /// Base URL of the public explorer used as fallback.
    #[clap(long, env, default_value = "https://explorer.runonflux.io")]
    pub fallback_indexer_url: Url,

    /// Period of the block ingestion tick.
    #[clap(
        long,
        env,
        default_value = "2m",
        value_parser = humantime::parse_duration,
    )]
    pub sync_interval: Duration,

    #[clap(long, env, default_value = "0.0.0.0:9586")]
    pub metrics_address: SocketAddr,

    /// Tracing env filter directives.
    #[clap(long, env, default_value = "info,fluxflow=debug")]
    pub log_filter: String,
}
