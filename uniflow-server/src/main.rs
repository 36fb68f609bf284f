//! UniFlow room sync server.
//!
//! ```text
//! uniflow-server --port 10000 --storage ./uniflow_data
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use uniflow_collab::server::{MirrorBackend, ServerConfig, SyncServer};
use uniflow_collab::session::MembershipPolicy;
use uniflow_collab::storage::MirrorConfig;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Interface to listen on
    #[arg(short, long, env = "UNIFLOW_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, env = "PORT", default_value_t = 10000)]
    port: u16,

    /// Mirror rooms to a RocksDB database at this path
    #[arg(short, long, env = "UNIFLOW_STORAGE", conflicts_with = "memory_mirror")]
    storage: Option<PathBuf>,

    /// Mirror rooms in process memory
    #[arg(long)]
    memory_mirror: bool,

    /// Reject room events from connections that are not members
    #[arg(long)]
    strict_membership: bool,

    /// Hours of inactivity before a mirrored room is forgotten
    #[arg(long, default_value_t = 24)]
    mirror_ttl_hours: u64,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let ttl = Duration::from_secs(self.mirror_ttl_hours.saturating_mul(60 * 60));
        let mirror = match (&self.storage, self.memory_mirror) {
            (Some(path), _) => MirrorBackend::RocksDb(MirrorConfig {
                ttl,
                ..MirrorConfig::new(path.clone())
            }),
            (None, true) => MirrorBackend::Memory { ttl },
            (None, false) => MirrorBackend::Disabled,
        };
        let membership_policy = if self.strict_membership {
            MembershipPolicy::Strict
        } else {
            MembershipPolicy::Open
        };

        ServerConfig {
            bind_addr: format!("{}:{}", self.bind, self.port),
            membership_policy,
            mirror,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = args.server_config();
    info!("Starting with mirror {:?}", config.mirror);

    let server = match SyncServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Error binding: {e}");
            return Err(e.into());
        }
    };
    info!("UniFlow listening on {}", server.url()?);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("{e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    server.shutdown().await;
    Ok(())
}
