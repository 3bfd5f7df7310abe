//! Environment-driven configuration for the composition root binary.
//!
//! Follows `hook-worker::config::Config`'s nested-`Envconfig` shape: every
//! subsystem's own config struct (queue, store, worker pool, event bus) is
//! embedded with `#[envconfig(nested = true)]` rather than flattened by hand,
//! so each crate keeps ownership of its own tunables and their defaults.

use envconfig::Envconfig;
use job_common::queue::QueueConfig;
use job_common::store::StoreConfig;
use job_events::BusConfig;
use job_worker::WorkerConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub queue: QueueConfig,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub worker: WorkerConfig,

    #[envconfig(nested = true)]
    pub bus: BusConfig,
}

impl Config {
    /// Produce a host:port address for binding a `TcpListener`.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
