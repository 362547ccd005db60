//! Engine configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

/// Everything the server binary needs to start: where to listen, how to
/// reach the database, and one poll interval per scheduler instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: SocketAddr,
    pub database: DatabaseOptions,
    pub poll_intervals: Vec<Duration>,
}

/// Database connection parameters. The password travels separately from
/// the command line (environment variable only).
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub name: String,
    pub password: String,
}

impl DatabaseOptions {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }
}

impl Config {
    pub fn http_addr_for_port(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }
}
