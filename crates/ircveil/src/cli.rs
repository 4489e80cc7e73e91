use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ircveil",
    version,
    about = "Encrypting proxy between an IRC client and server",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the configuration file
    #[arg(short, long, default_value = "ircveil.yaml")]
    pub config: PathBuf,

    /// Chat server host (overrides config file setting)
    pub server_host: Option<String>,

    /// Chat server port (overrides config file setting)
    pub server_port: Option<u16>,

    /// Listen address; when it is the last argument and numeric, the listen port
    pub listen: Option<String>,

    /// Listen port (overrides config file setting)
    pub listen_port: Option<u16>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print a fresh base64-encoded key and exit
    Keygen {
        /// Key size in bits
        #[arg(long, default_value_t = 128)]
        bits: usize,

        /// Cipher the key is for
        #[arg(long, default_value = "AES")]
        algorithm: String,
    },
}

impl Cli {
    /// Listen address and port given on the command line, if any.
    pub fn listen_override(&self) -> (Option<&str>, Option<u16>) {
        match (self.listen.as_deref(), self.listen_port) {
            (Some(listen), None) => match listen.parse::<u16>() {
                Ok(port) => (None, Some(port)),
                Err(_) => (Some(listen), None),
            },
            (listen, port) => (listen, port),
        }
    }

    /// Merge command-line overrides into `cfg`.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(ref host) = self.server_host {
            cfg.network.upstream_host = Some(host.clone());
        }
        if let Some(port) = self.server_port {
            cfg.network.upstream_port = port;
        }
        let (listen, port) = self.listen_override();
        if let Some(listen) = listen {
            cfg.network.listen_address = listen.to_string();
        }
        if let Some(port) = port {
            cfg.network.listen_port = port;
        }
    }
}
