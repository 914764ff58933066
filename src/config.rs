use crate::services::name_codec::DEFAULT_STORAGE_HOST;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub storage_host: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Blob listing, transfer and download-URL helper")]
pub struct Args {
    /// Host to bind to when serving (overrides BLOB_HELPER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to when serving (overrides BLOB_HELPER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blob payloads are stored (overrides BLOB_HELPER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BLOB_HELPER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket to operate on (overrides BLOB_HELPER_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Host used in generated download URLs (overrides BLOB_HELPER_STORAGE_HOST)
    #[arg(long)]
    pub storage_host: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List every blob under `{prefix_root}/{yyyyMMdd}/` for today
    Today {
        #[arg(long, default_value = "lifecycle-images")]
        prefix_root: String,
    },
    /// Serve download URLs for the local bucket over HTTP
    Serve,
    /// Apply the schema and exit
    Migrate,
}

impl Default for Command {
    fn default() -> Self {
        Command::Today {
            prefix_root: "lifecycle-images".into(),
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::from_parts(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge parsed arguments over values looked up by environment name.
    pub fn from_parts(
        args: Args,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Command)> {
        let env_port = match lookup("BLOB_HELPER_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing BLOB_HELPER_PORT value `{}`", value))?,
            None => 3000,
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("BLOB_HELPER_HOST"))
                .unwrap_or_else(|| "127.0.0.1".into()),
            port: args.port.unwrap_or(env_port),
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("BLOB_HELPER_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/blobs".into()),
            database_url: args
                .database_url
                .or_else(|| lookup("BLOB_HELPER_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/blob_helper.db".into()),
            bucket: args
                .bucket
                .or_else(|| lookup("BLOB_HELPER_BUCKET"))
                .unwrap_or_else(|| "local-bucket".into()),
            storage_host: args
                .storage_host
                .or_else(|| lookup("BLOB_HELPER_STORAGE_HOST"))
                .unwrap_or_else(|| DEFAULT_STORAGE_HOST.into()),
        };

        Ok((cfg, args.command.unwrap_or_default()))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
