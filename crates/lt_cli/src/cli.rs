use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "lt_cli")]
#[command(about = "LumosTime sync, backup and image maintenance CLI")]
pub struct Cli {
    /// Directory holding the local database and image blobs.
    #[arg(long = "data-dir", global = true, default_value = ".lumostime")]
    pub data_dir: String,
    /// Overrides the configured endpoint: file://dir, a bare dir, s3://bucket/prefix or http(s):// WebDAV.
    #[arg(long, global = true)]
    pub target: Option<String>,
    #[arg(long = "log-level", global = true, default_value = "warn")]
    pub log_level: String,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Store {
        #[command(subcommand)]
        cmd: StoreCmd,
    },
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    Sync {
        #[command(subcommand)]
        cmd: SyncCmd,
    },
    Backups {
        #[command(subcommand)]
        cmd: BackupsCmd,
    },
    Images {
        #[command(subcommand)]
        cmd: ImagesCmd,
    },
}

#[derive(Args, Clone, Copy)]
pub struct Clock {
    #[arg(long = "now-ms")]
    pub now_ms: Option<i64>,
}

#[derive(Subcommand)]
pub enum StoreCmd {
    /// Initializes every collection as empty, keeping existing ones.
    Init {
        #[command(flatten)]
        clock: Clock,
    },
    Import {
        file: String,
        #[command(flatten)]
        clock: Clock,
    },
    Export { file: String },
    Status,
}

#[derive(Subcommand)]
pub enum ConfigCmd {
    Webdav {
        #[command(subcommand)]
        cmd: WebDavCmd,
    },
    S3 {
        #[command(subcommand)]
        cmd: ObjectStorageCmd,
    },
    Show,
}

#[derive(Subcommand)]
pub enum WebDavCmd {
    Connect {
        #[arg(long)]
        url: String,
        #[arg(long)]
        username: String,
        #[arg(long = "password-env")]
        password_env: String,
        #[command(flatten)]
        clock: Clock,
    },
    Reconnect {
        #[command(flatten)]
        clock: Clock,
    },
    Disconnect {
        #[command(flatten)]
        clock: Clock,
    },
    Forget,
}

#[derive(Subcommand)]
pub enum ObjectStorageCmd {
    Connect {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        region: String,
        #[arg(long = "secret-id")]
        secret_id: String,
        #[arg(long = "secret-key-env")]
        secret_key_env: String,
        #[arg(long)]
        endpoint: Option<String>,
        #[command(flatten)]
        clock: Clock,
    },
    Reconnect {
        #[command(flatten)]
        clock: Clock,
    },
    Disconnect {
        #[command(flatten)]
        clock: Clock,
    },
    Forget,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Startup,
    Resume,
    Manual,
    Auto,
}

#[derive(Subcommand)]
pub enum SyncCmd {
    Status,
    Upload {
        #[command(flatten)]
        clock: Clock,
    },
    Download {
        /// Continue the restore even if the safety backup cannot be written.
        #[arg(long)]
        yes: bool,
        #[command(flatten)]
        clock: Clock,
    },
    Quick {
        #[arg(long, value_enum, default_value = "manual")]
        mode: ModeArg,
        #[command(flatten)]
        clock: Clock,
    },
}

#[derive(Subcommand)]
pub enum BackupsCmd {
    List,
    Cleanup,
}

#[derive(Subcommand)]
pub enum ImagesCmd {
    Report {
        /// Also list remote image blobs.
        #[arg(long)]
        remote: bool,
        #[arg(long)]
        markdown: bool,
    },
    Cleanup {
        #[arg(long = "delete-local")]
        delete_local: bool,
        #[arg(long = "delete-remote")]
        delete_remote: bool,
        #[command(flatten)]
        clock: Clock,
    },
    Rebuild {
        #[command(flatten)]
        clock: Clock,
    },
    Sync {
        #[command(flatten)]
        clock: Clock,
    },
}
