mod cli;
mod commands {
    pub mod backups;
    pub mod config;
    pub mod images;
    pub mod store;
    pub mod sync;
    pub mod workspace;
}

use clap::Parser;
use cli::{
    BackupsCmd, Cli, Clock, Command, ConfigCmd, ImagesCmd, ModeArg, ObjectStorageCmd, StoreCmd,
    SyncCmd, WebDavCmd,
};
use commands::workspace::{print_json, read_env_secret, Workspace};
use lt_core::app_error::AppResult;
use lt_core::images::CleanupOptions;
use lt_core::sync::QuickSyncMode;
use lt_core::sync_config::{ObjectStorageCredentials, WebDavCredentials};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Clock {
    fn resolve(self) -> i64 {
        self.now_ms.unwrap_or_else(now_ms)
    }
}

impl From<ModeArg> for QuickSyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Startup => QuickSyncMode::Startup,
            ModeArg::Resume => QuickSyncMode::Resume,
            ModeArg::Manual => QuickSyncMode::Manual,
            ModeArg::Auto => QuickSyncMode::Auto,
        }
    }
}

fn emit<T: Serialize>(result: AppResult<T>) -> AppResult<()> {
    result.map(|value| print_json(&value))
}

fn run(cli: Cli) -> AppResult<()> {
    let ws = Workspace::open(&cli.data_dir)?;
    let target = cli.target.as_deref();
    match cli.cmd {
        Command::Store { cmd } => match cmd {
            StoreCmd::Init { clock } => emit(commands::store::run_init(&ws, clock.resolve())),
            StoreCmd::Import { file, clock } => {
                emit(commands::store::run_import(&ws, &file, clock.resolve()))
            }
            StoreCmd::Export { file } => emit(commands::store::run_export(&ws, &file, now_ms())),
            StoreCmd::Status => emit(commands::store::run_status(&ws)),
        },
        Command::Config { cmd } => match cmd {
            ConfigCmd::Webdav { cmd } => match cmd {
                WebDavCmd::Connect {
                    url,
                    username,
                    password_env,
                    clock,
                } => emit(commands::config::run_webdav_connect(
                    &ws,
                    &url,
                    &username,
                    &password_env,
                    clock.resolve(),
                )),
                WebDavCmd::Reconnect { clock } => {
                    emit(commands::config::run_webdav_reconnect(&ws, clock.resolve()))
                }
                WebDavCmd::Disconnect { clock } => emit(commands::config::run_disconnect::<
                    WebDavCredentials,
                >(&ws, clock.resolve())),
                WebDavCmd::Forget => {
                    emit(commands::config::run_forget::<WebDavCredentials>(&ws))
                }
            },
            ConfigCmd::S3 { cmd } => match cmd {
                ObjectStorageCmd::Connect {
                    bucket,
                    region,
                    secret_id,
                    secret_key_env,
                    endpoint,
                    clock,
                } => {
                    let creds = ObjectStorageCredentials {
                        bucket_name: bucket.trim().to_string(),
                        region: region.trim().to_string(),
                        secret_id: secret_id.trim().to_string(),
                        secret_key: read_env_secret(&secret_key_env)?.trim().to_string(),
                        endpoint,
                    };
                    emit(commands::config::run_object_storage_connect(
                        &ws,
                        creds,
                        clock.resolve(),
                    ))
                }
                ObjectStorageCmd::Reconnect { clock } => emit(
                    commands::config::run_object_storage_reconnect(&ws, clock.resolve()),
                ),
                ObjectStorageCmd::Disconnect { clock } => emit(commands::config::run_disconnect::<
                    ObjectStorageCredentials,
                >(&ws, clock.resolve())),
                ObjectStorageCmd::Forget => {
                    emit(commands::config::run_forget::<ObjectStorageCredentials>(&ws))
                }
            },
            ConfigCmd::Show => emit(commands::config::run_show(&ws)),
        },
        Command::Sync { cmd } => match cmd {
            SyncCmd::Status => emit(commands::sync::run_status(&ws, target)),
            SyncCmd::Upload { clock } => {
                emit(commands::sync::run_upload(&ws, target, clock.resolve()))
            }
            SyncCmd::Download { yes, clock } => {
                emit(commands::sync::run_download(&ws, target, yes, clock.resolve()))
            }
            SyncCmd::Quick { mode, clock } => emit(commands::sync::run_quick(
                &ws,
                target,
                mode.into(),
                clock.resolve(),
            )),
        },
        Command::Backups { cmd } => match cmd {
            BackupsCmd::List => emit(commands::backups::run_list(&ws, target)),
            BackupsCmd::Cleanup => emit(commands::backups::run_cleanup(&ws, target)),
        },
        Command::Images { cmd } => match cmd {
            ImagesCmd::Report { remote, markdown } => {
                let report = commands::images::run_report(&ws, target, remote)?;
                if markdown {
                    print!("{}", report.to_markdown());
                } else {
                    print_json(&report);
                }
                Ok(())
            }
            ImagesCmd::Cleanup {
                delete_local,
                delete_remote,
                clock,
            } => emit(commands::images::run_cleanup(
                &ws,
                target,
                CleanupOptions {
                    delete_local,
                    delete_remote,
                },
                clock.resolve(),
            )),
            ImagesCmd::Rebuild { clock } => {
                emit(commands::images::run_rebuild(&ws, clock.resolve()))
            }
            ImagesCmd::Sync { clock } => {
                emit(commands::images::run_sync(&ws, target, clock.resolve()))
            }
        },
    }
}

fn main() {
    let cli = Cli::parse();
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    if let Err(err) = run(cli) {
        eprintln!("{}: {}", err.code, err.message);
        std::process::exit(1);
    }
}
