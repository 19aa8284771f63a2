use std::sync::Arc;

use cccc_core::config::CcccConfig;
use cccc_core::home::RuntimeHome;
use cccc_ipc::{AddrDescriptor, IpcServer, Listener};
use tracing::{info, warn};

mod daemon;
mod error;
mod group;
mod handler;
mod runtime;

use daemon::Daemon;
use handler::DaemonHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cccc_daemon=info".into()),
        )
        .init();

    let runtime_home = std::env::var("CCCC_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from(CcccConfig::default().runtime_home));
    let config = CcccConfig::load(&runtime_home).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        CcccConfig::default()
    });
    let home = RuntimeHome::new(runtime_home);
    home.ensure_root_dirs()?;

    let daemon = Daemon::start(home.clone(), config.clone()).await?;
    let handler: Arc<dyn cccc_ipc::OpHandler> = Arc::new(DaemonHandler::new(daemon.clone()));

    let listener = match config.ipc.transport.as_str() {
        "tcp" => Listener::bind_tcp(&config.ipc.bind, config.ipc.port).await?,
        _ => Listener::bind_unix(&home.daemon_dir().join("cccc.sock"))?,
    };
    let addr_desc = match config.ipc.transport.as_str() {
        "tcp" => AddrDescriptor::tcp(config.ipc.bind.clone(), config.ipc.port),
        _ => AddrDescriptor::unix(home.daemon_dir().join("cccc.sock").to_string_lossy().into_owned()),
    };
    addr_desc.write(&home.addr_json())?;
    std::fs::write(home.daemon_pid(), std::process::id().to_string())?;

    let ipc_server = IpcServer::new(listener, handler, config.ipc.op_timeout_secs);

    let compaction_daemon = daemon.clone();
    let compaction_shutdown = daemon.shutdown_receiver();
    let compaction_task = tokio::spawn(compaction_daemon.run_compaction_loop(compaction_shutdown));

    info!("cccc daemon ready");
    tokio::select! {
        _ = ipc_server.run(daemon.shutdown_receiver()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            daemon.shutdown().await;
        }
    }

    let _ = compaction_task.await;
    let _ = AddrDescriptor::remove(&home.addr_json());
    let _ = std::fs::remove_file(home.daemon_pid());
    Ok(())
}
