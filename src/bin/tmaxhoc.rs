//! tmaxhoc - supervisor for interactive server workloads
//!
//! Hosts every managed process in a window of one tmux session, so an
//! operator can `tmux attach` and type into the same console the supervisor
//! controls. Listens on a Unix socket for commands from tmaxhocctl.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

use tmaxhoc::config::{self, default_config_path};
use tmaxhoc::manager::Manager;
use tmaxhoc::protocol::{read_frame, socket_path, write_frame, Request, Response};
use tmaxhoc::runtime::Runtime;
use tmaxhoc::supervisor::{Supervisor, TmuxBackend};

#[derive(Parser)]
#[command(name = "tmaxhoc")]
#[command(about = "Supervise interactive server workloads hosted in tmux")]
struct Args {
    /// Path to the config file
    #[arg(long, short = 'c', default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Control socket path (default: $XDG_RUNTIME_DIR/tmaxhoc.sock)
    #[arg(long)]
    socket: Option<PathBuf>,
}

type SharedRuntime = Arc<Runtime<TmuxBackend>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = config::load_from_path(&args.config)?;
    let graph = cfg.build_graph()?;
    info!(
        "Loaded {} units from {}",
        graph.len(),
        args.config.display()
    );

    let backend = TmuxBackend::new(&cfg.tmux.executable, &cfg.tmux.session_name);
    let supervisor = Supervisor::new(backend);
    supervisor.init().await?;

    let manager = Manager::new(graph, supervisor).with_max_running(cfg.max_running_units);
    let runtime: SharedRuntime = Arc::new(Runtime::start(manager, cfg.poll_interval()).await);

    let sock_path = args.socket.unwrap_or_else(socket_path);
    let listener = bind(&sock_path)?;
    info!("Listening on {}", sock_path.display());

    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&runtime)));
                }
                Err(e) => log::error!("accept error: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    drop(listener);
    if let Err(e) = std::fs::remove_file(&sock_path) {
        log::warn!("Failed to remove {}: {}", sock_path.display(), e);
    }
    runtime.shutdown().await?;
    Ok(())
}

/// Bind the control socket, replacing a stale one left by a previous run
fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

async fn handle_connection(mut stream: UnixStream, runtime: SharedRuntime) {
    let request: Request = match read_frame(&mut stream).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("read error: {}", e);
            let _ = write_frame(&mut stream, &Response::Error("invalid request".into())).await;
            return;
        }
    };

    log::debug!("request: {:?}", request);
    let response = handle_request(request, &runtime).await;
    if let Err(e) = write_frame(&mut stream, &response).await {
        log::error!("write error: {}", e);
    }
}

async fn handle_request(request: Request, runtime: &SharedRuntime) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::List { all } => {
            let mgr = runtime.manager();
            let mgr = mgr.read().await;
            Response::Units(mgr.list(all))
        }

        Request::Status { name } => {
            let mgr = runtime.manager();
            let mgr = mgr.read().await;
            match mgr.unit_info(&name) {
                Some(info) => Response::Status(info),
                None => Response::Error(format!("Unit not found: {}", name)),
            }
        }

        Request::Deps { name } => {
            let mgr = runtime.manager();
            let mgr = mgr.read().await;
            match mgr.requirements(&name) {
                Ok(deps) => Response::Deps(deps),
                Err(e) => Response::Error(e.to_string()),
            }
        }

        Request::Start { name } => match runtime.start_unit(&name).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e.to_string()),
        },

        Request::Stop { name } => match runtime.stop_unit(&name).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e.to_string()),
        },

        Request::ForceStop { name } => match runtime.force_stop_unit(&name).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e.to_string()),
        },

        Request::Reconcile => match runtime.reconcile().await {
            Ok(report) => Response::Reconciled {
                crashed: report.crashed.len(),
                stopped: report.stopped.len(),
                adopted: report.adopted.len(),
            },
            Err(e) => Response::Error(e.to_string()),
        },
    }
}
