//! tmaxhocctl - CLI for tmaxhoc
//!
//! Communicates with the tmaxhoc daemon over its control socket.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tmaxhoc::protocol::{call, socket_path, Request, Response, UnitInfo};

#[derive(Parser)]
#[command(name = "tmaxhocctl")]
#[command(about = "Control the tmaxhoc supervisor")]
struct Args {
    /// Control socket path (default: $XDG_RUNTIME_DIR/tmaxhoc.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List units
    List {
        /// Include hidden units
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Show unit status
    Status {
        /// Unit name
        name: String,
    },

    /// Show a group's requirements
    Deps {
        /// Unit name
        name: String,
    },

    /// Start a unit
    Start {
        /// Unit name
        name: String,
    },

    /// Stop a unit
    Stop {
        /// Unit name
        name: String,
    },

    /// Kill a unit that did not stop within the grace period
    ForceStop {
        /// Unit name
        name: String,
    },

    /// Reconcile with the tmux session now
    Reconcile,

    /// Ping the daemon
    Ping,
}

fn main() {
    let args = Args::parse();

    let request = match args.command {
        Command::List { all } => Request::List { all },
        Command::Status { name } => Request::Status { name },
        Command::Deps { name } => Request::Deps { name },
        Command::Start { name } => Request::Start { name },
        Command::Stop { name } => Request::Stop { name },
        Command::ForceStop { name } => Request::ForceStop { name },
        Command::Reconcile => Request::Reconcile,
        Command::Ping => Request::Ping,
    };

    let sock_path = args.socket.unwrap_or_else(socket_path);

    match call(&sock_path, &request) {
        Ok(response) => print_response(response),
        Err(e) => {
            if sock_path.exists() {
                eprintln!("tmaxhocctl: {}", e);
            } else {
                eprintln!("tmaxhocctl: daemon not running ({} missing)", sock_path.display());
                eprintln!("  start with: tmaxhoc --config config.toml");
            }
            std::process::exit(1);
        }
    }
}

fn print_response(response: Response) {
    match response {
        Response::Ok => {} // Silent success
        Response::Pong => println!("pong"),
        Response::Error(msg) => {
            eprintln!("error: {}", msg);
            std::process::exit(1);
        }
        Response::Units(units) => {
            if units.is_empty() {
                println!("No units configured");
                return;
            }
            println!("{:<32} {:>8} {:>10} {:>6}", "UNIT", "TYPE", "STATUS", "PROCS");
            for unit in units {
                println!(
                    "{:<32} {:>8} {:>10} {:>6}",
                    unit.name,
                    unit.kind,
                    unit.status.as_str(),
                    unit.processes.len()
                );
            }
        }
        Response::Status(unit) => print_status(&unit),
        Response::Deps(deps) => {
            if deps.is_empty() {
                println!("No dependencies");
            } else {
                for dep in deps {
                    println!("  {}", dep);
                }
            }
        }
        Response::Reconciled {
            crashed,
            stopped,
            adopted,
        } => {
            println!("{} crashed, {} stopped, {} adopted", crashed, stopped, adopted);
        }
    }
}

fn print_status(unit: &UnitInfo) {
    println!("● {}", unit.name);
    println!("     Type: {}", unit.kind);
    println!("   Status: {}", unit.status.as_str());
    if !unit.description.is_empty() {
        println!("     Desc: {}", unit.description);
    }
    if let Some(container) = &unit.container {
        println!("   Window: {}", container);
    }
    if let Some(running) = unit.running_requirements {
        println!("  Running: {} requirements", running);
    }
    for p in &unit.processes {
        let mut flags = Vec::new();
        if p.adopted {
            flags.push("adopted");
        }
        if p.stopping {
            flags.push("stopping");
        }
        println!("    {} {} (PID {}) {}", p.id, p.name, p.pid, flags.join(","));
    }
    if unit.force_stop_allowed {
        println!("  Stop grace period expired; force-stop allowed");
    }
}
