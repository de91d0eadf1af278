//! Viewserv command line client: queries the view server, or runs as a
//! heartbeating replica.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::runtime::Builder;
use tokio::sync::watch;
use viewserv::{
    logger_init, pf_error, pf_info, set_me, ServerId, ViewClerk,
    ViewPinger, ViewServError, ViewServiceConfig,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// View server address to connect to.
    #[arg(short, long, default_value_t = String::from("127.0.0.1:52700"))]
    server: String,

    #[command(subcommand)]
    action: Action,
}

/// Client actions.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Action {
    /// Print the current view.
    Get,

    /// Print the view manager's diagnostic status.
    Status,

    /// Ping once as the given server.
    Ping {
        /// Server ID to ping as.
        #[arg(short, long)]
        me: String,

        /// Viewnum to claim; 0 means no view.
        #[arg(short, long, default_value_t = 0)]
        viewnum: u64,
    },

    /// Keep pinging as the given server until interrupted.
    Heartbeat {
        /// Server ID to ping as.
        #[arg(short, long)]
        me: String,

        /// Configuration TOML string; only 'ping_interval_ms' matters here.
        #[arg(short, long)]
        config: Option<String>,
    },
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(server_addr)` on success
    /// or `Err(ViewServError)` on any error.
    fn sanitize(&self) -> Result<SocketAddr, ViewServError> {
        match &self.action {
            Action::Ping { me, .. } | Action::Heartbeat { me, .. }
                if me.is_empty() =>
            {
                return Err(ViewServError::msg("server ID must not be empty"));
            }
            _ => {}
        }
        self.server.parse().map_err(|e| {
            ViewServError::msg(format!(
                "failed to parse server address '{}': {}",
                self.server, e
            ))
        })
    }
}

/// Executes the chosen action against the view server.
async fn client_run(
    server: SocketAddr,
    action: Action,
) -> Result<(), ViewServError> {
    match action {
        Action::Get => {
            let mut clerk = ViewClerk::new_by_connect(server).await?;
            println!("{}", clerk.get().await?);
            clerk.leave().await?;
        }

        Action::Status => {
            let mut clerk = ViewClerk::new_by_connect(server).await?;
            let status = clerk.status().await?;
            println!(
                "view {} acked {} idle {}",
                status.view,
                status.acknowledged,
                status.idle.unwrap_or_default()
            );
            clerk.leave().await?;
        }

        Action::Ping { me, viewnum } => {
            let mut clerk = ViewClerk::new_by_connect(server).await?;
            println!("{}", clerk.ping(&ServerId::new(me), viewnum).await?);
            clerk.leave().await?;
        }

        Action::Heartbeat { me, config } => {
            let config = ViewServiceConfig::parse(config.as_deref())?;
            set_me(&me);

            // set up termination signals handler
            let (tx_term, rx_term) = watch::channel(false);
            ctrlc::set_handler(move || {
                if let Err(e) = tx_term.send(true) {
                    pf_error!("error sending to term channel: {}", e);
                }
            })?;

            let mut pinger =
                ViewPinger::new_by_connect(ServerId::new(me), server).await?;
            pinger.run(config.ping_interval(), rx_term).await?;
            pf_info!("last view {} as {:?}", pinger.view(), pinger.role());
        }
    }

    Ok(())
}

/// Actual main function of the client.
fn client_main() -> Result<(), ViewServError> {
    let args = CliArgs::parse();
    let server = args.sanitize()?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("tokio-worker-client")
        .build()?;
    runtime.block_on(client_run(server, args.action))
}

/// Main function of the client.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
