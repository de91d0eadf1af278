//! Viewserv view server executable.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;
use log::{self, LevelFilter};
use tokio::runtime::Builder;
use tokio::sync::watch;
use viewserv::{
    logger_init, pf_error, pf_info, set_me, ViewServError, ViewServer,
    ViewServiceConfig,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Local IP to use for binding the listening socket.
    #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    bind_ip: Ipv4Addr,

    /// Port pingers and clients connect to.
    /// This port must be available at process launch.
    #[arg(short, long, default_value_t = 52700)]
    port: u16,

    /// View service configuration TOML string, e.g.,
    /// 'ping_interval_ms = 100' or 'dead_pings = 5'.
    #[arg(short, long)]
    config: Option<String>,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(config)` on success
    /// or `Err(ViewServError)` on any error.
    fn sanitize(&self) -> Result<ViewServiceConfig, ViewServError> {
        if self.port <= 1024 {
            Err(ViewServError::msg(format!("invalid port {}", self.port)))
        } else if self.threads < 2 {
            Err(ViewServError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            ViewServiceConfig::parse(self.config.as_deref())
        }
    }
}

/// Actual main function of the view server.
fn server_main() -> Result<(), ViewServError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let config = args.sanitize()?;

    let bind_addr: SocketAddr = format!("{}:{}", args.bind_ip, args.port)
        .parse()
        .map_err(|e| {
            ViewServError::msg(format!(
                "failed to parse bind_addr: bind_ip {} port {}: {}",
                args.bind_ip, args.port, e
            ))
        })?;

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-viewserv")
            .build()?;

        // enter tokio runtime, set up the view server, and start the tick
        // loop until termination
        runtime.block_on(async move {
            let mut server =
                ViewServer::new_and_setup(bind_addr, config, rx_term.clone())
                    .await?;
            pf_info!("serving on '{}'", server.local_addr());

            server.run(rx_term).await?;
            pf_info!("final view {}", server.view());

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), ViewServError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the view server.
fn main() -> ExitCode {
    logger_init();
    set_me("v");

    if let Err(ref e) = server_main() {
        pf_error!("server_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    fn valid_args() -> Result<CliArgs, ViewServError> {
        Ok(CliArgs {
            bind_ip: "127.0.0.1".parse()?,
            port: 52700,
            config: None,
            threads: 2,
        })
    }

    #[test]
    fn sanitize_valid() -> Result<(), ViewServError> {
        let args = valid_args()?;
        assert_eq!(args.sanitize(), Ok(ViewServiceConfig::default()));
        Ok(())
    }

    #[test]
    fn sanitize_with_config() -> Result<(), ViewServError> {
        let args = CliArgs {
            config: Some("ping_interval_ms = 50\ndead_pings = 4".into()),
            ..valid_args()?
        };
        let config = args.sanitize()?;
        assert_eq!(config.ping_interval_ms, 50);
        assert_eq!(config.dead_pings, 4);
        Ok(())
    }

    #[test]
    fn sanitize_invalid_port() -> Result<(), ViewServError> {
        let args = CliArgs {
            port: 1023,
            ..valid_args()?
        };
        assert!(args.sanitize().is_err());
        Ok(())
    }

    #[test]
    fn sanitize_invalid_threads() -> Result<(), ViewServError> {
        let args = CliArgs {
            threads: 1,
            ..valid_args()?
        };
        assert!(args.sanitize().is_err());
        Ok(())
    }

    #[test]
    fn sanitize_invalid_config() -> Result<(), ViewServError> {
        let args = CliArgs {
            config: Some("dead_pings = 0".into()),
            ..valid_args()?
        };
        assert!(args.sanitize().is_err());
        Ok(())
    }
}
