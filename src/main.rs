//! Orchestrator CLI - Main entry point.

use orchestrator::cli::{AppCommands, Cli, Commands, HostCommands};
use orchestrator::client::OrchestratorClient;
use orchestrator::config::OrchestratorConfig;
use orchestrator::types::{ApplicationReference, HostName};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { log_level, command } = Cli::parse_args();

    match command {
        Commands::Serve { config, bind_addr } => {
            let mut config = match config {
                Some(path) => OrchestratorConfig::from_file(&path)?,
                None => OrchestratorConfig::development(),
            };
            if let Some(addr) = bind_addr {
                config.server.bind_addr = addr.parse()?;
            }
            if let Some(level) = log_level {
                config.observability.log_level = level;
            }

            orchestrator::run(config).await?;
        }

        Commands::Host { command, addr } => {
            let client = OrchestratorClient::from_addr(&addr)?;
            match command {
                HostCommands::Status { host } => {
                    let status = client.host_status(&HostName::from(host)).await?;
                    println!("Host: {}", status.hostname);
                    println!("State: {:?}", status.state);
                    if let Some(since) = status.suspended_since {
                        println!("Suspended since: {}", since.to_rfc3339());
                    }
                }
                HostCommands::Suspend { host } => {
                    let response = client.suspend_host(&HostName::from(host)).await?;
                    println!("Suspended: {}", response.hostname);
                }
                HostCommands::Resume { host } => {
                    let response = client.resume_host(&HostName::from(host)).await?;
                    println!("Resumed: {}", response.hostname);
                }
                HostCommands::Remove { host } => {
                    let response = client.remove_host(&HostName::from(host)).await?;
                    println!("Permission to remove granted: {}", response.hostname);
                }
            }
        }

        Commands::SuspendAll { parent, hosts, addr } => {
            let client = OrchestratorClient::from_addr(&addr)?;
            let hosts: Vec<HostName> = hosts.into_iter().map(HostName::from).collect();
            let response = client.suspend_all(&HostName::from(parent), &hosts).await?;
            println!(
                "Suspended {} hosts for parent {}",
                response.hostnames.len(),
                response.parent
            );
        }

        Commands::App { command, addr } => {
            let client = OrchestratorClient::from_addr(&addr)?;
            match command {
                AppCommands::Status { application } => {
                    let application: ApplicationReference = application.parse()?;
                    let response = client.instance_status(&application).await?;
                    println!("{}: {:?}", response.reference, response.status);
                }
                AppCommands::Suspend { application } => {
                    let application: ApplicationReference = application.parse()?;
                    client.suspend_instance(&application).await?;
                    println!("Suspended: {}", application);
                }
                AppCommands::Resume { application } => {
                    let application: ApplicationReference = application.parse()?;
                    client.resume_instance(&application).await?;
                    println!("Resumed: {}", application);
                }
                AppCommands::Quiescent { application } => {
                    let application: ApplicationReference = application.parse()?;
                    let quiescent = client.is_quiescent(&application).await?;
                    println!("{}: {}", application, if quiescent { "quiescent" } else { "busy" });
                    if !quiescent {
                        std::process::exit(1);
                    }
                }
                AppCommands::Suspended => {
                    for application in client.suspended_instances().await? {
                        println!("{}", application);
                    }
                }
            }
        }

        Commands::Version => {
            println!("Orchestrator v{}", env!("CARGO_PKG_VERSION"));
            println!("Policy-gated suspension of hosts and application instances");
        }
    }

    Ok(())
}
