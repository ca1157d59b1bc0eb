use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devup")]
#[command(about = "devup - Bring up a local development stack with its infrastructure")]
pub struct Cli {
    /// Registry file path (defaults to devup.yaml, searched upwards)
    #[arg(short, long, global = true)]
    pub registry: Option<PathBuf>,

    /// Working directory to search for the registry from
    #[arg(short, long, global = true)]
    pub workdir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start services with their dependencies and infrastructure
    Up {
        /// Services to start (defaults to every registered service)
        services: Vec<String>,

        /// Start only the named services and their infrastructure, assume
        /// the services they require are already running
        #[arg(long)]
        no_deps: bool,

        /// Start and provision infrastructure only
        #[arg(long)]
        infra_only: bool,

        /// Print the composition document without starting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Stop all containers, keeping them and their data
    Down,
    /// Restart services without restarting what they depend on
    Restart {
        /// Services to restart (defaults to all)
        services: Vec<String>,
    },
    /// Remove containers and the network
    Reset {
        /// Also remove named volumes (drops all data)
        #[arg(short = 'v', long)]
        volumes: bool,
    },
    /// Show container status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show container logs
    Logs {
        /// Service or infrastructure engine (defaults to everything)
        service: Option<String>,
        /// Number of lines to show
        #[arg(short = 'n', long)]
        tail: Option<usize>,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_up_flags() {
        let cli = Cli::try_parse_from(["devup", "up", "api", "--no-deps", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Up {
                services,
                no_deps,
                infra_only,
                dry_run,
            } => {
                assert_eq!(services, vec!["api"]);
                assert!(no_deps);
                assert!(!infra_only);
                assert!(dry_run);
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["devup", "reset", "-v", "-r", "/tmp/devup.yaml"]).unwrap();
        assert_eq!(cli.registry, Some(PathBuf::from("/tmp/devup.yaml")));
        assert!(matches!(cli.command, Commands::Reset { volumes: true }));
    }

    #[test]
    fn logs_target_is_optional() {
        let cli = Cli::try_parse_from(["devup", "logs", "-f", "-n", "20"]).unwrap();
        match cli.command {
            Commands::Logs {
                service,
                tail,
                follow,
            } => {
                assert_eq!(service, None);
                assert_eq!(tail, Some(20));
                assert!(follow);
            }
            _ => panic!("expected logs"),
        }
    }
}
