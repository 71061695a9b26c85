use {
    clap::{Parser, Subcommand},
    std::path::PathBuf,
};

#[derive(Debug, Parser)]
#[command(name = "farmer", about = "Genaro storage farmer")]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a farmer instance.
    Start {
        /// Path to the configuration file.
        #[arg(long, default_value = "./config.json")]
        config: PathBuf,
    },
    /// Write a configuration template with a freshly generated key.
    New {
        /// Where to write the template.
        #[arg(long, default_value = "./config.json")]
        config: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let args = Arguments::parse_from(["farmer", "start", "--config", "/etc/farmer.json"]);
        match args.command {
            Command::Start { config } => {
                assert_eq!(config, PathBuf::from("/etc/farmer.json"))
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let args = Arguments::parse_from(["farmer", "new"]);
        match args.command {
            Command::New { config } => assert_eq!(config, PathBuf::from("./config.json")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn bad_usage_is_a_parse_error() {
        assert!(Arguments::try_parse_from(["farmer"]).is_err());
        assert!(Arguments::try_parse_from(["farmer", "serve"]).is_err());
    }
}
