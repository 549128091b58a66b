//! [`Args`] definitions.

use clap::Parser;

/// Server synchronizing carts between POS terminals and mobile clients.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Port to listen on, overriding the configured one.
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl Args {
    /// Parses command line arguments.
    ///
    /// # Errors
    ///
    /// Errors if failed to parse command line arguments.
    pub fn parse() -> Result<Self, clap::Error> {
        <Self as Parser>::try_parse()
    }
}

#[cfg(test)]
mod spec {
    use clap::Parser as _;

    use super::Args;

    #[test]
    fn defaults_config_path() {
        let args = Args::try_parse_from(["cart-sync"]).unwrap();

        assert_eq!(args.config, "config.toml");
        assert_eq!(args.port, None);
    }

    #[test]
    fn overrides_port() {
        let args =
            Args::try_parse_from(["cart-sync", "-c", "prod.toml", "--port", "9000"])
                .unwrap();

        assert_eq!(args.config, "prod.toml");
        assert_eq!(args.port, Some(9000));
    }
}
