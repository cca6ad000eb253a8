use clap::Parser;
use std::path::PathBuf;

/// Launch Dashboard - start, stop and watch local dev servers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 3003)]
    pub port: u16,

    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// JSON file holding the server definitions
    #[arg(short = 'd', long, env = "DATA_FILE", default_value = "data/servers.json")]
    pub data_file: PathBuf,

    /// Skip starting servers flagged autoStart at boot
    #[arg(long, env = "NO_AUTO_START")]
    pub no_auto_start: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = CommandArgs::try_parse_from([
            "launch-dashboard",
            "-p",
            "8080",
            "--data-file",
            "/tmp/s.json",
            "--no-auto-start",
        ])
        .unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.data_file, PathBuf::from("/tmp/s.json"));
        assert!(args.no_auto_start);
    }
}
