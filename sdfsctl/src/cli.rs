use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub(crate) struct Args {
    /// sdfs endpoint, `sdfs:host:port[/path]`
    #[arg(long, env = "SDFS_URI")]
    pub(crate) uri: Option<String>,

    /// Local directory serving the sdfs namespace
    #[arg(long, env = "SDFS_ROOT", default_value = "/var/lib/sdfs")]
    pub(crate) root: PathBuf,

    /// YAML environment config
    #[arg(short, long, env = "SDFS_ENV_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    #[command(about = "List the entries of a directory")]
    Ls {
        #[arg(value_name = "DIR", default_value = "/")]
        dir: String,
    },
    #[command(about = "Print a file to stdout")]
    Cat {
        #[arg(value_name = "FILE")]
        file: String,
    },
    #[command(about = "Copy a local file into sdfs")]
    Put {
        #[arg(value_name = "LOCAL")]
        local: PathBuf,
        #[arg(value_name = "REMOTE")]
        remote: String,
    },
    #[command(about = "Create a directory if it is missing")]
    Mkdir {
        #[arg(value_name = "DIR")]
        dir: String,
    },
    #[command(about = "Delete a file")]
    Rm {
        #[arg(value_name = "FILE")]
        file: String,
    },
    #[command(about = "Delete a directory and everything below it")]
    Rmdir {
        #[arg(value_name = "DIR")]
        dir: String,
    },
    #[command(about = "Rename a file, replacing the target")]
    Mv {
        #[arg(value_name = "SRC")]
        src: String,
        #[arg(value_name = "DST")]
        dst: String,
    },
    #[command(about = "Show size and modification time")]
    Stat {
        #[arg(value_name = "PATH")]
        path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from([
            "sdfsctl",
            "--uri",
            "sdfs:nn:9000",
            "--root",
            "/tmp/sdfs",
            "mv",
            "/db/a",
            "/db/b",
        ])
        .unwrap();
        assert_eq!(args.uri.as_deref(), Some("sdfs:nn:9000"));
        assert_eq!(args.root, PathBuf::from("/tmp/sdfs"));
        assert_eq!(
            args.command,
            Command::Mv {
                src: "/db/a".into(),
                dst: "/db/b".into()
            }
        );

        let args = Args::try_parse_from(["sdfsctl", "--root", "/r", "ls"]).unwrap();
        assert_eq!(args.command, Command::Ls { dir: "/".into() });
        assert!(Args::try_parse_from(["sdfsctl", "put", "only-one"]).is_err());
    }
}
