use crate::cli::Command;
use anyhow::{Context, Result};
use sdfs_env::{Env, EnvOptions};
use std::fs::File;
use std::io::{Read, Write};
use tracing::info;

const COPY_CHUNK: usize = 64 * 1024;

pub(crate) fn run(env: &dyn Env, command: &Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Ls { dir } => {
            let mut children = env
                .get_children(dir)
                .with_context(|| format!("Failed to list {dir}"))?;
            children.sort();
            for name in children {
                writeln!(out, "{name}")?;
            }
        }
        Command::Cat { file } => {
            let mut reader = env
                .new_sequential_file(file, &EnvOptions::default())
                .with_context(|| format!("Failed to open {file}"))?;
            let mut buf = vec![0u8; COPY_CHUNK];
            loop {
                let n = reader.read(&mut buf)?;
                out.write_all(&buf[..n])?;
                if n < buf.len() {
                    break;
                }
            }
        }
        Command::Put { local, remote } => {
            let mut src = File::open(local)
                .with_context(|| format!("Failed to open {}", local.display()))?;
            let mut writer = env
                .new_writable_file(remote, &EnvOptions::default())
                .with_context(|| format!("Failed to create {remote}"))?;
            let mut buf = vec![0u8; COPY_CHUNK];
            let mut copied = 0u64;
            loop {
                let n = src.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.append(&buf[..n])?;
                copied += n as u64;
            }
            writer.sync()?;
            writer.close()?;
            info!(remote = remote.as_str(), bytes = copied, "upload finished");
        }
        Command::Mkdir { dir } => env
            .create_dir_if_missing(dir)
            .with_context(|| format!("Failed to create {dir}"))?,
        Command::Rm { file } => env
            .delete_file(file)
            .with_context(|| format!("Failed to delete {file}"))?,
        Command::Rmdir { dir } => env
            .delete_dir(dir)
            .with_context(|| format!("Failed to delete {dir}"))?,
        Command::Mv { src, dst } => env
            .rename_file(src, dst)
            .with_context(|| format!("Failed to rename {src} to {dst}"))?,
        Command::Stat { path } => {
            let size = env.get_file_size(path)?;
            let mtime = env.get_file_modification_time(path)?;
            writeln!(out, "{path}\tsize={size}\tmtime={}", env.time_to_string(mtime))?;
        }
    }
    Ok(())
}
