use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use ssm2_lib::pipeline::ShutdownFlag;
use ssm2_lib::sink::{CsvSink, NdjsonSink, SampleSink};
use ssm2_lib::InitResponse;

use crate::{LogArgs, LogFormat};

const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub type BoxedSink = Box<dyn SampleSink + Send>;

/// Removes the socket file when the session ends.
pub struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "Removed unix socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), "Failed to remove unix socket: {}", e),
        }
    }
}

/// `<dir>/<romid>-<unix ts>-log.csv`
pub fn csv_log_path(dir: &Path, init: &InitResponse) -> PathBuf {
    dir.join(format!("{}-{}-log.csv", init.rom_id_hex(), chrono::Utc::now().timestamp()))
}

/// Open the sink selected on the command line.
///
/// `None` means a stop was requested while waiting for a socket client.
pub fn open_sink(
    args: &LogArgs,
    init: &InitResponse,
    shutdown: &ShutdownFlag,
) -> Result<Option<(BoxedSink, Option<SocketFile>)>> {
    if let Some(ref path) = args.unix_socket {
        let socket = SocketFile(path.clone());
        let Some(stream) = accept_one(path, shutdown)? else {
            return Ok(None);
        };
        let sink: BoxedSink = Box::new(NdjsonSink::new(stream));
        return Ok(Some((sink, Some(socket))));
    }

    let sink: BoxedSink = match args.format {
        LogFormat::Csv => {
            let path = csv_log_path(&args.logfile_path, init);
            let file = File::create(&path).with_context(|| format!("Failed to create CSV log at: {:?}", path))?;
            info!(path = %path.display(), "Writing CSV log");
            Box::new(CsvSink::new(BufWriter::new(file)))
        }
        LogFormat::Ndjson => Box::new(NdjsonSink::new(io::stdout())),
    };
    Ok(Some((sink, None)))
}

fn accept_one(path: &Path, shutdown: &ShutdownFlag) -> Result<Option<std::os::unix::net::UnixStream>> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale unix socket"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to remove stale socket at: {:?}", path)),
    }

    let listener = UnixListener::bind(path).with_context(|| format!("Failed to bind unix socket at: {:?}", path))?;
    listener.set_nonblocking(true)?;
    info!(path = %path.display(), "Waiting for a client on unix socket");

    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                info!("Client connected");
                return Ok(Some(stream));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if shutdown.is_requested() {
                    return Ok(None);
                }
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => return Err(e).context("Failed to accept unix socket client"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_log_path() {
        let init = InitResponse {
            ssm_id: vec![0xA2, 0x10, 0x11],
            rom_id: vec![0x3A, 0x54, 0x50, 0x40, 0x07],
            capabilities: vec![],
        };
        let path = csv_log_path(Path::new("/tmp/logs"), &init);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(path.starts_with("/tmp/logs"));
        assert!(name.starts_with("3a54504007-"), "got {}", name);
        assert!(name.ends_with("-log.csv"), "got {}", name);
    }

    #[test]
    fn test_accept_gives_up_on_shutdown() {
        let path = std::env::temp_dir().join(format!("ssm2-accept-{}.sock", std::process::id()));
        std::fs::write(&path, b"stale").unwrap();

        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let _socket = SocketFile(path.clone());
        assert!(accept_one(&path, &shutdown).unwrap().is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_socket_file_removed_on_drop() {
        let path = std::env::temp_dir().join(format!("ssm2-drop-{}.sock", std::process::id()));
        std::fs::write(&path, b"").unwrap();
        drop(SocketFile(path.clone()));
        assert!(!path.exists());
        drop(SocketFile(path));
    }
}
