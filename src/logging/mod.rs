use std::{
    io::{self, Write},
    path::Path,
    str::FromStr,
};

use async_trait::async_trait;
use env_logger::Builder;
use log::LevelFilter;
use pingora::{
    server::{ListenFds, ShutdownWatch},
    services::Service,
};
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::config;

/// `io::Write` half handed to env_logger; lines are forwarded to the sink.
pub struct ChannelWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log sink stopped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File sink for coordinator logs, run as a pingora service so writes
/// never block the handlers.
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver,
            config,
        }
    }

    pub fn writer(&self) -> ChannelWriter {
        ChannelWriter {
            sender: self.sender.clone(),
        }
    }

    fn level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.config.level).unwrap_or(LevelFilter::Info)
    }

    /// Install env_logger with this sink as its target.
    ///
    /// `RUST_LOG` still takes precedence over the configured level.
    pub fn init_env_logger(&self) {
        Builder::new()
            .filter_level(self.level())
            .parse_env(env_logger::Env::default())
            .target(env_logger::Target::Pipe(Box::new(self.writer())))
            .init();
    }

    async fn open(path: &str) -> io::Result<BufWriter<File>> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl Service for Logger {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut file = match Self::open(&self.config.path).await {
            Ok(file) => file,
            Err(e) => {
                eprintln!("routerflow: cannot open log file {}: {e}", self.config.path);
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },
                line = self.receiver.recv() => {
                    let Some(line) = line else { break };
                    if let Err(e) = file.write_all(&line).await {
                        eprintln!("routerflow: log write failed: {e}");
                    }
                }
            }
        }

        // whatever was queued before shutdown
        while let Ok(line) = self.receiver.try_recv() {
            if file.write_all(&line).await.is_err() {
                break;
            }
        }
        if let Err(e) = file.flush().await {
            eprintln!("routerflow: log flush failed: {e}");
        }
    }

    fn name(&self) -> &'static str {
        "routerflow log"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}
