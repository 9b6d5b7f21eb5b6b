//! Reads candidate proxy URLs from a local text file, one per
//! non-blank, non-`#`-prefixed line.

use crate::source::{Source, SourceBase};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct FileSource {
    base: Arc<SourceBase>,
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, fetch_cadence: Duration) -> Self {
        Self {
            base: Arc::new(SourceBase::new("file", fetch_cadence)),
            path: path.into(),
        }
    }
}

impl Source for FileSource {
    fn name(&self) -> String {
        self.base.name()
    }

    fn fetch(&self, cancel: CancellationToken) -> mpsc::Receiver<String> {
        self.base.stamp_fetch_start();
        let (tx, rx) = mpsc::channel(64);
        let path = self.path.clone();

        tokio::spawn(async move {
            let file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(source = "file", path = %path.display(), error = %e, "cannot open file source");
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    l = lines.next_line() => l,
                };
                match next {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() || trimmed.starts_with('#') {
                            continue;
                        }
                        if tx.send(trimmed.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(source = "file", error = %e, "read error");
                        break;
                    }
                }
            }
            // file handle dropped here on exit
        });

        rx
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn due_for_fetch(&self) -> bool {
        self.base.due_for_fetch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn emits_non_blank_non_comment_lines() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "1.2.3.4:1080").unwrap();
        writeln!(tmp).unwrap();
        writeln!(tmp, "# a comment").unwrap();
        writeln!(tmp, "5.6.7.8:1080").unwrap();

        let source = FileSource::new(tmp.path(), Duration::from_secs(60));
        let mut rx = source.fetch(CancellationToken::new());

        let mut got = Vec::new();
        while let Some(candidate) = rx.recv().await {
            got.push(candidate);
        }
        assert_eq!(got, vec!["1.2.3.4:1080", "5.6.7.8:1080"]);
    }
}
