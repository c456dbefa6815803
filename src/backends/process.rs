//! External discovery tools (fd, rg)
//!
//! Spawns one tool process per root with the root as working directory and
//! turns its newline-delimited relative paths into absolute items.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backends::session::{CancelHandle, SessionState};
use crate::backends::{Backend, DoneCallback, ItemCallback, Scan};
use crate::core::model::{DiscoveredItem, ScanOptions, ScanRoot};
use crate::core::paths::strip_dot_prefix;
use crate::core::util::find_executable;

const READ_CHUNK: usize = 64 * 1024;

/// An external file discovery tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTool {
    Fd,
    Rg,
}

impl ExternalTool {
    /// Executable names to probe, in order. Debian ships fd as `fdfind`.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            ExternalTool::Fd => &["fd", "fdfind"],
            ExternalTool::Rg => &["rg"],
        }
    }

    /// Find the tool in PATH
    pub fn locate(self) -> Option<PathBuf> {
        self.candidates()
            .iter()
            .find_map(|name| find_executable(name))
    }

    pub fn backend(self) -> Backend {
        match self {
            ExternalTool::Fd => Backend::Fd,
            ExternalTool::Rg => Backend::Rg,
        }
    }

    /// Command-line flags equivalent to `options`
    pub fn args(self, options: &ScanOptions) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            ExternalTool::Fd => {
                args.extend(["--type", "f", "--color", "never"].map(String::from));
            }
            ExternalTool::Rg => {
                args.extend(["--files", "--color", "never"].map(String::from));
            }
        }

        if options.show_hidden {
            args.push("--hidden".to_string());
        }
        if options.follow_symlinks {
            args.push("--follow".to_string());
        }
        if !options.respect_ignore {
            args.push("--no-ignore".to_string());
        }

        for pattern in &options.exclude {
            match self {
                ExternalTool::Fd => {
                    args.push("--exclude".to_string());
                    args.push(pattern.clone());
                }
                ExternalTool::Rg => {
                    args.push("--glob".to_string());
                    args.push(format!("!{}", pattern));
                }
            }
        }

        if let Some(depth) = options.max_depth {
            args.push("--max-depth".to_string());
            args.push(depth.to_string());
        }

        args
    }
}

/// Splits a byte stream into lines across arbitrary chunk boundaries.
///
/// Incomplete trailing bytes are held until the next chunk or until
/// [`finish`](LineSplitter::finish) flushes them.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk and return every line it completes (empty lines dropped)
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;
        for (i, byte) in chunk.iter().enumerate() {
            if *byte == b'\n' {
                self.pending.extend_from_slice(&chunk[start..i]);
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
                start = i + 1;
            }
        }
        self.pending.extend_from_slice(&chunk[start..]);
        lines
    }

    /// Flush whatever is left after the stream ends
    pub fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Scanner backed by an external tool
pub struct ProcessScanner {
    tool: ExternalTool,
    program: PathBuf,
    args: Arc<Vec<String>>,
    roots: Vec<ScanRoot>,
}

impl ProcessScanner {
    pub fn new(tool: ExternalTool, program: PathBuf, options: &ScanOptions, roots: Vec<ScanRoot>) -> Self {
        Self {
            tool,
            program,
            args: Arc::new(tool.args(options)),
            roots,
        }
    }
}

impl Scan for ProcessScanner {
    fn backend(&self) -> Backend {
        self.tool.backend()
    }

    fn start(&self, on_item: ItemCallback, on_done: DoneCallback) -> CancelHandle {
        let session = SessionState::new(self.backend(), self.roots.len(), on_item, on_done);
        for root in &self.roots {
            tokio::spawn(stream_root(
                self.program.clone(),
                self.args.clone(),
                root.path().to_path_buf(),
                session.clone(),
            ));
        }
        CancelHandle::new(session)
    }
}

/// Run the tool for one root, emitting items until it exits or the session
/// is cancelled. Always marks the root done exactly once.
async fn stream_root(program: PathBuf, args: Arc<Vec<String>>, root: PathBuf, session: Arc<SessionState>) {
    if session.is_cancelled() {
        session.unit_done();
        return;
    }

    let mut command = Command::new(&program);
    command
        .args(args.iter())
        .current_dir(&root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %program.display(), root = %root.display(), error = %e, "failed to spawn scan tool");
            session.unit_done();
            return;
        }
    };

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.wait().await;
        session.unit_done();
        return;
    };

    let mut splitter = LineSplitter::default();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            biased;
            _ = session.token().cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                debug!(root = %root.display(), "scan tool killed");
                session.unit_done();
                return;
            }
            read = stdout.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    if !emit_line(&session, &root, &line) {
                        break;
                    }
                }
            }
            Err(e) => {
                debug!(root = %root.display(), error = %e, "scan tool read failed");
                break;
            }
        }
    }

    if let Some(line) = splitter.finish() {
        emit_line(&session, &root, &line);
    }

    // Exit status is irrelevant: a nonzero exit still means this root is done
    match child.wait().await {
        Ok(status) if !status.success() => {
            debug!(root = %root.display(), %status, "scan tool exited with failure");
        }
        Ok(_) => {}
        Err(e) => debug!(root = %root.display(), error = %e, "failed to reap scan tool"),
    }
    session.unit_done();
}

fn emit_line(session: &SessionState, root: &Path, line: &str) -> bool {
    let relative = strip_dot_prefix(line);
    if relative.is_empty() {
        return !session.is_cancelled();
    }
    session.emit(DiscoveredItem::file_under(root, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::collect;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_splitter_across_chunks() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.push(b"a.t"), Vec::<String>::new());
        assert_eq!(splitter.push(b"xt\nsub/b"), vec!["a.txt"]);
        assert_eq!(splitter.push(b".txt\n"), vec!["sub/b.txt"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_flushes_trailing_line() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.push(b"one\ntwo"), vec!["one"]);
        assert_eq!(splitter.finish(), Some("two".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_crlf_and_blank_lines() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.push(b"one\r\n\r\n\ntwo\r"), vec!["one"]);
        assert_eq!(splitter.push(b"\n"), vec!["two"]);
    }

    #[test]
    fn test_splitter_newline_at_chunk_start() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"abc").is_empty());
        assert_eq!(splitter.push(b"\ndef"), vec!["abc"]);
        assert_eq!(splitter.finish(), Some("def".to_string()));
    }

    #[test]
    fn test_fd_args() {
        let options = ScanOptions {
            show_hidden: true,
            follow_symlinks: true,
            respect_ignore: false,
            exclude: vec!["target".to_string(), "*.log".to_string()],
            max_depth: Some(3),
            ..ScanOptions::default()
        };
        let args = ExternalTool::Fd.args(&options);
        assert_eq!(
            args,
            vec![
                "--type", "f", "--color", "never", "--hidden", "--follow", "--no-ignore",
                "--exclude", "target", "--exclude", "*.log", "--max-depth", "3",
            ]
        );
    }

    #[test]
    fn test_rg_args() {
        let options = ScanOptions {
            exclude: vec!["node_modules".to_string()],
            ..ScanOptions::default()
        };
        let args = ExternalTool::Rg.args(&options);
        assert_eq!(
            args,
            vec!["--files", "--color", "never", "--glob", "!node_modules"]
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_completes_root_empty() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        let roots = vec![ScanRoot::new(temp.path()).unwrap()];

        let scanner = ProcessScanner::new(
            ExternalTool::Fd,
            PathBuf::from("/nonexistent/trawl-missing-tool"),
            &ScanOptions::default(),
            roots,
        );
        let items = collect(&scanner).await;
        assert!(items.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_still_delivers_output() {
        // `sh -c` stands in for a tool that prints paths and then fails
        let temp = tempdir().unwrap();
        let roots = vec![ScanRoot::new(temp.path()).unwrap()];
        let scanner = ProcessScanner {
            tool: ExternalTool::Fd,
            program: PathBuf::from("sh"),
            args: Arc::new(vec![
                "-c".to_string(),
                "printf './a.txt\\nsub/b.txt'; exit 3".to_string(),
            ]),
            roots,
        };

        let items = collect(&scanner).await;
        let paths: Vec<_> = items.iter().map(|i| i.path.clone()).collect();
        assert_eq!(
            paths,
            vec![temp.path().join("a.txt"), temp.path().join("sub/b.txt")]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_stops_endless_tool() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::sync::oneshot;

        let one = tempdir().unwrap();
        let two = tempdir().unwrap();
        let scanner = ProcessScanner {
            tool: ExternalTool::Fd,
            program: PathBuf::from("sh"),
            args: Arc::new(vec![
                "-c".to_string(),
                "while true; do echo f.txt; done".to_string(),
            ]),
            roots: vec![
                ScanRoot::new(one.path()).unwrap(),
                ScanRoot::new(two.path()).unwrap(),
            ],
        };

        let items = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let first_tx = std::sync::Mutex::new(Some(first_tx));
        let items_cb = items.clone();
        let done_cb = done.clone();
        let handle = scanner.start(
            Arc::new(move |_| {
                items_cb.fetch_add(1, Ordering::SeqCst);
                if let Some(tx) = first_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            }),
            Box::new(move || {
                done_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        first_rx.await.unwrap();
        handle.cancel();
        let seen = items.load(Ordering::SeqCst);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(items.load(Ordering::SeqCst), seen);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fd_lists_files_when_available() {
        let Some(program) = ExternalTool::Fd.locate() else {
            return;
        };
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/b.txt"), "b").unwrap();

        let roots = vec![ScanRoot::new(temp.path()).unwrap()];
        let scanner = ProcessScanner::new(ExternalTool::Fd, program, &ScanOptions::default(), roots);
        let items = collect(&scanner).await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.path.is_absolute()));
    }
}
