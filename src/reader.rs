//! Reader for join trees produced by an external planner.
//!
//! A planner may print several trees, each better than the last, terminated
//! by `=`. The reader keeps the last complete one: when a tree is cut short
//! (because the planner was stopped, or the stream ended), the previous
//! complete tree is restored.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::cnf::STDIN_PATH;
use crate::error::{Error, Result};
use crate::join::JoinTree;
use crate::types::Var;

/// How long to keep draining input after the planner was asked to stop.
const TERMINATION_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct JoinTreeReader {
    tree: Option<JoinTree>,
    /// Last complete tree, restored if the current one turns out incomplete.
    backup: Option<JoinTree>,
    line_index: usize,
    problem_line: Option<usize>,
    tree_end_line: Option<usize>,
    planner_pid: Option<u32>,
}

impl JoinTreeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn planner_pid(&self) -> Option<u32> {
        self.planner_pid
    }

    /// Read a whole stream, then finalize.
    pub fn read(reader: impl BufRead) -> Result<JoinTree> {
        let mut jt_reader = Self::new();
        for line in reader.lines() {
            jt_reader.read_line(&line?)?;
        }
        jt_reader.finish()?;
        jt_reader.into_tree()
    }

    /// Read a live stream until it ends or `wait` expires.
    ///
    /// On expiry the planner (if it announced its pid) is sent `SIGTERM`, and
    /// whatever it prints within a short grace period is still read.
    pub fn read_with_deadline<R>(reader: R, wait: Duration) -> Result<JoinTree>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in reader.lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        let mut jt_reader = Self::new();
        let deadline = Instant::now() + wait;
        let mut expired = false;
        loop {
            let timeout = if expired {
                TERMINATION_GRACE
            } else {
                deadline.saturating_duration_since(Instant::now())
            };
            match rx.recv_timeout(timeout) {
                Ok(line) => jt_reader.read_line(&line?)?,
                Err(RecvTimeoutError::Timeout) if expired => {
                    warn!("Planner output did not end within the grace period");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Join tree wait of {:?} expired", wait);
                    expired = true;
                    jt_reader.terminate_planner();
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        jt_reader.finish()?;
        jt_reader.into_tree()
    }

    /// Read a join tree file, or a live planner on stdin for `-`.
    pub fn from_path(path: impl AsRef<Path>, wait: Duration) -> Result<JoinTree> {
        let path = path.as_ref();
        if path == Path::new(STDIN_PATH) {
            info!("Reading join tree from stdin (waiting up to {:?})...", wait);
            Self::read_with_deadline(BufReader::new(io::stdin()), wait)
        } else {
            info!("Reading join tree from '{}'...", path.display());
            Self::read(BufReader::new(File::open(path)?))
        }
    }

    #[cfg(unix)]
    fn terminate_planner(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.planner_pid else {
            warn!("No planner pid was announced; cannot stop the planner");
            return;
        };
        // Pid 0 would signal our own process group.
        let Some(raw) = i32::try_from(pid).ok().filter(|&raw| raw > 0) else {
            warn!("Planner pid {} is not a valid process id", pid);
            return;
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => info!("Sent SIGTERM to planner (pid {})", pid),
            Err(errno) => warn!("Could not stop planner (pid {}): {}", pid, errno),
        }
    }

    #[cfg(not(unix))]
    fn terminate_planner(&self) {
        warn!("Stopping the planner (pid {:?}) is only supported on Unix", self.planner_pid);
    }

    /// Consume one line of planner output.
    pub fn read_line(&mut self, text: &str) -> Result<()> {
        self.line_index += 1;
        let line = self.line_index;
        let words: Vec<&str> = text.split_whitespace().collect();
        let Some(&start) = words.first() else {
            return Ok(());
        };

        match start {
            "=" => self.finish(),
            "p" => self.read_problem(line, &words),
            "c" => {
                self.read_comment(line, &words);
                Ok(())
            }
            _ => self.read_branch(line, &words),
        }
    }

    fn read_problem(&mut self, line: usize, words: &[&str]) -> Result<()> {
        if let Some(first) = self.problem_line {
            return Err(Error::parse(line, format!("multiple problem lines: {} and {}", first, line)));
        }
        self.problem_line = Some(line);

        if words.len() != 5 {
            return Err(Error::parse(line, format!("problem line has {} words (should be 5)", words.len())));
        }
        if words[1] != "jt" {
            return Err(Error::parse(line, format!("expected 'jt', found '{}'", words[1])));
        }
        let var_count = parse_index(line, words[2])?;
        let clause_count = parse_index(line, words[3])?;
        let node_count = parse_index(line, words[4])?;

        self.backup = self.tree.take();
        self.tree = Some(JoinTree::declared(var_count, clause_count, node_count));
        Ok(())
    }

    fn read_comment(&mut self, line: usize, words: &[&str]) {
        if words.len() != 3 {
            return;
        }
        match words[1] {
            "pid" => match words[2].parse() {
                Ok(pid) => self.planner_pid = Some(pid),
                Err(_) => warn!("line {}: ignoring malformed planner pid '{}'", line, words[2]),
            },
            "seconds" => match (words[2].parse(), self.tree.as_mut()) {
                (Ok(seconds), Some(tree)) => tree.set_planner_seconds(seconds),
                (Err(_), _) => warn!("line {}: ignoring malformed planner time '{}'", line, words[2]),
                _ => {}
            },
            _ => {}
        }
    }

    fn read_branch(&mut self, line: usize, words: &[&str]) -> Result<()> {
        let tree = match (self.problem_line, self.tree.as_mut()) {
            (Some(_), Some(tree)) => tree,
            _ => {
                let mut message = "no problem line before branch line".to_string();
                if let Some(end) = self.tree_end_line {
                    message += &format!(" (last complete join tree ends on line {})", end);
                }
                return Err(Error::parse(line, message));
            }
        };

        let parent = parse_index(line, words[0])?
            .checked_sub(1)
            .filter(|&p| p >= tree.terminal_count())
            .ok_or_else(|| Error::parse(line, format!("wrong branch node index '{}'", words[0])))?;

        let mut children = Vec::new();
        let mut projectable = std::collections::BTreeSet::new();
        let mut reading_vars = false;
        for &word in &words[1..] {
            if word == "e" {
                reading_vars = true;
                continue;
            }
            let num = parse_index(line, word)?;
            if reading_vars {
                if num == 0 || num > tree.declared_var_count() {
                    return Err(Error::parse(
                        line,
                        format!("variable {} is out of range 1..={}", num, tree.declared_var_count()),
                    ));
                }
                let id = u32::try_from(num)
                    .map_err(|_| Error::parse(line, format!("variable {} is out of the 32-bit range", num)))?;
                projectable.insert(Var::new(id));
            } else {
                if num == 0 || num - 1 >= parent {
                    return Err(Error::parse(line, format!("child '{}' is wrong", word)));
                }
                children.push(num - 1);
            }
        }

        tree.add_nonterminal(children, projectable, Some(parent))
            .map_err(|e| Error::parse(line, e.to_string()))?;
        Ok(())
    }

    /// Close the current tree, restoring the backup if the current tree is incomplete.
    pub fn finish(&mut self) -> Result<()> {
        let line = self.line_index;
        let Some(tree) = &self.tree else {
            return Err(Error::NoJoinTree);
        };

        let missing = tree.missing_nonterminals();
        if missing > 0 {
            warn!(
                "Join tree ending on line {} misses {} branch nodes ({} found)",
                line,
                missing,
                tree.nonterminal_count()
            );
            match (self.tree_end_line, self.backup.take()) {
                (Some(end), Some(backup)) => {
                    warn!("Restoring the join tree ending on line {}", end);
                    self.tree = Some(backup);
                }
                _ => return Err(Error::NoUsableJoinTree),
            }
        } else {
            debug!("Finished join tree ending on line {}", line);
        }

        if let Some(seconds) = self.tree.as_ref().and_then(|t| t.planner_seconds()) {
            info!("Planner time of the join tree: {} s", seconds);
        }
        self.tree_end_line = Some(line);
        self.problem_line = None;
        Ok(())
    }

    pub fn into_tree(self) -> Result<JoinTree> {
        self.tree.ok_or(Error::NoJoinTree)
    }
}

fn parse_index(line: usize, word: &str) -> Result<usize> {
    word.parse()
        .map_err(|_| Error::parse(line, format!("invalid number '{}'", word)))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use test_log::test;

    use super::*;
    use crate::join::JoinNode;

    const TREE: &str = "c pid 4242\np jt 3 3 5\n4 1 2 e 1\n5 4 3 e 2 3\nc seconds 0.5\n=\n";

    #[test]
    fn test_read_complete() -> Result<()> {
        let tree = JoinTreeReader::read(TREE.as_bytes())?;
        assert_eq!(tree.root(), Some(4));
        assert_eq!(tree.node(3).map(|n| n.children().to_vec()), Some(vec![0, 1]));
        assert_eq!(tree.planner_seconds(), Some(0.5));
        assert_eq!(tree.to_string(), "p jt 3 3 5\n4 1 2 e 1\n5 4 3 e 2 3\n=\n");
        Ok(())
    }

    #[test]
    fn test_pid() -> Result<()> {
        let mut reader = JoinTreeReader::new();
        for line in TREE.lines() {
            reader.read_line(line)?;
        }
        assert_eq!(reader.planner_pid(), Some(4242));
        Ok(())
    }

    #[test]
    fn test_without_end_marker() -> Result<()> {
        let tree = JoinTreeReader::read("p jt 2 1 2\n2 1 e 1 2\n".as_bytes())?;
        assert_eq!(tree.root(), Some(1));
        Ok(())
    }

    #[test]
    fn test_truncated_without_backup() {
        let res = JoinTreeReader::read("p jt 3 3 5\n4 1 2 e 1\n".as_bytes());
        assert!(matches!(res, Err(Error::NoUsableJoinTree)));
    }

    #[test]
    fn test_truncated_with_backup() -> Result<()> {
        let text = format!("{}p jt 3 3 6\n4 1 e\n", TREE);
        let tree = JoinTreeReader::read(text.as_bytes())?;
        // The first tree is back.
        assert_eq!(tree.node_count(), 5);
        match tree.node(4) {
            Some(JoinNode::Nonterminal { children, .. }) => assert_eq!(children, &vec![3, 2]),
            other => panic!("unexpected root {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_later_tree_replaces_earlier() -> Result<()> {
        let text = format!("{}p jt 3 3 4\n4 1 2 3 e 1 2 3\n=\n", TREE);
        let tree = JoinTreeReader::read(text.as_bytes())?;
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.root(), Some(3));
        Ok(())
    }

    #[test]
    fn test_multiple_problem_lines() {
        let res = JoinTreeReader::read("p jt 3 3 5\np jt 3 3 5\n".as_bytes());
        assert!(matches!(res, Err(Error::Parse { line: 2, .. })));
    }

    #[test]
    fn test_malformed_lines() {
        let cases = [
            "4 1 2 e 1\n",
            "p jt 3 3 5\n2 1 e\n",
            "p jt 3 3 5\n4 4 e\n",
            "p jt 3 3 5\n4 1 e 4\n",
            "p jt 3 3 5\n6 1 e\n",
            "p tw 3 3 5\n",
            "p jt 3 3\n",
        ];
        for text in cases {
            let res = JoinTreeReader::read(text.as_bytes());
            println!("{:?} -> {:?}", text, res);
            assert!(matches!(res, Err(Error::Parse { .. })), "{:?}", text);
        }
    }

    #[test]
    fn test_empty_input() {
        let res = JoinTreeReader::read("c nothing\n".as_bytes());
        assert!(matches!(res, Err(Error::NoJoinTree)));
    }

    /// Yields its text, then blocks like a planner that keeps thinking.
    struct StalledPlanner {
        text: Option<Vec<u8>>,
    }

    impl Read for StalledPlanner {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.text.take() {
                Some(text) => {
                    buf[..text.len()].copy_from_slice(&text);
                    Ok(text.len())
                }
                None => {
                    thread::sleep(Duration::from_secs(60));
                    Ok(0)
                }
            }
        }
    }

    #[test]
    fn test_deadline() -> Result<()> {
        let planner = StalledPlanner {
            text: Some("p jt 2 1 2\n2 1 e 1 2\n=\n".as_bytes().to_vec()),
        };
        let start = Instant::now();
        let tree = JoinTreeReader::read_with_deadline(BufReader::new(planner), Duration::from_millis(100))?;
        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(tree.root(), Some(1));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_stops_planner() -> Result<()> {
        use std::os::unix::process::ExitStatusExt;
        use std::process::{Command, Stdio};

        // The shell announces its own pid, then becomes a planner that never finishes.
        let mut planner = Command::new("sh")
            .arg("-c")
            .arg("echo \"c pid $$\"; printf 'p jt 2 1 2\\n2 1 e 1 2\\n=\\n'; exec sleep 30")
            .stdout(Stdio::piped())
            .spawn()?;
        let Some(stdout) = planner.stdout.take() else {
            panic!("planner stdout is not piped");
        };

        let start = Instant::now();
        let tree = JoinTreeReader::read_with_deadline(BufReader::new(stdout), Duration::from_millis(500))?;
        assert_eq!(tree.root(), Some(1));

        let status = planner.wait()?;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));
        Ok(())
    }

    #[test]
    fn test_variable_beyond_32_bits() {
        let text = "p jt 5000000000 1 2\n2 1 e 4294967297\n=\n";
        let res = JoinTreeReader::read(text.as_bytes());
        assert!(matches!(res, Err(Error::Parse { line: 2, .. })), "{:?}", res);
    }
}
