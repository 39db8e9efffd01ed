//! Child processes that an interrupt has to stop before the scratch directory
//! can be removed.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::process::{Child, Command, Output};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Running children, by pid. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct Processes {
    running: Arc<Mutex<BTreeMap<u32, Child>>>,
}
impl Processes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`Command::output`], except that the child stays reachable from
    /// [`kill_all`](Self::kill_all) until it exits. Stdout is not captured.
    pub fn output(&self, command: &mut Command) -> io::Result<Output> {
        let mut child = command.spawn()?;
        let pid = child.id();
        let stderr = child.stderr.take();
        self.lock().insert(pid, child);
        let mut captured = Vec::new();
        let read = match stderr {
            Some(mut pipe) => pipe.read_to_end(&mut captured).map(drop),
            None => Ok(()),
        };
        if let Err(err) = read {
            if let Some(mut child) = self.lock().remove(&pid) {
                _ = child.kill();
                _ = child.wait();
            }
            return Err(err);
        }
        let status = loop {
            let mut running = self.lock();
            let Some(child) = running.get_mut(&pid) else {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "child process was killed"));
            };
            if let Some(status) = child.try_wait()? {
                running.remove(&pid);
                break status;
            }
            drop(running);
            std::thread::sleep(POLL_INTERVAL);
        };
        Ok(Output { status, stdout: Vec::new(), stderr: captured })
    }

    /// Kills every running child and waits for it. Returns how many there were.
    pub fn kill_all(&self) -> usize {
        let children = std::mem::take(&mut *self.lock());
        let count = children.len();
        for (_, mut child) in children {
            _ = child.kill();
            _ = child.wait();
        }
        count
    }

    pub fn running(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, Child>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
