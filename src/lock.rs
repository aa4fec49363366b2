/* Copyright (C) 2022 Antmicro
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::FlowError;
use crate::log::*;

pub const LOCK_FILE: &str = ".fpgaflow.lock";

/// Advisory lock on a project root, held until dropped. Only other `fpgaflow`
/// runs respect it.
pub struct ProjectLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl ProjectLock {
    /// Takes the lock without waiting; fails if another run holds it.
    pub fn acquire(root: &Path) -> Result<Self, FlowError> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                dbg_log!(DBG_EXTRA, "Locked {}", path.display());
                Ok(Self { path, _lock: lock })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(FlowError::Locked(format!(
                "another fpgaflow run is using {} (lock file {})",
                root.display(), path.display()
            ))),
            Err((_, errno)) => Err(FlowError::Io(std::io::Error::from(errno))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_fails_fast() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = ProjectLock::acquire(dir.path()).unwrap();
        assert!(first.path().is_file());

        assert!(matches!(ProjectLock::acquire(dir.path()), Err(FlowError::Locked(_))));
        drop(first);
        assert!(ProjectLock::acquire(dir.path()).is_ok());
    }
}
