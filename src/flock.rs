use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

#[cfg(windows)]
use std::os::windows::io::AsRawHandle;

/// Whole-buffer mutual exclusion shared by every process that opens the same
/// lock file. The in-process mutex serializes threads holding this handle,
/// the OS file lock serializes processes.
#[derive(Debug)]
pub struct BufferLock {
    file: Mutex<File>,
    path: PathBuf,
}

/// Held while the lock is owned. Dropping it releases the lock.
#[derive(Debug)]
pub struct BufferLockGuard<'a> {
    file: MutexGuard<'a, File>,
}

impl BufferLock {
    /// Opens (creating if needed) the lock file. Does not acquire the lock.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Blocks until the lock is acquired.
    pub fn acquire(&self) -> Result<BufferLockGuard<'_>> {
        let file = self.file.lock().map_err(|_| Error::MutexPoisoned)?;
        Self::lock_file(&file, true).map_err(Error::LockError)?;
        Ok(BufferLockGuard { file })
    }

    /// Acquires the lock if no other holder has it.
    pub fn try_acquire(&self) -> Result<Option<BufferLockGuard<'_>>> {
        let file = match self.file.try_lock() {
            Ok(file) => file,
            Err(std::sync::TryLockError::WouldBlock) => return Ok(None),
            Err(std::sync::TryLockError::Poisoned(_)) => return Err(Error::MutexPoisoned),
        };

        match Self::lock_file(&file, false) {
            Ok(()) => Ok(Some(BufferLockGuard { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::LockError(e)),
        }
    }

    /// Get the path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn lock_file(file: &File, blocking: bool) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let flags = if blocking { LOCK_EX } else { LOCK_EX | LOCK_NB };
        loop {
            let result = unsafe { flock(fd, flags) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    #[cfg(unix)]
    fn unlock_file(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_UN};

        let result = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    fn lock_file(file: &File, blocking: bool) -> io::Result<()> {
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};

        let mut flags = LOCKFILE_EXCLUSIVE_LOCK;
        if !blocking {
            flags |= LOCKFILE_FAIL_IMMEDIATELY;
        }
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let result = unsafe {
            LockFileEx(file.as_raw_handle() as *mut _, flags, 0, !0, !0, &mut overlapped)
        };
        if result == 0 {
            let err = io::Error::last_os_error();
            // ERROR_LOCK_VIOLATION
            if err.raw_os_error() == Some(33) {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(windows)]
    fn unlock_file(file: &File) -> io::Result<()> {
        use winapi::um::fileapi::UnlockFileEx;
        use winapi::um::minwinbase::OVERLAPPED;

        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let result =
            unsafe { UnlockFileEx(file.as_raw_handle() as *mut _, 0, !0, !0, &mut overlapped) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn lock_file(_file: &File, _blocking: bool) -> io::Result<()> {
        // No cross-process lock on this platform; the mutex still covers threads.
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn unlock_file(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BufferLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = BufferLock::unlock_file(&self.file) {
            tracing::warn!(error = %e, "Failed to release buffer lock");
        }
    }
}
