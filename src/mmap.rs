//! POSIX shared-memory plumbing for inter-process rings.
//!
//! A ring segment is a `shm_open` object mapped with `MAP_SHARED`. Creation
//! and attachment share one path: `O_CREAT` without `O_EXCL` either creates
//! the object (zero-filled by `ftruncate`, so a fresh ring starts with all
//! counters at zero) or maps the existing one, whose counters are left
//! untouched so a new transmitter resumes from the observed tail.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

fn shm_name_cstring(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "shared-memory name must not contain NUL bytes",
        )
    })
}

/// Maps (creating if absent) the named shared-memory object at `len` bytes.
///
/// The name must follow POSIX rules: it starts with `'/'` and contains no
/// other `'/'`. The returned mapping stays valid until
/// [`unmap_shared_memory`]; the object itself persists until
/// [`unlink_shared_memory`].
pub(crate) fn map_shared_memory(name: &str, len: usize) -> io::Result<NonNull<u8>> {
    let c_name = shm_name_cstring(name)?;

    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    let addr = unsafe {
        if libc::ftruncate(fd, len as libc::off_t) == -1 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let addr = libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        // The mapping keeps the object alive without the descriptor.
        libc::close(fd);

        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        addr
    };

    NonNull::new(addr as *mut u8)
        .ok_or_else(|| io::Error::other("mmap returned a null address"))
}

/// Unmaps a region previously returned by [`map_shared_memory`].
///
/// # Safety
///
/// `ptr` and `len` must be exactly the values the mapping was created with,
/// and no view derived from the mapping may be used afterwards.
pub(crate) unsafe fn unmap_shared_memory(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    if unsafe { libc::munmap(ptr.as_ptr().cast(), len) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Removes the named shared-memory object.
///
/// Existing mappings stay usable; the name becomes available for a fresh
/// segment.
pub(crate) fn unlink_shared_memory(name: &str) -> io::Result<()> {
    let c_name = shm_name_cstring(name)?;
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
