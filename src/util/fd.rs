use std::io;

/// Turn a libc return value into an `io::Result`, capturing `errno` on -1.
#[inline]
pub fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Like [`cvt`], but retries while the call is interrupted by a signal.
pub fn cvt_retry<F>(mut f: F) -> io::Result<libc::c_int>
where
    F: FnMut() -> libc::c_int,
{
    loop {
        match cvt(f()) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cvt_passes_through_success() {
        assert_eq!(cvt(7).unwrap(), 7);
        assert_eq!(cvt(0).unwrap(), 0);
    }

    #[test]
    fn cvt_reports_errno() {
        // fcntl on a closed/invalid fd sets EBADF
        let err = cvt(unsafe { libc::fcntl(-1, libc::F_GETFD) }).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
