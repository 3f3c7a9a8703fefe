use anyhow::{ensure, Result};
use std::path::Path;

/// Free space in bytes on the file system containing `path`, as far as unprivileged users can use it.
pub fn get_available_disk_space(path: &Path) -> Result<u64> {
    get_available_disk_space_impl(path)
}

#[cfg(unix)]
fn to_cpath(path: &Path) -> Vec<u8> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let path_os: &OsStr = path.as_ref();
    let mut cpath = path_os.as_bytes().to_vec();
    cpath.push(0);
    cpath
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn get_available_disk_space_impl(path: &Path) -> Result<u64> {
    use libc::statvfs64;

    let cpath = to_cpath(path);
    let (stat, retval) = unsafe {
        let mut stat: statvfs64 = std::mem::zeroed();
        let retval = statvfs64(cpath.as_ptr() as *const _, &mut stat);
        (stat, retval)
    };
    ensure!(0 == retval, errno::errno());
    #[allow(clippy::useless_conversion)]
    Ok(u64::from(stat.f_bsize) * u64::from(stat.f_bavail))
}

// statfs is 64bit on Apple platforms
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn get_available_disk_space_impl(path: &Path) -> Result<u64> {
    use libc::statfs;

    let cpath = to_cpath(path);
    let (stat, retval) = unsafe {
        let mut stat: statfs = std::mem::zeroed();
        let retval = statfs(cpath.as_ptr() as *const _, &mut stat);
        (stat, retval)
    };
    ensure!(0 == retval, errno::errno());
    Ok(u64::from(stat.f_bsize) * u64::from(stat.f_bavail))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
fn get_available_disk_space_impl(path: &Path) -> Result<u64> {
    anyhow::bail!(
        "Querying free disk space for {} isn't supported on this platform",
        path.display()
    )
}

#[cfg(all(test, any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios")))]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn given_existing_path_when_querying_available_disk_space_then_succeeds() {
        let tempdir = TempDir::new("").unwrap();
        let size = get_available_disk_space(tempdir.path()).unwrap();
        assert!(size > 0, "Expect size to be larger than zero");
    }

    #[test]
    fn given_nonexisting_path_when_querying_available_disk_space_then_fails() {
        let tempdir = TempDir::new("").unwrap();
        let path = tempdir.path().join("notexisting");
        let error = get_available_disk_space(&path)
            .unwrap_err()
            .downcast::<errno::Errno>()
            .unwrap();
        const ERRNO_ENOENT: i32 = 2;
        assert_eq!(errno::Errno(ERRNO_ENOENT), error);
    }
}
