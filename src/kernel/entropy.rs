//! Entropy sources, strongest first.
//!
//! Each source fills a buffer completely or reports why it could not.

use std::io::Read;

const URANDOM_PATH: &str = "/dev/urandom";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntropySource {
    /// getrandom(2) with GRND_NONBLOCK
    KernelNonBlocking,
    /// getrandom(2) that may wait for the pool to initialize
    KernelBlocking,
    /// Platform CSPRNG buffer fill from the C runtime
    RuntimeCsprng,
    /// Read from the random device file
    DevUrandom,
}

impl EntropySource {
    /// Order in which sources are tried
    pub const CHAIN: [EntropySource; 4] = [
        EntropySource::KernelNonBlocking,
        EntropySource::KernelBlocking,
        EntropySource::RuntimeCsprng,
        EntropySource::DevUrandom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntropySource::KernelNonBlocking => "getrandom(GRND_NONBLOCK)",
            EntropySource::KernelBlocking => "getrandom",
            EntropySource::RuntimeCsprng => "runtime csprng",
            EntropySource::DevUrandom => URANDOM_PATH,
        }
    }

    pub fn fill(self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            EntropySource::KernelNonBlocking => kernel_getrandom(buf, true),
            EntropySource::KernelBlocking => kernel_getrandom(buf, false),
            EntropySource::RuntimeCsprng => getrandom::getrandom(buf)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
            EntropySource::DevUrandom => std::fs::File::open(URANDOM_PATH)?.read_exact(buf),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn kernel_getrandom(buf: &mut [u8], nonblocking: bool) -> std::io::Result<()> {
    let flags = if nonblocking { libc::GRND_NONBLOCK } else { 0 };
    let mut filled = 0;
    while filled < buf.len() {
        let rest = &mut buf[filled..];
        // SAFETY: rest is a valid writable region of rest.len() bytes.
        let rc = unsafe { libc::getrandom(rest.as_mut_ptr() as *mut libc::c_void, rest.len(), flags) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        filled += rc as usize;
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn kernel_getrandom(_buf: &mut [u8], _nonblocking: bool) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "getrandom is only available on Linux",
    ))
}
