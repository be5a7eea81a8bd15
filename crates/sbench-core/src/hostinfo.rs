//! Host introspection: CPU count and physical RAM for Discovery replies and
//! stat-pool sizing.

/// Number of usable CPU cores. Falls back to 1 if detection fails.
pub fn cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Physical RAM in bytes.
#[cfg(unix)]
pub fn physical_ram() -> u64 {
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if pages <= 0 || page_size <= 0 {
        // Conservative default when sysconf is unavailable.
        return 1 << 30;
    }
    pages as u64 * page_size as u64
}

#[cfg(not(unix))]
pub fn physical_ram() -> u64 {
    1 << 30
}
