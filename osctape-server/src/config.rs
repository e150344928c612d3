use directories::ProjectDirs;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Where played back messages go unless told otherwise
pub const DEFAULT_DESTINATION: &str = "127.0.0.1:8001";
/// Control channel for `/playbackcsv` and `/recordcsv`
pub const DEFAULT_CONTROL: &str = "127.0.0.1:8000";
/// Where the recorder listens
pub const DEFAULT_RECORD_LISTEN: &str = "127.0.0.1:8002";
pub const DEFAULT_NAME: &str = "agat";

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "osctape", "osctape")
}

/// `<data dir>/recordings`, or `./recordings` when the platform has no home directory
pub fn default_recordings_dir() -> PathBuf {
    match get_project_dirs() {
        Some(dirs) => dirs.data_dir().join("recordings"),
        None => {
            log::warn!("No home directory found, recording into ./recordings");
            PathBuf::from("recordings")
        }
    }
}

pub(crate) fn default_addr(s: &str) -> SocketAddr {
    // constants above are valid literals
    s.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)))
}
