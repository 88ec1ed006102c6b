use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(sift_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    match sift_home {
        Some(home) => Some(home.join(".env")),
        None => Some(home_dir?.join(".sift").join(".env")),
    }
}

/// Load `.env` from the working directory, falling back to the sift home.
/// Variables already set in the process environment win.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let sift_home = env::var_os("SIFT_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let Some(path) = fallback_dotenv_path(sift_home, dirs::home_dir()) else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}
