use std::env::current_exe;
use std::path::PathBuf;

/// Outcome of looking for a `.env` file, reported once logging is up.
#[derive(Debug, Default)]
pub struct EnvLoadResult {
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Load `.env` from the working directory, else from next to the executable.
///
/// Runs before the logger exists, so nothing is logged here.
pub fn try_load_dotenv() -> EnvLoadResult {
    if let Ok(path) = dotenvy::dotenv() {
        return EnvLoadResult {
            path: Some(path),
            error: None,
        };
    }

    let Some(env_path) = current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.exists())
    else {
        return EnvLoadResult::default();
    };

    match dotenvy::from_path(&env_path) {
        Ok(()) => EnvLoadResult {
            path: Some(env_path),
            error: None,
        },
        Err(e) => EnvLoadResult {
            path: None,
            error: Some(format!("Failed to parse {}: {e}", env_path.display())),
        },
    }
}
