use chrono::Utc;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::monitoring::safe_file_component;

/// Best-effort dump of rendered pages for offline diagnosis.
#[derive(Debug, Clone, Default)]
pub struct PageDiagnostics {
    dir: Option<PathBuf>,
}

impl PageDiagnostics {
    pub fn new(dir: Option<impl Into<PathBuf>>) -> Self {
        Self {
            dir: dir.map(Into::into),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Write `html` under a name derived from `label`. Never fails the caller.
    pub async fn capture(&self, label: &str, attempt: u32, html: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;

        let stem = match safe_file_component(label) {
            Ok(stem) => stem,
            Err(e) => {
                warn!("Could not derive diagnostic file name: {}", e);
                return None;
            }
        };
        let path = dir.join(format!(
            "timeout_{}_attempt{}_{}.html",
            stem,
            attempt,
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("Could not create diagnostics dir {}: {}", dir.display(), e);
            return None;
        }
        match tokio::fs::write(&path, html).await {
            Ok(()) => {
                info!("Saved page source to {} for debugging", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Could not save page source to {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_writes_one_file_per_call() {
        let dir = std::env::temp_dir().join(format!("mandi-diag-unit-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let diagnostics = PageDiagnostics::new(Some(&dir));

        let first = diagnostics.capture("Onion Maharashtra/Pune", 1, "<html/>").await.unwrap();
        let second = diagnostics.capture("Onion Maharashtra/Pune", 2, "<html/>").await.unwrap();

        assert_ne!(first, second);
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("timeout_Onion_Maharashtra_Pune_attempt1"));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn disabled_capture_is_a_no_op() {
        assert!(PageDiagnostics::disabled().capture("x", 1, "<html/>").await.is_none());
    }
}
